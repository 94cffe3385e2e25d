//! 备份运行编排
//!
//! 一次运行：解析目标 -> 逐个生产备份文件 -> 写入历史记录 -> 可选上传远程存储 -> 可选清理本地文件。
//! 单个目标的失败只记录在 `errors` 中，不会中断整个运行。

use crate::config::AppConfig;
use crate::constants::history;
use crate::error::{BackupError, Result};
use crate::producer::{BackupProducer, ProducerKind, failure_file_name};
use crate::remote_storage::RemoteStorage;
use crate::store::{BackupRecord, BackupStatus, HistoryStore, NewBackupRecord, RecordPatch};
use crate::target::{BackupTarget, TargetResolver};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{Span, debug, error, info, instrument, warn};
use uuid::Uuid;

/// 成功的目标
#[derive(Debug, Clone, Serialize)]
pub struct TargetSuccess {
    pub target: String,
    pub filename: String,
    pub size: u64,
    /// 历史记录写入失败时为空
    pub record_id: Option<i64>,
    pub remote_file_id: Option<String>,
    pub remote_upload_error: Option<String>,
}

/// 失败的目标
#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub target: String,
    pub error: String,
}

/// 一次运行的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    /// 至少一个目标成功即为成功
    pub success: bool,
    pub results: Vec<TargetSuccess>,
    pub errors: Vec<TargetFailure>,
}

/// 历史记录分页
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub records: Vec<BackupRecord>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

/// 备份管理器
pub struct BackupManager {
    config: AppConfig,
    history: Arc<dyn HistoryStore>,
    remote_storage: Option<Arc<dyn RemoteStorage>>,
    producer: Option<Arc<dyn BackupProducer>>,
    target_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BackupManager {
    /// 创建新的备份管理器
    pub fn new(config: AppConfig, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            config,
            history,
            remote_storage: None,
            producer: None,
            target_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 接入远程存储
    pub fn with_remote_storage(mut self, remote_storage: Arc<dyn RemoteStorage>) -> Self {
        self.remote_storage = Some(remote_storage);
        self
    }

    /// 使用指定的生产者，不再按配置选择
    pub fn with_producer(mut self, producer: Arc<dyn BackupProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 备份所有配置的数据库
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn run_database_backups(&self, user_id: i64) -> Result<RunResult> {
        let run_id = start_run();
        let targets = TargetResolver::new(&self.config).resolve_databases()?;
        let producer = self.producer_for(ProducerKind::Local)?;

        info!("开始数据库备份，共 {} 个目标", targets.len());
        Ok(self.run(run_id, targets, producer.as_ref(), user_id).await)
    }

    /// 备份所有配置的文件路径，远程主机配置齐全时通过 SSH 采集
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn run_file_backups(&self, user_id: i64) -> Result<RunResult> {
        let run_id = start_run();
        let kind = ProducerKind::for_files(&self.config);
        let targets = TargetResolver::new(&self.config).resolve_paths(kind.is_remote())?;
        let producer = self.producer_for(kind)?;

        info!(
            remote = kind.is_remote(),
            "开始文件备份，共 {} 个目标",
            targets.len()
        );
        Ok(self.run(run_id, targets, producer.as_ref(), user_id).await)
    }

    /// 分页查询历史记录，页码从 1 开始
    pub async fn history(&self, page: u32, limit: u32) -> Result<HistoryPage> {
        let page = page.max(history::DEFAULT_PAGE);
        let limit = if limit == 0 {
            history::DEFAULT_LIMIT
        } else {
            limit
        };

        let offset = u64::from(page - 1) * u64::from(limit);
        let (records, total) = self.history.list_records(offset, u64::from(limit)).await?;

        Ok(HistoryPage {
            records,
            page,
            limit,
            total,
            total_pages: total.div_ceil(u64::from(limit)),
        })
    }

    /// 获取单条历史记录
    pub async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>> {
        self.history.get_record(id).await
    }

    /// 定位可下载的备份文件：记录必须成功且本地文件仍然存在
    pub async fn locate_artifact(&self, id: i64) -> Result<PathBuf> {
        let record = self
            .history
            .get_record(id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("备份记录 {id}")))?;

        if record.status != BackupStatus::Success || record.filepath.is_empty() {
            return Err(BackupError::NotFound(format!("备份记录 {id} 没有备份文件")));
        }

        let path = PathBuf::from(&record.filepath);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BackupError::NotFound(format!(
                "备份文件已不在本地: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    fn producer_for(&self, kind: ProducerKind) -> Result<Arc<dyn BackupProducer>> {
        if let Some(producer) = &self.producer {
            return Ok(producer.clone());
        }
        let output_dir = self.config.ensure_backup_dir()?;
        Ok(kind.build(&self.config, &output_dir))
    }

    /// 按顺序处理所有目标
    async fn run(
        &self,
        run_id: String,
        targets: Vec<BackupTarget>,
        producer: &dyn BackupProducer,
        user_id: i64,
    ) -> RunResult {
        let mut results = Vec::new();
        let mut errors = Vec::new();

        for target in &targets {
            match self.backup_target(producer, target, user_id).await {
                Ok(success) => results.push(success),
                Err(failure) => errors.push(failure),
            }
        }

        if errors.is_empty() {
            info!("备份运行完成: {} 个目标全部成功", results.len());
        } else {
            warn!(
                "备份运行完成: 成功 {} 个，失败 {} 个",
                results.len(),
                errors.len()
            );
        }

        RunResult {
            run_id,
            success: !results.is_empty(),
            results,
            errors,
        }
    }

    /// 单个目标：生产 -> 记录 -> 上传 -> 清理
    async fn backup_target(
        &self,
        producer: &dyn BackupProducer,
        target: &BackupTarget,
        user_id: i64,
    ) -> std::result::Result<TargetSuccess, TargetFailure> {
        let _guard = self.lock_target(target).await;
        let name = target.display_name().to_string();

        let artifact = match self.produce(producer, target).await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(target_name = %name, "备份失败: {}", e);
                let message = e.to_string();
                self.insert_record(NewBackupRecord {
                    backup_type: target.kind.backup_type().to_string(),
                    filename: failure_file_name(target),
                    filepath: String::new(),
                    size_bytes: None,
                    status: BackupStatus::Failed,
                    error_message: Some(message.clone()),
                    created_by: user_id,
                })
                .await;

                return Err(TargetFailure {
                    target: name,
                    error: message,
                });
            }
        };

        let filename = artifact.file_name();
        info!(target_name = %name, size = artifact.size_bytes, "备份完成: {}", filename);

        let record_id = self
            .insert_record(NewBackupRecord {
                backup_type: target.kind.backup_type().to_string(),
                filename: filename.clone(),
                filepath: artifact.path.to_string_lossy().to_string(),
                size_bytes: Some(artifact.size_bytes),
                status: BackupStatus::Success,
                error_message: None,
                created_by: user_id,
            })
            .await;

        let mut success = TargetSuccess {
            target: name,
            filename,
            size: artifact.size_bytes,
            record_id,
            remote_file_id: None,
            remote_upload_error: None,
        };

        let Some(remote) = self.upload_destination(user_id).await else {
            return Ok(success);
        };

        match remote.upload(&artifact.path, &success.filename, user_id).await {
            Ok(file) => {
                self.patch_record(
                    record_id,
                    RecordPatch::Uploaded {
                        remote_file_id: file.id.clone(),
                    },
                )
                .await;
                success.remote_file_id = Some(file.id);

                if !self.config.backup.keep_local {
                    match tokio::fs::remove_file(&artifact.path).await {
                        Ok(()) => debug!("已删除本地备份文件: {}", artifact.path.display()),
                        Err(e) => warn!("删除本地备份文件失败: {}: {}", artifact.path.display(), e),
                    }
                }
            }
            Err(e) => {
                if e.is_remote_storage() {
                    warn!(target_name = %success.target, "上传到远程存储失败: {}", e);
                } else {
                    error!(target_name = %success.target, "上传时本地处理失败: {}", e);
                }
                let message = e.to_string();
                self.patch_record(
                    record_id,
                    RecordPatch::UploadFailed {
                        error: message.clone(),
                    },
                )
                .await;
                success.remote_upload_error = Some(message);
            }
        }

        Ok(success)
    }

    /// 生产备份文件，超时按生产失败处理
    async fn produce(
        &self,
        producer: &dyn BackupProducer,
        target: &BackupTarget,
    ) -> Result<crate::producer::Artifact> {
        match self.config.command_timeout() {
            None => producer.produce(target).await,
            Some(limit) => tokio::time::timeout(limit, producer.produce(target))
                .await
                .unwrap_or_else(|_| {
                    Err(BackupError::Timeout(format!(
                        "{} 超过 {} 秒未完成",
                        target.display_name(),
                        limit.as_secs()
                    )))
                }),
        }
    }

    /// 远程存储已启用且用户已授权时返回上传目标
    async fn upload_destination(&self, user_id: i64) -> Option<&Arc<dyn RemoteStorage>> {
        let remote = self.remote_storage.as_ref().filter(|r| r.is_enabled())?;
        match remote.is_authorized(user_id).await {
            Ok(true) => Some(remote),
            Ok(false) => {
                debug!(user_id, "用户未授权远程存储，跳过上传");
                None
            }
            Err(e) => {
                warn!(user_id, "检查远程存储授权失败，跳过上传: {}", e);
                None
            }
        }
    }

    async fn insert_record(&self, record: NewBackupRecord) -> Option<i64> {
        match self.history.insert_record(record).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!("写入备份历史失败: {}", e);
                None
            }
        }
    }

    async fn patch_record(&self, record_id: Option<i64>, patch: RecordPatch) {
        let Some(id) = record_id else {
            return;
        };
        if let Err(e) = self.history.update_record(id, patch).await {
            error!(record_id = id, "更新备份历史的上传结果失败: {}", e);
        }
    }

    /// 同一目标同一时刻只允许一个运行处理
    async fn lock_target(&self, target: &BackupTarget) -> OwnedMutexGuard<()> {
        let lock = self
            .target_locks
            .lock()
            .await
            .entry(target.lock_key())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

fn start_run() -> String {
    let run_id = Uuid::new_v4().to_string();
    Span::current().record("run_id", run_id.as_str());
    run_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::producer::Artifact;
    use crate::remote_storage::RemoteFile;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// 按目标名决定结果的生产者：`Ok(size)` 写出对应大小的文件
    struct FakeProducer {
        dir: PathBuf,
        outcomes: HashMap<String, std::result::Result<usize, String>>,
        delay: Option<Duration>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeProducer {
        fn new(dir: &Path, outcomes: &[(&str, std::result::Result<usize, &str>)]) -> Self {
            Self {
                dir: dir.to_path_buf(),
                outcomes: outcomes
                    .iter()
                    .map(|(name, outcome)| (name.to_string(), outcome.map_err(str::to_string)))
                    .collect(),
                delay: None,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl BackupProducer for FakeProducer {
        async fn produce(&self, target: &BackupTarget) -> Result<Artifact> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            match self.outcomes.get(&target.name) {
                Some(Ok(size)) => {
                    let path = self.dir.join(format!("mysql_backup_{}.sql", target.name));
                    tokio::fs::write(&path, vec![b'x'; *size]).await?;
                    Artifact::from_path(path, Utc::now()).await
                }
                Some(Err(cause)) => Err(BackupError::producer(cause.clone())),
                None => Err(BackupError::producer("unexpected target")),
            }
        }
    }

    struct FakeRemote {
        authorized: bool,
        fail_with: Option<String>,
        uploads: std::sync::Mutex<Vec<String>>,
    }

    impl FakeRemote {
        fn new(authorized: bool, fail_with: Option<&str>) -> Self {
            Self {
                authorized,
                fail_with: fail_with.map(str::to_string),
                uploads: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn uploads(&self) -> Vec<String> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteStorage for FakeRemote {
        fn is_enabled(&self) -> bool {
            true
        }

        async fn is_authorized(&self, _user_id: i64) -> Result<bool> {
            Ok(self.authorized)
        }

        async fn upload(&self, local_path: &Path, filename: &str, _user_id: i64) -> Result<RemoteFile> {
            assert!(local_path.exists());
            self.uploads.lock().unwrap().push(filename.to_string());
            match &self.fail_with {
                Some(cause) => Err(BackupError::transport(cause.clone())),
                None => Ok(RemoteFile {
                    id: format!("drive-{filename}"),
                    name: Some(filename.to_string()),
                    size: None,
                    web_view_link: None,
                }),
            }
        }
    }

    /// 写入总是失败的历史存储
    struct BrokenHistory;

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        async fn insert_record(&self, _record: NewBackupRecord) -> Result<i64> {
            Err(BackupError::Storage("database is locked".to_string()))
        }

        async fn update_record(&self, _id: i64, _patch: RecordPatch) -> Result<()> {
            Err(BackupError::Storage("database is locked".to_string()))
        }

        async fn list_records(&self, _offset: u64, _limit: u64) -> Result<(Vec<BackupRecord>, u64)> {
            Ok((Vec::new(), 0))
        }

        async fn get_record(&self, _id: i64) -> Result<Option<BackupRecord>> {
            Ok(None)
        }
    }

    fn config(databases: &str, dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.mysql.databases = databases.to_string();
        config.mysql.user = Some("backup".to_string());
        config.backup.storage_dir = dir.path().to_string_lossy().to_string();
        config
    }

    async fn all_records(db: &Database) -> Vec<BackupRecord> {
        db.list_records(0, 100).await.unwrap().0
    }

    #[tokio::test]
    async fn test_failed_target_does_not_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let producer = FakeProducer::new(dir.path(), &[("a", Ok(100)), ("b", Err("tool not found"))]);
        let manager = BackupManager::new(config("a,b", &dir), Arc::new(db.clone()))
            .with_producer(Arc::new(producer));

        let result = manager.run_database_backups(1).await.unwrap();

        assert!(result.success);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].target, "a");
        assert_eq!(result.results[0].size, 100);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].target, "b");
        assert_eq!(result.errors[0].error, "tool not found");

        let records = all_records(&db).await;
        assert_eq!(records.len(), 2);
        let failed = records.iter().find(|r| r.status == BackupStatus::Failed).unwrap();
        assert_eq!(failed.filename, "failed_backup_b");
        assert_eq!(failed.filepath, "");
        assert_eq!(failed.error_message.as_deref(), Some("tool not found"));
        let ok = records.iter().find(|r| r.status == BackupStatus::Success).unwrap();
        assert_eq!(ok.size_bytes, Some(100));
        assert_eq!(ok.created_by, 1);
    }

    #[tokio::test]
    async fn test_every_target_failing_is_unsuccessful() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let producer = FakeProducer::new(dir.path(), &[("a", Err("boom")), ("b", Err("boom"))]);
        let manager = BackupManager::new(config("a,b", &dir), Arc::new(db.clone()))
            .with_producer(Arc::new(producer));

        let result = manager.run_database_backups(1).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(all_records(&db).await.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_target_list_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let manager = BackupManager::new(config("", &dir), Arc::new(db.clone()))
            .with_producer(Arc::new(FakeProducer::new(dir.path(), &[])));

        let err = manager.run_database_backups(1).await.unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
        assert!(all_records(&db).await.is_empty());
    }

    #[tokio::test]
    async fn test_uploaded_artifact_is_deleted_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let remote = Arc::new(FakeRemote::new(true, None));
        let manager = BackupManager::new(config("a", &dir), Arc::new(db.clone()))
            .with_producer(Arc::new(FakeProducer::new(dir.path(), &[("a", Ok(10))])))
            .with_remote_storage(remote.clone());

        let result = manager.run_database_backups(1).await.unwrap();
        let success = &result.results[0];
        assert_eq!(success.remote_file_id.as_deref(), Some("drive-mysql_backup_a.sql"));
        assert!(!dir.path().join("mysql_backup_a.sql").exists());

        let record = db.get_record(success.record_id.unwrap()).await.unwrap().unwrap();
        assert!(record.uploaded_to_remote);
        assert_eq!(record.remote_file_id, success.remote_file_id);
        assert_eq!(remote.uploads(), vec!["mysql_backup_a.sql"]);
    }

    #[tokio::test]
    async fn test_keep_local_preserves_uploaded_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let mut config = config("a", &dir);
        config.backup.keep_local = true;
        let manager = BackupManager::new(config, Arc::new(db))
            .with_producer(Arc::new(FakeProducer::new(dir.path(), &[("a", Ok(10))])))
            .with_remote_storage(Arc::new(FakeRemote::new(true, None)));

        let result = manager.run_database_backups(1).await.unwrap();
        assert!(result.results[0].remote_file_id.is_some());
        assert!(dir.path().join("mysql_backup_a.sql").exists());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_success_status() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let manager = BackupManager::new(config("a", &dir), Arc::new(db.clone()))
            .with_producer(Arc::new(FakeProducer::new(dir.path(), &[("a", Ok(10))])))
            .with_remote_storage(Arc::new(FakeRemote::new(true, Some("quota exceeded"))));

        let result = manager.run_database_backups(1).await.unwrap();
        assert!(result.success);
        assert!(result.errors.is_empty());
        assert!(dir.path().join("mysql_backup_a.sql").exists());

        let record = db
            .get_record(result.results[0].record_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, BackupStatus::Success);
        assert!(!record.uploaded_to_remote);
        assert!(record.remote_upload_error.unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_unauthorized_user_skips_upload() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let remote = Arc::new(FakeRemote::new(false, None));
        let manager = BackupManager::new(config("a", &dir), Arc::new(db))
            .with_producer(Arc::new(FakeProducer::new(dir.path(), &[("a", Ok(10))])))
            .with_remote_storage(remote.clone());

        let result = manager.run_database_backups(1).await.unwrap();
        assert!(result.success);
        assert!(remote.uploads().is_empty());
        assert!(dir.path().join("mysql_backup_a.sql").exists());
    }

    #[tokio::test]
    async fn test_history_write_failure_still_counts_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(config("a", &dir), Arc::new(BrokenHistory))
            .with_producer(Arc::new(FakeProducer::new(dir.path(), &[("a", Ok(5))])))
            .with_remote_storage(Arc::new(FakeRemote::new(true, None)));

        let result = manager.run_database_backups(1).await.unwrap();
        assert!(result.success);
        assert_eq!(result.results[0].record_id, None);
        assert!(result.results[0].remote_file_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_target_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config("a", &dir);
        config.backup.command_timeout_secs = 5;
        let producer = FakeProducer::new(dir.path(), &[("a", Ok(1))])
            .with_delay(Duration::from_secs(3600));
        let manager = BackupManager::new(config, Arc::new(BrokenHistory))
            .with_producer(Arc::new(producer));

        let result = manager.run_database_backups(1).await.unwrap();
        assert!(!result.success);
        assert!(result.errors[0].error.contains("超时"));
    }

    #[tokio::test]
    async fn test_overlapping_runs_do_not_share_a_target() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let producer = Arc::new(
            FakeProducer::new(dir.path(), &[("a", Ok(1))]).with_delay(Duration::from_millis(50)),
        );
        let manager = BackupManager::new(config("a", &dir), Arc::new(db.clone()))
            .with_producer(producer.clone());

        let (first, second) = tokio::join!(
            manager.run_database_backups(1),
            manager.run_database_backups(2)
        );
        assert!(first.unwrap().success);
        assert!(second.unwrap().success);
        assert_eq!(producer.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(all_records(&db).await.len(), 2);
    }

    #[tokio::test]
    async fn test_locate_artifact_requires_success_and_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let producer = FakeProducer::new(dir.path(), &[("a", Ok(10)), ("b", Err("boom"))]);
        let manager = BackupManager::new(config("a,b", &dir), Arc::new(db.clone()))
            .with_producer(Arc::new(producer));

        let result = manager.run_database_backups(1).await.unwrap();
        let ok_id = result.results[0].record_id.unwrap();
        let failed_id = all_records(&db)
            .await
            .into_iter()
            .find(|r| r.status == BackupStatus::Failed)
            .unwrap()
            .id;

        let path = manager.locate_artifact(ok_id).await.unwrap();
        assert_eq!(path, dir.path().join("mysql_backup_a.sql"));

        let err = manager.locate_artifact(failed_id).await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));

        let err = manager.locate_artifact(ok_id + 100).await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));

        std::fs::remove_file(&path).unwrap();
        let err = manager.locate_artifact(ok_id).await.unwrap_err();
        assert!(err.to_string().contains("不在本地"));
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_memory().await.unwrap();
        let manager = BackupManager::new(config("a,b,c", &dir), Arc::new(db))
            .with_producer(Arc::new(FakeProducer::new(
                dir.path(),
                &[("a", Ok(1)), ("b", Ok(1)), ("c", Err("boom"))],
            )));
        manager.run_database_backups(1).await.unwrap();

        let page = manager.history(0, 2).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.records.len(), 2);

        let page = manager.history(2, 2).await.unwrap();
        assert_eq!(page.records.len(), 1);

        let id = page.records[0].id;
        assert!(manager.get_record(id).await.unwrap().is_some());
        assert!(manager.get_record(id + 1000).await.unwrap().is_none());
    }
}
