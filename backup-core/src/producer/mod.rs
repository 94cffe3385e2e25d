// 备份生产者
//
// 把一个备份目标物化为本地备份文件：
// - LocalCommandProducer: 调用本地 mysqldump / tar
// - RemoteStreamProducer: 通过 SSH 在远程主机执行 tar，并把标准输出流式写入本地文件
//
// 生产者失败时保证不留下半截文件。

mod local;
mod remote;
mod tool;
mod verify;

pub use local::LocalCommandProducer;
pub use remote::RemoteStreamProducer;
pub use tool::resolve_tool;
pub use verify::verify_archive;

use crate::config::AppConfig;
use crate::constants::backup;
use crate::error::Result;
use crate::target::{BackupTarget, TargetKind};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 生产出的备份文件
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub produced_at: DateTime<Utc>,
}

impl Artifact {
    /// 读取文件大小，构造备份文件描述
    pub async fn from_path(path: PathBuf, produced_at: DateTime<Utc>) -> Result<Self> {
        let size_bytes = tokio::fs::metadata(&path).await?.len();
        Ok(Self {
            path,
            size_bytes,
            produced_at,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// 备份生产者
#[async_trait]
pub trait BackupProducer: Send + Sync {
    /// 把目标物化为本地文件，任何非零退出或传输失败都返回 `BackupError::Producer`
    async fn produce(&self, target: &BackupTarget) -> Result<Artifact>;
}

/// 文件备份使用的生产者类型，每次运行解析一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerKind {
    Local,
    Remote,
}

impl ProducerKind {
    /// 远程主机配置齐全时走远程采集
    pub fn for_files(config: &AppConfig) -> Self {
        if config.remote.is_enabled() {
            ProducerKind::Remote
        } else {
            ProducerKind::Local
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ProducerKind::Remote)
    }

    /// 构造对应的生产者实现
    pub fn build(&self, config: &AppConfig, output_dir: &Path) -> Arc<dyn BackupProducer> {
        match self {
            ProducerKind::Local => Arc::new(LocalCommandProducer::new(config, output_dir)),
            ProducerKind::Remote => Arc::new(RemoteStreamProducer::new(config, output_dir)),
        }
    }
}

/// 文件名中使用的时间戳：ISO-8601 UTC，`:` 和 `.` 替换为 `-`
pub fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// 备份文件名
pub fn artifact_file_name(target: &BackupTarget, at: DateTime<Utc>) -> String {
    let ts = timestamp_slug(at);
    match target.kind {
        TargetKind::Database => format!("{}{}_{}.sql", backup::MYSQL_PREFIX, target.name, ts),
        TargetKind::FilesystemPath => {
            format!("{}{}_{}.tar.gz", backup::FILES_PREFIX, target.name, ts)
        }
    }
}

/// 失败记录使用的文件名
pub fn failure_file_name(target: &BackupTarget) -> String {
    match target.kind {
        TargetKind::Database => format!("failed_backup_{}", target.name),
        TargetKind::FilesystemPath => format!("failed_{}", target.name),
    }
}

/// 生产中的备份文件
///
/// 在 `keep()` 之前被丢弃（出错返回，或外层超时取消了生产）时删除文件，
/// 保证不留下半截文件。
pub(crate) struct PartialArtifact {
    path: PathBuf,
    armed: bool,
}

impl PartialArtifact {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// 生产完成，保留文件
    pub(crate) fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("已删除不完整的备份文件: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("删除不完整的备份文件失败: {}: {}", self.path.display(), e),
        }
    }
}
