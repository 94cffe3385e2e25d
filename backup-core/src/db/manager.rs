use crate::error::BackupError;
use crate::Result;
use crate::store::{BackupRecord, NewBackupRecord, OAuthToken, RecordPatch, TokenRefresh};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::DbMessage;

/// DuckDB数据库管理器
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 创建新的DuckDB管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let actor = DuckDbActor::new(db_path);
        Self::start(actor).await
    }

    /// 创建内存数据库管理器
    pub async fn new_memory() -> Result<Self> {
        let actor = DuckDbActor::new_memory()?;
        Self::start(actor).await
    }

    async fn start(actor: DuckDbActor) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(100);
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };

        // 初始化数据库表
        manager
            .request(|respond_to| DbMessage::InitTables { respond_to })
            .await?;

        Ok(manager)
    }

    /// 发送消息并等待 Actor 回复
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BackupError::Storage("数据库Actor已关闭".to_string()))?;

        receiver
            .await
            .map_err(|_| BackupError::Storage("数据库Actor未返回响应".to_string()))?
    }

    pub async fn insert_record(&self, record: NewBackupRecord) -> Result<i64> {
        self.request(|respond_to| DbMessage::InsertRecord { record, respond_to })
            .await
    }

    pub async fn patch_record(&self, id: i64, patch: RecordPatch) -> Result<()> {
        self.request(|respond_to| DbMessage::PatchRecord {
            id,
            patch,
            respond_to,
        })
        .await
    }

    pub async fn list_records(&self, offset: u64, limit: u64) -> Result<(Vec<BackupRecord>, u64)> {
        self.request(|respond_to| DbMessage::ListRecords {
            offset,
            limit,
            respond_to,
        })
        .await
    }

    pub async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>> {
        self.request(|respond_to| DbMessage::GetRecord { id, respond_to })
            .await
    }

    pub async fn get_settings(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        self.request(|respond_to| DbMessage::GetSettings {
            prefix: prefix.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.request(|respond_to| DbMessage::SetSetting {
            key: key.to_string(),
            value: value.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn get_token(&self, user_id: i64, provider: &str) -> Result<Option<OAuthToken>> {
        self.request(|respond_to| DbMessage::GetToken {
            user_id,
            provider: provider.to_string(),
            respond_to,
        })
        .await
    }

    pub async fn upsert_token(&self, token: OAuthToken) -> Result<()> {
        self.request(|respond_to| DbMessage::UpsertToken { token, respond_to })
            .await
    }

    pub async fn save_refreshed_token(
        &self,
        user_id: i64,
        provider: &str,
        refresh: TokenRefresh,
    ) -> Result<()> {
        self.request(|respond_to| DbMessage::SaveRefreshedToken {
            user_id,
            provider: provider.to_string(),
            refresh,
            respond_to,
        })
        .await
    }

    pub async fn delete_token(&self, user_id: i64, provider: &str) -> Result<()> {
        self.request(|respond_to| DbMessage::DeleteToken {
            user_id,
            provider: provider.to_string(),
            respond_to,
        })
        .await
    }
}
