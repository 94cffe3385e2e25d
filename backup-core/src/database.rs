use crate::store::{
    BackupRecord, HistoryStore, NewBackupRecord, OAuthToken, RecordPatch, SettingsStore,
    TokenRefresh, TokenStore,
};
use crate::{Result, db::DuckDbManager};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// 数据库 - DuckDB适配器，实现历史、设置、令牌三个存储契约
#[derive(Debug, Clone)]
pub struct Database {
    manager: DuckDbManager,
}

impl Database {
    /// 连接到数据库
    pub async fn connect<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let manager = DuckDbManager::new(db_path).await?;
        Ok(Database { manager })
    }

    /// 连接到内存数据库 (主要用于测试)
    pub async fn connect_memory() -> Result<Self> {
        let manager = DuckDbManager::new_memory().await?;
        Ok(Database { manager })
    }
}

#[async_trait]
impl HistoryStore for Database {
    async fn insert_record(&self, record: NewBackupRecord) -> Result<i64> {
        self.manager.insert_record(record).await
    }

    async fn update_record(&self, id: i64, patch: RecordPatch) -> Result<()> {
        self.manager.patch_record(id, patch).await
    }

    async fn list_records(&self, offset: u64, limit: u64) -> Result<(Vec<BackupRecord>, u64)> {
        self.manager.list_records(offset, limit).await
    }

    async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>> {
        self.manager.get_record(id).await
    }
}

#[async_trait]
impl SettingsStore for Database {
    async fn get_settings(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        self.manager.get_settings(prefix).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.manager.set_setting(key, value).await
    }
}

#[async_trait]
impl TokenStore for Database {
    async fn get_token(&self, user_id: i64, provider: &str) -> Result<Option<OAuthToken>> {
        self.manager.get_token(user_id, provider).await
    }

    async fn upsert_token(&self, token: OAuthToken) -> Result<()> {
        self.manager.upsert_token(token).await
    }

    async fn save_refreshed_token(
        &self,
        user_id: i64,
        provider: &str,
        refresh: TokenRefresh,
    ) -> Result<()> {
        self.manager
            .save_refreshed_token(user_id, provider, refresh)
            .await
    }

    async fn delete_token(&self, user_id: i64, provider: &str) -> Result<()> {
        self.manager.delete_token(user_id, provider).await
    }
}
