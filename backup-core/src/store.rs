//! 持久化契约：备份历史、键值设置、OAuth 令牌
//!
//! 编排器、调度器和远程存储客户端只通过这里的 trait 访问存储，
//! DuckDB 实现见 [`crate::database::Database`]。

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 备份记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Success,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Success => "success",
            BackupStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(BackupStatus::Success),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(format!("未知的备份状态: {other}")),
        }
    }
}

/// 待写入的备份记录
#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    /// `mysql` 或 `files`
    pub backup_type: String,
    pub filename: String,
    pub filepath: String,
    pub size_bytes: Option<u64>,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub created_by: i64,
}

/// 备份历史记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: i64,
    pub backup_type: String,
    pub filename: String,
    pub filepath: String,
    pub size_bytes: Option<u64>,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub remote_file_id: Option<String>,
    pub uploaded_to_remote: bool,
    pub remote_upload_error: Option<String>,
}

/// 记录写入后唯一允许的修改：附加远程上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPatch {
    Uploaded { remote_file_id: String },
    UploadFailed { error: String },
}

/// 已授权用户的 OAuth 令牌，`(user_id, provider)` 唯一
#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub user_id: i64,
    pub provider: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expiry_epoch_millis: Option<i64>,
}

/// 刷新后需要持久化的令牌字段
#[derive(Debug, Clone)]
pub struct TokenRefresh {
    pub access_token: SecretString,
    /// `None` 表示保留原有的刷新令牌
    pub refresh_token: Option<SecretString>,
    pub expiry_epoch_millis: Option<i64>,
}

/// 备份历史存储
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert_record(&self, record: NewBackupRecord) -> Result<i64>;

    async fn update_record(&self, id: i64, patch: RecordPatch) -> Result<()>;

    /// 按创建时间倒序分页，返回 `(当前页, 总数)`
    async fn list_records(&self, offset: u64, limit: u64) -> Result<(Vec<BackupRecord>, u64)>;

    async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>>;
}

/// 键值设置存储
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// 读取所有以 `prefix` 开头的设置
    async fn get_settings(&self, prefix: &str) -> Result<BTreeMap<String, String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// OAuth 令牌存储
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_token(&self, user_id: i64, provider: &str) -> Result<Option<OAuthToken>>;

    /// 插入或替换令牌；新令牌没有刷新令牌时保留旧的
    async fn upsert_token(&self, token: OAuthToken) -> Result<()>;

    /// 持久化刷新结果
    async fn save_refreshed_token(
        &self,
        user_id: i64,
        provider: &str,
        refresh: TokenRefresh,
    ) -> Result<()>;

    async fn delete_token(&self, user_id: i64, provider: &str) -> Result<()>;
}
