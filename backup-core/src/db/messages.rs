use crate::Result;
use crate::store::{BackupRecord, NewBackupRecord, OAuthToken, RecordPatch, TokenRefresh};
use std::collections::BTreeMap;
use tokio::sync::oneshot;

/// DuckDB数据库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份历史 ==========
    /// 插入备份记录
    InsertRecord {
        record: NewBackupRecord,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    /// 附加远程上传结果
    PatchRecord {
        id: i64,
        patch: RecordPatch,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 分页读取备份记录
    ListRecords {
        offset: u64,
        limit: u64,
        respond_to: oneshot::Sender<Result<(Vec<BackupRecord>, u64)>>,
    },
    /// 根据ID获取备份记录
    GetRecord {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<BackupRecord>>>,
    },

    // ========== 键值设置 ==========
    GetSettings {
        prefix: String,
        respond_to: oneshot::Sender<Result<BTreeMap<String, String>>>,
    },
    SetSetting {
        key: String,
        value: String,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== OAuth 令牌 ==========
    GetToken {
        user_id: i64,
        provider: String,
        respond_to: oneshot::Sender<Result<Option<OAuthToken>>>,
    },
    UpsertToken {
        token: OAuthToken,
        respond_to: oneshot::Sender<Result<()>>,
    },
    SaveRefreshedToken {
        user_id: i64,
        provider: String,
        refresh: TokenRefresh,
        respond_to: oneshot::Sender<Result<()>>,
    },
    DeleteToken {
        user_id: i64,
        provider: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
}
