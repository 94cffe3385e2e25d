use crate::Result;
use crate::constants::database;
use crate::error::BackupError;
use crate::store::{BackupRecord, BackupStatus, NewBackupRecord, OAuthToken, RecordPatch, TokenRefresh};
use chrono::Utc;
use duckdb::types::Type;
use duckdb::{Connection, Row, params};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::DbMessage;

const RECORD_COLUMNS: &str = "id, backup_type, filename, filepath, file_size, status, error_message, \
     created_by, created_at, remote_file_id, uploaded_to_remote, remote_upload_error";

/// DuckDB Actor - 确保单线程访问DuckDB
///
/// 文件数据库按消息打开连接，处理完立即关闭：DuckDB 对数据库文件加的是跨进程的独占锁，
/// 守护进程长期持有连接会让其他 `backup-cli` 进程无法读写。
/// 内存数据库无法重新打开，始终保持同一个连接。
pub struct DuckDbActor {
    db_path: Option<PathBuf>,
    connection: Option<Connection>,
    open_error: Option<String>,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor，连接在处理消息时才打开
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path: Some(db_path),
            connection: None,
            open_error: None,
        }
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self {
            db_path: None,
            connection: Some(connection),
            open_error: None,
        })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        debug!("DuckDB Actor 已启动");

        while let Some(message) = receiver.recv().await {
            self.open().await;
            self.handle_message(message);
            self.release();
        }

        debug!("DuckDB Actor 已关闭");
    }

    /// 打开文件数据库，其他进程持有文件锁时按间隔重试
    async fn open(&mut self) {
        let Some(path) = &self.db_path else {
            return;
        };

        let mut attempts = 0;
        let result = loop {
            match Connection::open(path) {
                Err(e) if is_lock_conflict(&e) && attempts < database::LOCK_RETRY_ATTEMPTS => {
                    attempts += 1;
                    debug!(attempts, "数据库文件被其他进程占用，稍后重试");
                    tokio::time::sleep(Duration::from_millis(database::LOCK_RETRY_INTERVAL_MS))
                        .await;
                }
                other => break other,
            }
        };

        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.open_error = None;
            }
            Err(e) => {
                warn!("打开数据库失败: {}", e);
                self.open_error = Some(e.to_string());
            }
        }
    }

    /// 关闭文件数据库连接，释放文件锁
    fn release(&mut self) {
        if self.db_path.is_some() {
            self.connection = None;
        }
    }

    fn conn(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or_else(|| {
            BackupError::Storage(
                self.open_error
                    .clone()
                    .unwrap_or_else(|| "数据库连接未打开".to_string()),
            )
        })
    }

    /// 处理数据库消息
    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }
            DbMessage::InsertRecord { record, respond_to } => {
                let _ = respond_to.send(self.insert_record(&record));
            }
            DbMessage::PatchRecord {
                id,
                patch,
                respond_to,
            } => {
                let _ = respond_to.send(self.patch_record(id, &patch));
            }
            DbMessage::ListRecords {
                offset,
                limit,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_records(offset, limit));
            }
            DbMessage::GetRecord { id, respond_to } => {
                let _ = respond_to.send(self.get_record(id));
            }
            DbMessage::GetSettings { prefix, respond_to } => {
                let _ = respond_to.send(self.get_settings(&prefix));
            }
            DbMessage::SetSetting {
                key,
                value,
                respond_to,
            } => {
                let _ = respond_to.send(self.set_setting(&key, &value));
            }
            DbMessage::GetToken {
                user_id,
                provider,
                respond_to,
            } => {
                let _ = respond_to.send(self.get_token(user_id, &provider));
            }
            DbMessage::UpsertToken { token, respond_to } => {
                let _ = respond_to.send(self.upsert_token(&token));
            }
            DbMessage::SaveRefreshedToken {
                user_id,
                provider,
                refresh,
                respond_to,
            } => {
                let _ = respond_to.send(self.save_refreshed_token(user_id, &provider, &refresh));
            }
            DbMessage::DeleteToken {
                user_id,
                provider,
                respond_to,
            } => {
                let _ = respond_to.send(self.delete_token(user_id, &provider));
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化DuckDB表...");

        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';') {
            let trimmed = statement.trim();
            if is_executable(trimmed) {
                self.conn()?.execute(trimmed, [])?;
            }
        }

        info!("DuckDB表初始化完成");
        Ok(())
    }

    fn insert_record(&mut self, record: &NewBackupRecord) -> Result<i64> {
        let size = record.size_bytes.and_then(|s| i64::try_from(s).ok());

        self.conn()?.execute(
            "INSERT INTO backup_history (backup_type, filename, filepath, file_size, status, error_message, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.backup_type,
                record.filename,
                record.filepath,
                size,
                record.status.as_str(),
                record.error_message,
                record.created_by,
                Utc::now().naive_utc()
            ],
        )?;

        // 获取最后插入的ID
        let id: i64 = self.conn()?.query_row(
            "SELECT currval('backup_history_id_seq')",
            [],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    fn patch_record(&mut self, id: i64, patch: &RecordPatch) -> Result<()> {
        let updated = match patch {
            RecordPatch::Uploaded { remote_file_id } => self.conn()?.execute(
                "UPDATE backup_history SET remote_file_id = ?, uploaded_to_remote = TRUE, remote_upload_error = NULL WHERE id = ?",
                params![remote_file_id, id],
            )?,
            RecordPatch::UploadFailed { error } => self.conn()?.execute(
                "UPDATE backup_history SET remote_upload_error = ? WHERE id = ?",
                params![error, id],
            )?,
        };

        if updated == 0 {
            return Err(BackupError::Storage(format!("备份记录不存在: {id}")));
        }
        Ok(())
    }

    fn list_records(&mut self, offset: u64, limit: u64) -> Result<(Vec<BackupRecord>, u64)> {
        let total: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM backup_history", [], |row| row.get(0))?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM backup_history ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut stmt = self.conn()?.prepare(&sql)?;
        let rows = stmt.query_map(
            params![clamp_i64(limit), clamp_i64(offset)],
            record_from_row,
        )?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }

        Ok((records, total.max(0) as u64))
    }

    fn get_record(&mut self, id: i64) -> Result<Option<BackupRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM backup_history WHERE id = ?");
        let mut stmt = self.conn()?.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(record_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    fn get_settings(&mut self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let mut stmt = self.conn()?.prepare(
            "SELECT setting_key, setting_value FROM app_settings WHERE starts_with(setting_key, ?)",
        )?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut settings = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            settings.insert(key, value);
        }
        Ok(settings)
    }

    fn set_setting(&mut self, key: &str, value: &str) -> Result<()> {
        // 首先尝试更新现有设置
        let updated = self.conn()?.execute(
            "UPDATE app_settings SET setting_value = ?, updated_at = CURRENT_TIMESTAMP WHERE setting_key = ?",
            params![value, key],
        )?;

        // 如果没有更新任何行，则插入新设置
        if updated == 0 {
            self.conn()?.execute(
                "INSERT INTO app_settings (setting_key, setting_value) VALUES (?, ?)",
                params![key, value],
            )?;
        }
        Ok(())
    }

    fn get_token(&mut self, user_id: i64, provider: &str) -> Result<Option<OAuthToken>> {
        let mut stmt = self.conn()?.prepare(
            "SELECT access_token, refresh_token, expiry_date FROM oauth_tokens WHERE user_id = ? AND provider = ?",
        )?;
        let mut rows = stmt.query(params![user_id, provider])?;

        if let Some(row) = rows.next()? {
            let access_token: String = row.get(0)?;
            let refresh_token: Option<String> = row.get(1)?;
            let expiry: Option<i64> = row.get(2)?;

            Ok(Some(OAuthToken {
                user_id,
                provider: provider.to_string(),
                access_token: SecretString::from(access_token),
                refresh_token: refresh_token.map(SecretString::from),
                expiry_epoch_millis: expiry,
            }))
        } else {
            Ok(None)
        }
    }

    fn upsert_token(&mut self, token: &OAuthToken) -> Result<()> {
        let access_token = token.access_token.expose_secret();
        let refresh_token = token.refresh_token.as_ref().map(|t| t.expose_secret());

        let updated = self.conn()?.execute(
            "UPDATE oauth_tokens SET access_token = ?, refresh_token = COALESCE(?, refresh_token), expiry_date = ?, updated_at = CURRENT_TIMESTAMP
             WHERE user_id = ? AND provider = ?",
            params![
                access_token,
                refresh_token,
                token.expiry_epoch_millis,
                token.user_id,
                token.provider
            ],
        )?;

        if updated == 0 {
            self.conn()?.execute(
                "INSERT INTO oauth_tokens (user_id, provider, access_token, refresh_token, expiry_date) VALUES (?, ?, ?, ?, ?)",
                params![
                    token.user_id,
                    token.provider,
                    access_token,
                    refresh_token,
                    token.expiry_epoch_millis
                ],
            )?;
        }
        Ok(())
    }

    fn save_refreshed_token(
        &mut self,
        user_id: i64,
        provider: &str,
        refresh: &TokenRefresh,
    ) -> Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE oauth_tokens SET access_token = ?, refresh_token = COALESCE(?, refresh_token), expiry_date = ?, updated_at = CURRENT_TIMESTAMP
             WHERE user_id = ? AND provider = ?",
            params![
                refresh.access_token.expose_secret(),
                refresh.refresh_token.as_ref().map(|t| t.expose_secret()),
                refresh.expiry_epoch_millis,
                user_id,
                provider
            ],
        )?;

        if updated == 0 {
            warn!(user_id, provider, "刷新令牌时未找到对应的令牌记录");
        }
        Ok(())
    }

    fn delete_token(&mut self, user_id: i64, provider: &str) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM oauth_tokens WHERE user_id = ? AND provider = ?",
            params![user_id, provider],
        )?;
        Ok(())
    }
}

fn record_from_row(row: &Row<'_>) -> duckdb::Result<BackupRecord> {
    let size: Option<i64> = row.get(4)?;
    let status: String = row.get(5)?;
    let status = parse_status(5, &status)?;

    Ok(BackupRecord {
        id: row.get(0)?,
        backup_type: row.get(1)?,
        filename: row.get(2)?,
        filepath: row.get(3)?,
        size_bytes: size.and_then(|s| u64::try_from(s).ok()),
        status,
        error_message: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        remote_file_id: row.get(9)?,
        uploaded_to_remote: row.get(10)?,
        remote_upload_error: row.get(11)?,
    })
}

fn parse_status(column: usize, value: &str) -> duckdb::Result<BackupStatus> {
    value
        .parse()
        .map_err(|e: String| duckdb::Error::FromSqlConversionFailure(column, Type::Text, e.into()))
}

fn is_lock_conflict(err: &duckdb::Error) -> bool {
    err.to_string().contains("Could not set lock")
}

/// 跳过只有注释的片段
fn is_executable(statement: &str) -> bool {
    statement
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with("--"))
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
