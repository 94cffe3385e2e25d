use super::oauth::OAuthClient;
use super::{ConnectionTest, DriveStatus, RemoteFile, RemoteStorage, StorageQuota};
use crate::config::RemoteStorageConfig;
use crate::constants::remote_storage::{EXPIRY_SKEW_SECS, PROVIDER, UPLOAD_MIME_TYPE};
use crate::error::{BackupError, Result};
use crate::store::{OAuthToken, TokenRefresh, TokenStore};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// 当前激活的用户令牌
#[derive(Debug, Clone)]
struct Session {
    user_id: i64,
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    expiry_epoch_millis: Option<i64>,
}

impl Session {
    fn is_expired(&self, now_millis: i64) -> bool {
        self.expiry_epoch_millis
            .is_some_and(|expiry| expiry - EXPIRY_SKEW_SECS * 1000 <= now_millis)
    }
}

impl From<OAuthToken> for Session {
    fn from(token: OAuthToken) -> Self {
        Self {
            user_id: token.user_id,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry_epoch_millis: token.expiry_epoch_millis,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutResponse {
    #[serde(default)]
    storage_quota: RawQuota,
}

/// Drive 以字符串返回 int64
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuota {
    limit: Option<String>,
    usage: Option<String>,
    usage_in_drive: Option<String>,
    usage_in_drive_trash: Option<String>,
}

impl From<RawQuota> for StorageQuota {
    fn from(raw: RawQuota) -> Self {
        let parse = |v: Option<String>| v.and_then(|s| s.parse::<u64>().ok());
        Self {
            limit: parse(raw.limit),
            usage: parse(raw.usage).unwrap_or(0),
            usage_in_drive: parse(raw.usage_in_drive).unwrap_or(0),
            usage_in_drive_trash: parse(raw.usage_in_drive_trash).unwrap_or(0),
        }
    }
}

/// Google Drive 客户端
///
/// 持有一个激活的用户会话；令牌在过期前或被服务端拒绝时自动刷新，
/// 刷新结果在调用返回前写入令牌存储。
pub struct DriveClient {
    config: RemoteStorageConfig,
    http: reqwest::Client,
    oauth: Option<OAuthClient>,
    tokens: Arc<dyn TokenStore>,
    session: Mutex<Option<Session>>,
}

impl DriveClient {
    pub fn new(config: &RemoteStorageConfig, tokens: Arc<dyn TokenStore>) -> Self {
        let http = reqwest::Client::new();
        let oauth = match OAuthClient::from_config(config, http.clone()) {
            Ok(client) => Some(client),
            Err(e) => {
                if config.enabled {
                    warn!("Google Drive 已启用但未配置 OAuth 客户端: {}", e);
                }
                None
            }
        };

        Self {
            config: config.clone(),
            http,
            oauth,
            tokens,
            session: Mutex::new(None),
        }
    }

    fn oauth(&self) -> Result<&OAuthClient> {
        if !self.config.enabled {
            return Err(BackupError::NotEnabled);
        }
        self.oauth.as_ref().ok_or_else(|| {
            BackupError::NotConfigured("缺少 GOOGLE_CLIENT_ID 或 GOOGLE_CLIENT_SECRET".to_string())
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// 授权页面地址
    pub fn authorization_url(&self) -> Result<String> {
        self.oauth()?.authorization_url()
    }

    /// 用授权码换取令牌并保存
    pub async fn complete_authorization(&self, code: &str, user_id: i64) -> Result<()> {
        let oauth = self.oauth()?;
        let response = oauth.exchange_code(code.trim()).await?;

        if response.refresh_token.is_none() {
            warn!(user_id, "授权响应中没有刷新令牌，将保留已有的刷新令牌");
        }

        self.tokens
            .upsert_token(OAuthToken {
                user_id,
                provider: PROVIDER.to_string(),
                expiry_epoch_millis: response.expiry_epoch_millis(),
                access_token: response.access_token,
                refresh_token: response.refresh_token,
            })
            .await?;

        self.clear_session(user_id).await;
        info!(user_id, "OAuth 令牌已保存");
        Ok(())
    }

    /// 远程吊销（尽力而为）后删除本地令牌
    pub async fn revoke(&self, user_id: i64) -> Result<()> {
        if let Some(token) = self.tokens.get_token(user_id, PROVIDER).await? {
            match self.oauth() {
                Ok(oauth) => {
                    if let Err(e) = oauth.revoke(&token.access_token).await {
                        warn!(user_id, "远程吊销令牌失败，继续删除本地令牌: {}", e);
                    }
                }
                Err(e) => warn!(user_id, "跳过远程吊销: {}", e),
            }
        }

        self.tokens.delete_token(user_id, PROVIDER).await?;
        self.clear_session(user_id).await;
        info!(user_id, "OAuth 令牌已删除");
        Ok(())
    }

    /// 删除远程文件
    pub async fn delete_file(&self, file_id: &str, user_id: i64) -> Result<()> {
        self.oauth()?;
        let url = self.api_url(&format!("/drive/v3/files/{file_id}"));
        self.send_authorized(user_id, |token| self.http.delete(&url).bearer_auth(token))
            .await?;

        info!("已删除 Google Drive 文件: {}", file_id);
        Ok(())
    }

    /// 存储空间
    pub async fn quota(&self, user_id: i64) -> Result<StorageQuota> {
        self.oauth()?;
        let url = self.api_url("/drive/v3/about?fields=storageQuota");
        let response = self
            .send_authorized(user_id, |token| self.http.get(&url).bearer_auth(token))
            .await?;

        let about: AboutResponse = response
            .json()
            .await
            .map_err(|e| BackupError::transport(format!("存储空间响应解析失败: {e}")))?;
        Ok(about.storage_quota.into())
    }

    /// 不写入任何数据的连通性测试
    pub async fn test_connection(&self, user_id: i64) -> ConnectionTest {
        match self.quota(user_id).await {
            Ok(quota) => ConnectionTest {
                success: true,
                quota: Some(quota),
                error: None,
            },
            Err(e) => ConnectionTest {
                success: false,
                quota: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// 远程存储状态
    pub async fn status(&self, user_id: i64) -> Result<DriveStatus> {
        if !self.config.enabled {
            return Ok(DriveStatus {
                enabled: false,
                connected: false,
                quota: None,
                error: Some(BackupError::NotEnabled.to_string()),
            });
        }

        if !self.is_authorized(user_id).await? {
            return Ok(DriveStatus {
                enabled: true,
                connected: false,
                quota: None,
                error: None,
            });
        }

        let test = self.test_connection(user_id).await;
        Ok(DriveStatus {
            enabled: true,
            connected: test.success,
            quota: test.quota,
            error: test.error,
        })
    }

    async fn clear_session(&self, user_id: i64) {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|s| s.user_id == user_id) {
            *session = None;
        }
    }

    /// 取得用户的访问令牌，必要时从存储加载并刷新
    async fn access_token(&self, user_id: i64, force_refresh: bool) -> Result<SecretString> {
        let oauth = self.oauth()?;
        let mut guard = self.session.lock().await;

        let mut session = match guard.take() {
            Some(session) if session.user_id == user_id => session,
            _ => self
                .tokens
                .get_token(user_id, PROVIDER)
                .await?
                .map(Session::from)
                .ok_or_else(|| BackupError::not_authorized("未找到 OAuth 令牌，请先完成授权"))?,
        };

        if force_refresh || session.is_expired(Utc::now().timestamp_millis()) {
            let refresh_token = session
                .refresh_token
                .clone()
                .ok_or_else(|| BackupError::not_authorized("缺少刷新令牌，请重新授权"))?;

            debug!(user_id, "刷新 Google Drive 访问令牌");
            let response = oauth.refresh(&refresh_token).await?;
            let expiry = response.expiry_epoch_millis();

            // 先持久化再使用新令牌
            self.tokens
                .save_refreshed_token(
                    user_id,
                    PROVIDER,
                    TokenRefresh {
                        access_token: response.access_token.clone(),
                        refresh_token: response.refresh_token.clone(),
                        expiry_epoch_millis: expiry,
                    },
                )
                .await?;

            session.access_token = response.access_token;
            if let Some(refresh_token) = response.refresh_token {
                session.refresh_token = Some(refresh_token);
            }
            session.expiry_epoch_millis = expiry;
            info!(user_id, "Google Drive 访问令牌已刷新");
        }

        let token = session.access_token.clone();
        *guard = Some(session);
        Ok(token)
    }

    /// 带令牌发送请求；返回 401 时强制刷新后重试一次
    async fn send_authorized<F>(&self, user_id: i64, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.access_token(user_id, false).await?;
        let response = build(token.expose_secret())
            .send()
            .await
            .map_err(|e| BackupError::transport(format!("Google Drive 请求失败: {e}")))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return check_response(response).await;
        }

        debug!(user_id, "访问令牌被拒绝，刷新后重试");
        let token = self.access_token(user_id, true).await?;
        let response = build(token.expose_secret())
            .send()
            .await
            .map_err(|e| BackupError::transport(format!("Google Drive 请求失败: {e}")))?;
        check_response(response).await
    }
}

#[async_trait]
impl RemoteStorage for DriveClient {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn is_authorized(&self, user_id: i64) -> Result<bool> {
        Ok(self.tokens.get_token(user_id, PROVIDER).await?.is_some())
    }

    async fn upload(&self, local_path: &Path, filename: &str, user_id: i64) -> Result<RemoteFile> {
        self.oauth()?;
        let file_size = tokio::fs::metadata(local_path).await?.len();

        let parents: Vec<&str> = self
            .config
            .folder_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .into_iter()
            .collect();
        let metadata = serde_json::json!({ "name": filename, "parents": parents });

        // 建立可续传上传会话
        let init_url =
            self.api_url("/upload/drive/v3/files?uploadType=resumable&fields=id,name,size,webViewLink");
        let response = self
            .send_authorized(user_id, |token| {
                self.http
                    .post(&init_url)
                    .bearer_auth(token)
                    .header("X-Upload-Content-Type", UPLOAD_MIME_TYPE)
                    .header("X-Upload-Content-Length", file_size)
                    .json(&metadata)
            })
            .await?;

        let session_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| BackupError::transport("上传会话响应缺少 Location"))?
            .to_string();

        // 文件内容以流的形式发送，不整体读入内存
        let token = self.access_token(user_id, false).await?;
        let file = tokio::fs::File::open(local_path).await?;
        let response = self
            .http
            .put(&session_url)
            .bearer_auth(token.expose_secret())
            .header(CONTENT_TYPE, UPLOAD_MIME_TYPE)
            .header(CONTENT_LENGTH, file_size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| BackupError::transport(format!("上传文件失败: {e}")))?;

        let remote: RemoteFile = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| BackupError::transport(format!("上传响应解析失败: {e}")))?;

        info!(file_id = %remote.id, "文件已上传到 Google Drive: {}", filename);
        Ok(remote)
    }
}

async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(BackupError::not_authorized(format!(
            "Google Drive 拒绝了访问令牌: {body}"
        )));
    }
    Err(BackupError::transport(format!(
        "Google Drive 返回 {status}: {body}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use serde_json::json;
    use wiremock::matchers::{body_string, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER: i64 = 42;

    fn config(server: &MockServer) -> RemoteStorageConfig {
        RemoteStorageConfig {
            enabled: true,
            client_id: Some("client-123".to_string()),
            client_secret: Some(SecretString::from("shh".to_string())),
            folder_id: Some("folder-1".to_string()),
            token_url: format!("{}/token", server.uri()),
            revoke_url: format!("{}/revoke", server.uri()),
            api_base: server.uri(),
            ..RemoteStorageConfig::default()
        }
    }

    async fn store_token(db: &Database, access: &str, expiry: i64) {
        db.upsert_token(OAuthToken {
            user_id: USER,
            provider: PROVIDER.to_string(),
            access_token: SecretString::from(access.to_string()),
            refresh_token: Some(SecretString::from("refresh-1".to_string())),
            expiry_epoch_millis: Some(expiry),
        })
        .await
        .unwrap();
    }

    fn far_future() -> i64 {
        Utc::now().timestamp_millis() + 3_600_000
    }

    async fn client(server: &MockServer) -> (DriveClient, Database) {
        let db = Database::connect_memory().await.unwrap();
        let client = DriveClient::new(&config(server), Arc::new(db.clone()));
        (client, db)
    }

    #[tokio::test]
    async fn test_complete_authorization_stores_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=one-time-code"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, db) = client(&server).await;
        assert!(!client.is_authorized(USER).await.unwrap());

        client
            .complete_authorization("one-time-code", USER)
            .await
            .unwrap();

        assert!(client.is_authorized(USER).await.unwrap());
        let stored = db.get_token(USER, PROVIDER).await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose_secret(), "access-1");
        assert_eq!(stored.refresh_token.unwrap().expose_secret(), "refresh-1");
        assert!(stored.expiry_epoch_millis.unwrap() > Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn test_upload_refreshes_expired_token_and_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(header("authorization", "Bearer access-2"))
            .and(body_string_contains("folder-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Location", format!("{}/upload-session/abc", server.uri()).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-session/abc"))
            .and(body_string("dump contents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "file-1",
                "name": "mysql_backup_sales.sql",
                "size": "13"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, db) = client(&server).await;
        store_token(&db, "access-1", Utc::now().timestamp_millis() - 1_000).await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("mysql_backup_sales.sql");
        std::fs::write(&local, "dump contents").unwrap();

        let remote = client
            .upload(&local, "mysql_backup_sales.sql", USER)
            .await
            .unwrap();
        assert_eq!(remote.id, "file-1");

        let stored = db.get_token(USER, PROVIDER).await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose_secret(), "access-2");
        assert_eq!(stored.refresh_token.unwrap().expose_secret(), "refresh-1");
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_and_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/about"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh",
                "refresh_token": "refresh-2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/about"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "storageQuota": {
                    "limit": "1000",
                    "usage": "250",
                    "usageInDrive": "200",
                    "usageInDriveTrash": "50"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, db) = client(&server).await;
        store_token(&db, "stale", far_future()).await;

        let quota = client.quota(USER).await.unwrap();
        assert_eq!(
            quota,
            StorageQuota {
                limit: Some(1000),
                usage: 250,
                usage_in_drive: 200,
                usage_in_drive_trash: 50,
            }
        );

        let stored = db.get_token(USER, PROVIDER).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.unwrap().expose_secret(), "refresh-2");
    }

    #[tokio::test]
    async fn test_upload_without_token_is_not_authorized() {
        let server = MockServer::start().await;
        let (client, _db) = client(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.sql");
        std::fs::write(&local, "x").unwrap();

        let err = client.upload(&local, "a.sql", USER).await.unwrap_err();
        assert!(matches!(err, BackupError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_disabled_and_unconfigured() {
        let server = MockServer::start().await;
        let db = Database::connect_memory().await.unwrap();

        let mut disabled = config(&server);
        disabled.enabled = false;
        let client = DriveClient::new(&disabled, Arc::new(db.clone()));
        assert!(!client.is_enabled());
        assert!(matches!(
            client.authorization_url().unwrap_err(),
            BackupError::NotEnabled
        ));
        let status = client.status(USER).await.unwrap();
        assert!(!status.enabled);
        assert!(!status.connected);

        let mut unconfigured = config(&server);
        unconfigured.client_secret = None;
        let client = DriveClient::new(&unconfigured, Arc::new(db));
        assert!(matches!(
            client.quota(USER).await.unwrap_err(),
            BackupError::NotConfigured(_)
        ));
    }

    #[tokio::test]
    async fn test_revoke_deletes_token_even_if_remote_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let (client, db) = client(&server).await;
        store_token(&db, "access-1", far_future()).await;

        client.revoke(USER).await.unwrap();
        assert!(!client.is_authorized(USER).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_reports_provider_failure_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/about"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
            .mount(&server)
            .await;

        let (client, db) = client(&server).await;

        let status = client.status(USER).await.unwrap();
        assert!(status.enabled);
        assert!(!status.connected);
        assert!(status.error.is_none());

        store_token(&db, "access-1", far_future()).await;
        let status = client.status(USER).await.unwrap();
        assert!(!status.connected);
        assert!(status.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/file-1"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (client, db) = client(&server).await;
        store_token(&db, "access-1", far_future()).await;

        client.delete_file("file-1", USER).await.unwrap();
    }

    #[test]
    fn test_quota_without_limit_is_unlimited() {
        let quota: StorageQuota = RawQuota {
            usage: Some("10".to_string()),
            ..RawQuota::default()
        }
        .into();
        assert_eq!(quota.limit, None);
        assert_eq!(quota.usage, 10);
    }
}
