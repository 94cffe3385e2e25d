use crate::config::RemoteStorageConfig;
use crate::constants::remote_storage;
use crate::error::{BackupError, Result};
use chrono::Utc;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

/// 令牌端点的响应
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: SecretString,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// 绝对过期时间（毫秒）
    pub fn expiry_epoch_millis(&self) -> Option<i64> {
        self.expires_in
            .map(|secs| Utc::now().timestamp_millis() + secs * 1000)
    }
}

/// OAuth2 授权码流程客户端
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    revoke_url: String,
}

impl OAuthClient {
    /// 客户端 ID 或密钥缺失时返回 `NotConfigured`
    pub fn from_config(config: &RemoteStorageConfig, http: reqwest::Client) -> Result<Self> {
        let client_id = config
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BackupError::NotConfigured("缺少 GOOGLE_CLIENT_ID".to_string()))?;
        let client_secret = config
            .client_secret
            .clone()
            .filter(|s| !s.expose_secret().is_empty())
            .ok_or_else(|| BackupError::NotConfigured("缺少 GOOGLE_CLIENT_SECRET".to_string()))?;

        Ok(Self {
            http,
            client_id: client_id.to_string(),
            client_secret,
            redirect_uri: config.redirect_uri.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            revoke_url: config.revoke_url.clone(),
        })
    }

    /// 授权页面地址：最小文件权限，始终请求离线访问并强制重新授权，确保签发刷新令牌
    pub fn authorization_url(&self) -> Result<String> {
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", remote_storage::DRIVE_FILE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| BackupError::NotConfigured(format!("授权地址无效: {e}")))?;

        Ok(url.to_string())
    }

    /// 用一次性授权码换取访问令牌和刷新令牌
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        self.token_request(&form).await
    }

    /// 用刷新令牌换取新的访问令牌
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];

        self.token_request(&form).await.map_err(|e| match e {
            BackupError::NotAuthorized(_) => {
                BackupError::not_authorized("刷新令牌已失效，请重新授权")
            }
            other => other,
        })
    }

    /// 远程吊销令牌
    pub async fn revoke(&self, token: &SecretString) -> Result<()> {
        let response = self
            .http
            .post(&self.revoke_url)
            .form(&[("token", token.expose_secret())])
            .send()
            .await
            .map_err(|e| BackupError::transport(format!("吊销令牌请求失败: {e}")))?;

        if !response.status().is_success() {
            return Err(BackupError::transport(format!(
                "吊销令牌失败: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| BackupError::transport(format!("令牌请求失败: {e}")))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::not_authorized(format!("令牌端点拒绝请求: {body}")));
        }
        if !status.is_success() {
            return Err(BackupError::transport(format!("令牌端点返回 {status}")));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| BackupError::transport(format!("令牌响应解析失败: {e}")))
    }
}
