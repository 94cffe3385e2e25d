use crate::constants::{backup, config, cron, remote, remote_storage};
use crate::error::{BackupError, Result};
use crate::target::{Credentials, env_suffix, split_list};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 应用配置结构
///
/// 配置来源按优先级从低到高：内置默认值 -> TOML 配置文件 -> 环境变量。
/// 密码和客户端密钥使用 `SecretString` 保存，`Debug` 输出时自动脱敏。
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub mysql: MysqlConfig,
    pub files: FilesConfig,
    pub remote: RemoteHostConfig,
    pub remote_storage: RemoteStorageConfig,
    pub scheduler: SchedulerConfig,
}

/// 备份相关配置
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub storage_dir: String,
    /// 上传到远程存储成功后是否保留本地文件
    pub keep_local: bool,
    /// 单个目标的执行超时（秒），0 表示不限制
    pub command_timeout_secs: u64,
}

/// MySQL 转储配置
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    /// 逗号分隔的数据库列表
    pub databases: String,
    pub dump_path: String,
    /// 按数据库覆盖的凭据，键为数据库名的环境变量后缀（如 `SALES`）
    pub overrides: BTreeMap<String, CredentialOverride>,
}

/// 单个目标的凭据覆盖
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CredentialOverride {
    pub user: Option<String>,
    pub password: Option<SecretString>,
}

/// 文件系统备份配置
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilesConfig {
    /// 本地模式下逗号分隔的路径列表
    pub paths: String,
    /// 远程模式下逗号分隔的路径列表
    pub remote_paths: String,
    pub tar_path: String,
    /// 归档时排除的 glob 模式
    pub exclude: Vec<String>,
}

/// 远程主机（SSH）配置，三项齐全时启用远程采集
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteHostConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    /// 期望的主机公钥指纹，未配置时接受任意主机公钥
    pub host_key_fingerprint: Option<String>,
}

/// 远程存储（Google Drive）配置
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteStorageConfig {
    pub enabled: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub redirect_uri: String,
    /// 上传目标文件夹，未配置时上传到根目录
    pub folder_id: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub api_base: String,
}

/// 定时任务配置
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 定时任务以该系统账号身份执行
    pub system_user_id: i64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            storage_dir: backup::get_default_storage_dir()
                .to_string_lossy()
                .to_string(),
            keep_local: false,
            command_timeout_secs: backup::DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: backup::DEFAULT_MYSQL_PORT,
            user: None,
            password: None,
            databases: String::new(),
            dump_path: backup::DEFAULT_DUMP_TOOL.to_string(),
            overrides: BTreeMap::new(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            paths: backup::DEFAULT_LOCAL_PATHS.to_string(),
            remote_paths: backup::DEFAULT_REMOTE_PATHS.to_string(),
            tar_path: backup::DEFAULT_ARCHIVE_TOOL.to_string(),
            exclude: Vec::new(),
        }
    }
}

impl Default for RemoteHostConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: remote::DEFAULT_SSH_PORT,
            user: None,
            password: None,
            host_key_fingerprint: None,
        }
    }
}

impl Default for RemoteStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: None,
            client_secret: None,
            redirect_uri: remote_storage::DEFAULT_REDIRECT_URI.to_string(),
            folder_id: None,
            auth_url: remote_storage::DEFAULT_AUTH_URL.to_string(),
            token_url: remote_storage::DEFAULT_TOKEN_URL.to_string(),
            revoke_url: remote_storage::DEFAULT_REVOKE_URL.to_string(),
            api_base: remote_storage::DEFAULT_API_BASE.to_string(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            system_user_id: cron::DEFAULT_SYSTEM_USER_ID,
        }
    }
}

impl RemoteHostConfig {
    /// 主机、用户名、密码齐全时才启用远程采集
    pub fn is_enabled(&self) -> bool {
        non_empty(self.host.as_deref()).is_some()
            && non_empty(self.user.as_deref()).is_some()
            && self
                .password
                .as_ref()
                .is_some_and(|p| !p.expose_secret().is_empty())
    }

    /// 远程采集使用的传输凭据
    pub fn credentials(&self) -> Option<Credentials> {
        let user = non_empty(self.user.as_deref())?;
        let password = self.password.clone().unwrap_or_else(|| SecretString::from(String::new()));
        Some(Credentials::new(user, password))
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件，再叠加进程环境变量
    /// 按优先级查找：config.toml -> backup.toml -> .backup.toml
    pub fn find_and_load_config() -> Result<Self> {
        let mut config = Self::default();

        match config::CONFIG_FILE_CANDIDATES
            .iter()
            .find(|candidate| Path::new(candidate).exists())
        {
            Some(config_file) => {
                tracing::info!("找到配置文件: {}", config_file);
                config = Self::load_from_file(config_file)?;
            }
            None => {
                tracing::warn!("未找到配置文件，使用默认配置（可运行 init 生成 config.toml）");
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 从显式指定的文件加载配置，再叠加进程环境变量；文件不存在时报配置错误
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BackupError::configuration(format!(
                "配置文件不存在: {}",
                path.display()
            )));
        }

        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 写出带注释的配置模板
    pub fn write_template<P: AsRef<Path>>(path: P) -> Result<()> {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        fs::write(&path, TEMPLATE)?;
        Ok(())
    }

    /// 用扁平的环境变量覆盖配置
    ///
    /// `lookup` 通常是 `std::env::var`，测试中传入固定的映射。
    /// 数据库专属凭据（`DB_USER_<SUFFIX>` / `DB_PASSWORD_<SUFFIX>`）在数据库列表确定后查找。
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dbs) = get("BACKUP_DBS").or_else(|| get("DB_NAME")) {
            self.mysql.databases = dbs;
        }
        if let Some(host) = get("DB_HOST") {
            self.mysql.host = host;
        }
        if let Some(port) = get("DB_PORT").and_then(|p| p.trim().parse().ok()) {
            self.mysql.port = port;
        }
        if let Some(user) = get("BACKUP_USER").or_else(|| get("DB_USER")) {
            self.mysql.user = Some(user);
        }
        if let Some(password) = get("BACKUP_PASSWORD").or_else(|| get("DB_PASSWORD")) {
            self.mysql.password = Some(SecretString::from(password));
        }
        if let Some(dump_path) = get("MYSQL_DUMP_PATH") {
            self.mysql.dump_path = dump_path;
        }

        for name in split_list(&self.mysql.databases) {
            let suffix = env_suffix(&name);
            let user = get(&format!("DB_USER_{suffix}"));
            let password = get(&format!("DB_PASSWORD_{suffix}"));
            if user.is_none() && password.is_none() {
                continue;
            }

            let entry = self.mysql.overrides.entry(suffix).or_default();
            if let Some(user) = user {
                entry.user = Some(user);
            }
            if let Some(password) = password {
                entry.password = Some(SecretString::from(password));
            }
        }

        if let Some(paths) = get("FILES_BACKUP_PATH") {
            self.files.paths = paths;
        }
        if let Some(paths) = get("REMOTE_FILES_PATH") {
            self.files.remote_paths = paths;
        }
        if let Some(tar_path) = get("TAR_PATH") {
            self.files.tar_path = tar_path;
        }
        if let Some(exclude) = get("BACKUP_EXCLUDE") {
            self.files.exclude = split_list(&exclude);
        }

        if let Some(host) = get("REMOTE_HOST") {
            self.remote.host = Some(host);
        }
        if let Some(port) = get("REMOTE_PORT").and_then(|p| p.trim().parse().ok()) {
            self.remote.port = port;
        }
        if let Some(user) = get("REMOTE_USER") {
            self.remote.user = Some(user);
        }
        if let Some(password) = get("REMOTE_PASSWORD") {
            self.remote.password = Some(SecretString::from(password));
        }
        if let Some(fingerprint) = get("REMOTE_HOST_KEY_FINGERPRINT") {
            self.remote.host_key_fingerprint = Some(fingerprint);
        }

        if let Some(enabled) = get("GOOGLE_DRIVE_ENABLED") {
            self.remote_storage.enabled = enabled.trim() == "true";
        }
        if let Some(client_id) = get("GOOGLE_CLIENT_ID") {
            self.remote_storage.client_id = Some(client_id);
        }
        if let Some(secret) = get("GOOGLE_CLIENT_SECRET") {
            self.remote_storage.client_secret = Some(SecretString::from(secret));
        }
        if let Some(redirect_uri) = get("GOOGLE_REDIRECT_URI") {
            self.remote_storage.redirect_uri = redirect_uri;
        }
        if let Some(folder_id) = get("GOOGLE_DRIVE_FOLDER_ID") {
            self.remote_storage.folder_id = Some(folder_id);
        }

        if let Some(keep_local) = get("KEEP_LOCAL") {
            self.backup.keep_local = parse_flag(&keep_local);
        }
        if let Some(timeout) = get("BACKUP_COMMAND_TIMEOUT_SECS").and_then(|t| t.trim().parse().ok()) {
            self.backup.command_timeout_secs = timeout;
        }
        if let Some(user_id) = get("BACKUP_SYSTEM_USER_ID").and_then(|u| u.trim().parse().ok()) {
            self.scheduler.system_user_id = user_id;
        }
    }

    /// 解析数据库凭据：数据库专属覆盖 -> 全局默认，按字段逐项回退
    ///
    /// 没有任何可用用户名时返回 `None`。
    pub fn database_credentials(&self, database: &str) -> Option<Credentials> {
        let specific = self.mysql.overrides.get(&env_suffix(database));

        let user = specific
            .and_then(|o| non_empty(o.user.as_deref()))
            .or_else(|| non_empty(self.mysql.user.as_deref()))?;

        let password = specific
            .and_then(|o| o.password.clone())
            .or_else(|| self.mysql.password.clone())
            .unwrap_or_else(|| SecretString::from(String::new()));

        Some(Credentials::new(user, password))
    }

    /// 备份存储目录
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.storage_dir)
    }

    /// 确保备份存储目录存在
    pub fn ensure_backup_dir(&self) -> Result<PathBuf> {
        let dir = self.get_backup_dir();
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// 单个目标的执行超时
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.backup.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
