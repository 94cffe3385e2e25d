use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    /// 配置错误：目标列表为空、缺少凭据等，整个运行失败
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 单个目标的备份生产失败（工具退出码非零、远程流中断）
    #[error("{0}")]
    Producer(String),

    #[error("备份超时: {0}")]
    Timeout(String),

    #[error("远程存储未启用")]
    NotEnabled,

    #[error("远程存储未配置: {0}")]
    NotConfigured(String),

    #[error("远程存储未授权: {0}")]
    NotAuthorized(String),

    #[error("远程存储请求失败: {0}")]
    Transport(String),

    /// 备份记录或备份文件不存在
    #[error("未找到: {0}")]
    NotFound(String),

    #[error("DuckDB数据库错误: {0}")]
    Storage(String),

    #[error("配置文件解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("无效的cron表达式: {0}")]
    Cron(String),

    #[error("SSH 错误: {0}")]
    Ssh(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for BackupError {
    fn from(err: duckdb::Error) -> Self {
        BackupError::Storage(err.to_string())
    }
}

impl From<russh::Error> for BackupError {
    fn from(err: russh::Error) -> Self {
        BackupError::Ssh(err.to_string())
    }
}

impl From<cron::error::Error> for BackupError {
    fn from(err: cron::error::Error) -> Self {
        BackupError::Cron(err.to_string())
    }
}

impl BackupError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn producer(msg: impl Into<String>) -> Self {
        Self::Producer(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn not_authorized(msg: impl Into<String>) -> Self {
        Self::NotAuthorized(msg.into())
    }

    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// 远程存储服务端或授权相关的错误；其余上传错误来自本地处理
    pub fn is_remote_storage(&self) -> bool {
        matches!(
            self,
            Self::NotEnabled
                | Self::NotConfigured(_)
                | Self::NotAuthorized(_)
                | Self::Transport(_)
                | Self::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_storage_classification() {
        assert!(BackupError::NotEnabled.is_remote_storage());
        assert!(BackupError::not_authorized("google").is_remote_storage());
        assert!(BackupError::transport("503").is_remote_storage());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!BackupError::from(io).is_remote_storage());
        assert!(!BackupError::producer("tar failed").is_remote_storage());
    }
}
