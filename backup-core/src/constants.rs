/// 配置文件相关常量
pub mod config {
    use std::path::{Path, PathBuf};

    /// 按优先级查找的配置文件名
    pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["config.toml", "backup.toml", ".backup.toml"];

    /// 默认配置文件名
    pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

    /// 数据库文件名
    pub const DATABASE_FILE_NAME: &str = "history.db";

    /// 获取默认数据库路径（跨平台）
    pub fn get_database_path() -> PathBuf {
        Path::new(".").join(DATABASE_FILE_NAME)
    }

    /// 获取默认配置文件路径
    pub fn get_config_file_path() -> PathBuf {
        Path::new(".").join(DEFAULT_CONFIG_FILE)
    }
}

/// 数据库文件访问
pub mod database {
    /// 数据库文件被其他进程锁定时的重试次数
    pub const LOCK_RETRY_ATTEMPTS: u32 = 50;

    /// 重试间隔（毫秒）
    pub const LOCK_RETRY_INTERVAL_MS: u64 = 100;
}

/// 备份相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 备份目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// MySQL 备份文件前缀
    pub const MYSQL_PREFIX: &str = "mysql_backup_";

    /// 文件系统备份文件前缀
    pub const FILES_PREFIX: &str = "file_backup_";

    /// 默认转储工具
    pub const DEFAULT_DUMP_TOOL: &str = "mysqldump";

    /// 默认归档工具
    pub const DEFAULT_ARCHIVE_TOOL: &str = "tar";

    /// 本地文件备份默认路径
    pub const DEFAULT_LOCAL_PATHS: &str = "/www";

    /// 远程文件备份默认路径
    pub const DEFAULT_REMOTE_PATHS: &str = "/var/www";

    /// 默认 MySQL 端口
    pub const DEFAULT_MYSQL_PORT: u16 = 3306;

    /// 单个目标的默认执行超时（秒）
    pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 2 * 60 * 60;

    /// tar 在剥离绝对路径前导 `/` 时输出的提示，属于正常情况
    pub const BENIGN_TAR_WARNING: &str = "Removing leading";

    /// 获取默认备份存储目录（用于配置）
    pub fn get_default_storage_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }
}

/// 远程主机（SSH）相关常量
pub mod remote {
    /// 默认 SSH 端口
    pub const DEFAULT_SSH_PORT: u16 = 22;

    /// SSH 扩展数据流编号：stderr
    pub const SSH_EXTENDED_DATA_STDERR: u32 = 1;
}

/// 远程存储（Google Drive）相关常量
pub mod remote_storage {
    /// 令牌表中的提供方标识
    pub const PROVIDER: &str = "google";

    /// 最小权限：仅访问本应用创建的文件
    pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

    pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
    pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
    pub const DEFAULT_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
    pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";

    /// 默认 OAuth 回调地址
    pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3101/api/oauth/google/callback";

    /// 访问令牌在到期前多少秒即视为过期并刷新
    pub const EXPIRY_SKEW_SECS: i64 = 60;

    /// 上传文件的 MIME 类型
    pub const UPLOAD_MIME_TYPE: &str = "application/octet-stream";
}

/// 定时任务相关常量
pub mod cron {
    /// 默认 cron 表达式：每天凌晨3点
    pub const DEFAULT_CRON_EXPRESSION: &str = "0 3 * * *";

    /// 默认备份类型
    pub const DEFAULT_SCHEDULE_TYPE: &str = "both";

    /// 分钟起始的标准 cron 字段数
    pub const MINUTE_FIELDS_COUNT: usize = 5;

    /// 定时任务使用的系统账号ID
    pub const DEFAULT_SYSTEM_USER_ID: i64 = 1;
}

/// 设置表中的键
pub mod settings {
    pub const AUTO_BACKUP_PREFIX: &str = "auto_backup";
    pub const AUTO_BACKUP_ENABLED: &str = "auto_backup_enabled";
    pub const AUTO_BACKUP_CRON: &str = "auto_backup_cron";
    pub const AUTO_BACKUP_TYPE: &str = "auto_backup_type";
    pub const AUTO_BACKUP_LAST_RUN: &str = "auto_backup_last_backup_at";
    pub const AUTO_BACKUP_FAILURES: &str = "auto_backup_consecutive_failures";
}

/// 历史记录分页
pub mod history {
    pub const DEFAULT_PAGE: u32 = 1;
    pub const DEFAULT_LIMIT: u32 = 10;
}
