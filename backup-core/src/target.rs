use crate::config::AppConfig;
use crate::error::{BackupError, Result};
use secrecy::SecretString;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// 备份目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Database,
    FilesystemPath,
}

impl TargetKind {
    /// 历史记录中的备份类型
    pub fn backup_type(&self) -> &'static str {
        match self {
            TargetKind::Database => "mysql",
            TargetKind::FilesystemPath => "files",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.backup_type())
    }
}

/// 凭据：用户名 + 密钥
///
/// 密钥只在生产者构建命令环境或建立会话时暴露，`Debug` 输出会脱敏。
#[derive(Debug, Clone)]
pub struct Credentials {
    principal: String,
    secret: SecretString,
}

impl Credentials {
    pub fn new(principal: impl Into<String>, secret: SecretString) -> Self {
        Self {
            principal: principal.into(),
            secret,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }
}

/// 一次运行中的单个备份目标，不持久化
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub kind: TargetKind,
    /// 数据库名，或路径的文件名部分（已规范化为文件名安全的形式）
    pub name: String,
    /// 数据库名或完整路径
    pub source_location: String,
    pub credentials: Option<Credentials>,
}

impl BackupTarget {
    /// 用于互斥锁的目标键
    pub fn lock_key(&self) -> String {
        format!("{}:{}", self.kind, self.source_location)
    }

    /// 结果与日志中展示的目标名
    pub fn display_name(&self) -> &str {
        match self.kind {
            TargetKind::Database => &self.name,
            TargetKind::FilesystemPath => &self.source_location,
        }
    }
}

/// 目标解析器：把配置展开为有序的备份目标列表
pub struct TargetResolver<'a> {
    config: &'a AppConfig,
}

impl<'a> TargetResolver<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self { config }
    }

    /// 解析数据库目标，每个数据库按覆盖链解析凭据
    pub fn resolve_databases(&self) -> Result<Vec<BackupTarget>> {
        let names = split_list(&self.config.mysql.databases);
        if names.is_empty() {
            return Err(BackupError::configuration(
                "未配置需要备份的数据库（BACKUP_DBS 或 DB_NAME）",
            ));
        }

        names
            .into_iter()
            .map(|name| {
                let credentials = self.config.database_credentials(&name).ok_or_else(|| {
                    BackupError::configuration(format!(
                        "数据库 {name} 缺少备份账号（DB_USER_{} 或 BACKUP_USER）",
                        env_suffix(&name)
                    ))
                })?;

                Ok(BackupTarget {
                    kind: TargetKind::Database,
                    source_location: name.clone(),
                    name,
                    credentials: Some(credentials),
                })
            })
            .collect()
    }

    /// 解析文件系统目标
    ///
    /// `remote` 为真时使用远程路径列表，并附带远程主机的传输凭据。
    pub fn resolve_paths(&self, remote: bool) -> Result<Vec<BackupTarget>> {
        let source = if remote {
            &self.config.files.remote_paths
        } else {
            &self.config.files.paths
        };

        let paths = split_list(source);
        if paths.is_empty() {
            return Err(BackupError::configuration("未配置需要备份的路径"));
        }

        let credentials = if remote {
            Some(self.config.remote.credentials().ok_or_else(|| {
                BackupError::configuration("远程采集缺少 REMOTE_USER")
            })?)
        } else {
            None
        };

        Ok(paths
            .into_iter()
            .map(|path| BackupTarget {
                kind: TargetKind::FilesystemPath,
                name: path_name(&path),
                source_location: path,
                credentials: credentials.clone(),
            })
            .collect())
    }
}

/// 名称对应的环境变量后缀：转大写，非字母数字替换为 `_`
pub fn env_suffix(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// 拆分逗号分隔的列表，去掉空白项
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// 路径最后一段，非字母数字替换为 `_`
pub fn path_name(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let base = Path::new(normalized.trim_end_matches('/'))
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if base.is_empty() {
        return "root".to_string();
    }

    base.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| vars.get(key).cloned());
        config
    }

    #[test]
    fn test_env_suffix() {
        assert_eq!(env_suffix("sales"), "SALES");
        assert_eq!(env_suffix("shop-db.v2"), "SHOP_DB_V2");
    }

    #[test]
    fn test_split_list_drops_blank_items() {
        assert_eq!(split_list(" a, ,b ,,"), vec!["a", "b"]);
        assert!(split_list("  ").is_empty());
    }

    #[test]
    fn test_path_name() {
        assert_eq!(path_name("/var/www"), "www");
        assert_eq!(path_name("/srv/my-site/"), "my_site");
        assert_eq!(path_name("C:\\data\\app.v1"), "app_v1");
        assert_eq!(path_name("/"), "root");
    }

    #[test]
    fn test_database_target_uses_specific_credentials() {
        let config = config_with(&[
            ("BACKUP_DBS", "sales, crm"),
            ("BACKUP_USER", "backup"),
            ("BACKUP_PASSWORD", "global"),
            ("DB_USER_SALES", "sales_reader"),
        ]);

        let targets = TargetResolver::new(&config).resolve_databases().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "sales");
        assert_eq!(targets[0].kind, TargetKind::Database);

        let sales = targets[0].credentials.as_ref().unwrap();
        assert_eq!(sales.principal(), "sales_reader");
        assert_eq!(sales.secret().expose_secret(), "global");

        let crm = targets[1].credentials.as_ref().unwrap();
        assert_eq!(crm.principal(), "backup");
    }

    #[test]
    fn test_empty_database_list_is_configuration_error() {
        let config = config_with(&[("BACKUP_USER", "backup")]);
        let err = TargetResolver::new(&config).resolve_databases().unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }

    #[test]
    fn test_missing_database_user_is_configuration_error() {
        let config = config_with(&[("BACKUP_DBS", "sales")]);
        let err = TargetResolver::new(&config).resolve_databases().unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }

    #[test]
    fn test_resolve_local_and_remote_paths() {
        let config = config_with(&[
            ("FILES_BACKUP_PATH", "/www/site-a,/etc/nginx"),
            ("REMOTE_FILES_PATH", "/var/www"),
            ("REMOTE_HOST", "10.0.0.2"),
            ("REMOTE_USER", "deploy"),
            ("REMOTE_PASSWORD", "pw"),
        ]);
        let resolver = TargetResolver::new(&config);

        let local = resolver.resolve_paths(false).unwrap();
        assert_eq!(local.len(), 2);
        assert_eq!(local[0].name, "site_a");
        assert_eq!(local[0].source_location, "/www/site-a");
        assert!(local[0].credentials.is_none());

        let remote = resolver.resolve_paths(true).unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].name, "www");
        assert_eq!(
            remote[0].credentials.as_ref().unwrap().principal(),
            "deploy"
        );
    }

    #[test]
    fn test_empty_path_list_is_configuration_error() {
        let config = config_with(&[("FILES_BACKUP_PATH", " , ")]);
        let err = TargetResolver::new(&config).resolve_paths(false).unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }
}
