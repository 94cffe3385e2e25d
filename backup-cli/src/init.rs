use backup_core::{config::AppConfig, constants::config, database::Database, error::Result};
use std::path::Path;
use tracing::{info, warn};

/// 生成配置文件模板、备份目录和数据库
pub async fn run_init(config_path: &Path, force: bool) -> Result<()> {
    info!("初始化备份工具");

    let db_path = config::get_database_path();
    if !force && config_path.exists() {
        warn!("配置文件已存在: {}", config_path.display());
        info!("如果要重新生成配置模板，请使用 --force 参数");
        return Ok(());
    }

    AppConfig::write_template(config_path)?;
    info!("已创建配置文件: {}", config_path.display());

    let config = AppConfig::load_from_file(config_path)?;
    let backup_dir = config.ensure_backup_dir()?;
    info!("已创建备份目录: {}", backup_dir.display());

    Database::connect(&db_path).await?;
    info!("已初始化数据库: {}", db_path.display());

    info!("初始化完成，接下来:");
    info!("  1. 编辑 {} 填写数据库账号、备份路径等", config_path.display());
    info!("  2. 运行 'backup-cli mysql' 或 'backup-cli files' 立即备份");
    info!("  3. 运行 'backup-cli schedule enable' 后启动 'backup-cli daemon' 定时备份");
    info!("  4. 可选：设置 GOOGLE_DRIVE_ENABLED=true 并运行 'backup-cli drive auth-url' 授权 Google Drive");

    Ok(())
}
