use crate::app::CliApp;
use crate::utils::{format_size, print_json};
use backup_core::backup::RunResult;
use backup_core::error::{BackupError, Result};
use tracing::{error, info, warn};

/// 立即备份所有配置的数据库
pub async fn run_mysql_backup(app: &CliApp) -> Result<()> {
    info!("💾 开始数据库备份");
    let result = app
        .backup_manager
        .run_database_backups(app.user_id())
        .await?;
    report(&result)
}

/// 立即备份所有配置的文件路径
pub async fn run_files_backup(app: &CliApp) -> Result<()> {
    info!("💾 开始文件备份");
    let result = app.backup_manager.run_file_backups(app.user_id()).await?;
    report(&result)
}

/// 输出运行结果，所有目标都失败时返回错误
fn report(result: &RunResult) -> Result<()> {
    for success in &result.results {
        info!(
            "✅ {} -> {} ({})",
            success.target,
            success.filename,
            format_size(success.size)
        );
        if let Some(upload_error) = &success.remote_upload_error {
            warn!("   上传 Google Drive 失败: {}", upload_error);
        }
    }
    for failure in &result.errors {
        error!("❌ {}: {}", failure.target, failure.error);
    }

    print_json(result)?;

    if !result.success {
        return Err(BackupError::custom("所有目标均备份失败"));
    }
    Ok(())
}

/// 分页输出备份历史
pub async fn show_history(app: &CliApp, page: u32, limit: u32) -> Result<()> {
    let history = app.backup_manager.history(page, limit).await?;
    info!(
        "第 {}/{} 页，共 {} 条记录",
        history.page,
        history.total_pages.max(1),
        history.total
    );
    print_json(&history)
}

/// 输出单条备份记录
pub async fn show_record(app: &CliApp, id: i64) -> Result<()> {
    match app.backup_manager.get_record(id).await? {
        Some(record) => print_json(&record),
        None => Err(BackupError::NotFound(format!("备份记录 {id}"))),
    }
}

/// 输出备份文件的本地路径，供下载或恢复使用
pub async fn locate_backup_file(app: &CliApp, id: i64) -> Result<()> {
    let path = app.backup_manager.locate_artifact(id).await?;
    println!("{}", path.display());
    Ok(())
}
