use crate::app::CliApp;
use crate::utils::{format_size, print_json};
use backup_core::error::{BackupError, Result};
use backup_core::remote_storage::{RemoteStorage, StorageQuota};
use tracing::{info, warn};

/// 显示 Google Drive 连接状态
pub async fn show_drive_status(app: &CliApp) -> Result<()> {
    let status = app.drive.status(app.user_id()).await?;

    if !status.enabled {
        warn!("Google Drive 未启用（设置 GOOGLE_DRIVE_ENABLED=true）");
    } else if status.connected {
        info!("✅ Google Drive 已连接");
        if let Some(quota) = &status.quota {
            log_quota(quota);
        }
    } else if let Some(e) = &status.error {
        warn!("❌ Google Drive 连接失败: {}", e);
    } else {
        info!("Google Drive 尚未授权，运行 'backup-cli drive auth-url' 开始授权");
    }

    print_json(&status)
}

/// 输出授权页面地址
pub fn show_auth_url(app: &CliApp) -> Result<()> {
    let url = app.drive.authorization_url()?;
    info!("请在浏览器中打开以下地址完成授权，然后运行 'backup-cli drive authorize <code>'");
    println!("{url}");
    Ok(())
}

/// 使用授权码完成授权
pub async fn authorize_drive(app: &CliApp, code: &str) -> Result<()> {
    app.drive.complete_authorization(code, app.user_id()).await?;
    info!("✅ Google Drive 授权成功");
    Ok(())
}

/// 测试连接
pub async fn test_drive_connection(app: &CliApp) -> Result<()> {
    if !app.drive.is_enabled() {
        return Err(BackupError::NotEnabled);
    }

    let test = app.drive.test_connection(app.user_id()).await;
    print_json(&test)?;

    match (test.success, test.quota) {
        (true, Some(quota)) => {
            info!("✅ 连接正常");
            log_quota(&quota);
            Ok(())
        }
        (true, None) => Ok(()),
        (false, _) => Err(BackupError::transport(
            test.error.unwrap_or_else(|| "连接测试失败".to_string()),
        )),
    }
}

/// 断开 Google Drive
pub async fn disconnect_drive(app: &CliApp) -> Result<()> {
    app.drive.revoke(app.user_id()).await?;
    info!("✅ 已断开 Google Drive");
    Ok(())
}

/// 删除远程文件
pub async fn delete_drive_file(app: &CliApp, file_id: &str) -> Result<()> {
    app.drive.delete_file(file_id, app.user_id()).await?;
    info!("✅ 已删除远程文件: {}", file_id);
    Ok(())
}

fn log_quota(quota: &StorageQuota) {
    let limit = quota
        .limit
        .map(format_size)
        .unwrap_or_else(|| "不限".to_string());
    info!(
        "存储空间: 已用 {} / 总计 {}（回收站 {}）",
        format_size(quota.usage),
        limit,
        format_size(quota.usage_in_drive_trash)
    );
}
