use crate::app::CliApp;
use crate::utils::print_json;
use backup_core::config_manager::{ConfigManager, ScheduleType};
use backup_core::error::Result;
use backup_core::scheduler::Scheduler;
use std::sync::Arc;
use tracing::{error, info, instrument};

const RELOAD_HINT: &str = "如果 daemon 正在运行，请向其发送 SIGHUP 使配置生效";

/// 显示定时备份配置和最近执行情况
pub async fn show_schedule_status(app: &CliApp) -> Result<()> {
    let status = ConfigManager::new(&app.database)
        .get_auto_backup_status()
        .await?;

    info!(
        enabled = status.schedule.enabled,
        cron_expression = %status.schedule.cron_expression,
        schedule_type = %status.schedule.schedule_type,
        last_backup_at = ?status.last_backup_at,
        consecutive_failures = status.consecutive_failures,
        "当前定时备份配置"
    );
    print_json(&status)
}

/// 设置定时备份启用状态
#[instrument(skip(app))]
pub async fn set_schedule_enabled(app: &CliApp, enabled: bool) -> Result<()> {
    ConfigManager::new(&app.database)
        .set_auto_backup_enabled(enabled)
        .await?;
    info!("{}", RELOAD_HINT);
    Ok(())
}

/// 设置定时备份的 cron 表达式
#[instrument(skip(app))]
pub async fn configure_cron(app: &CliApp, expression: &str) -> Result<()> {
    ConfigManager::new(&app.database)
        .set_auto_backup_cron(expression)
        .await?;
    info!("{}", RELOAD_HINT);
    Ok(())
}

/// 设置定时备份类型
#[instrument(skip(app))]
pub async fn set_schedule_type(app: &CliApp, schedule_type: &str) -> Result<()> {
    let schedule_type: ScheduleType = schedule_type.parse()?;
    ConfigManager::new(&app.database)
        .set_auto_backup_type(schedule_type)
        .await?;
    info!("{}", RELOAD_HINT);
    Ok(())
}

/// 前台运行定时备份，直到收到 Ctrl-C
pub async fn run_daemon(app: &CliApp) -> Result<()> {
    let scheduler = Scheduler::new(
        Arc::new(app.database.clone()),
        app.backup_manager.clone(),
        app.config.scheduler.system_user_id,
    );
    scheduler.init().await?;
    log_next_run(&scheduler).await;

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = signal(SignalKind::hangup())?;
        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    info!("收到 SIGHUP，重新加载定时备份配置");
                    if let Err(e) = scheduler.reload().await {
                        error!("重新加载定时备份配置失败: {}", e);
                    }
                    log_next_run(&scheduler).await;
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("收到退出信号，停止定时备份");
    scheduler.stop().await;
    Ok(())
}

async fn log_next_run(scheduler: &Scheduler) {
    match scheduler.next_run().await {
        Some(next) => info!("下一次定时备份: {}", next.to_rfc3339()),
        None => info!("当前没有已安装的定时备份任务"),
    }
}
