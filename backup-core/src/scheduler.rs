//! 定时备份调度
//!
//! 同一时刻最多只有一个已安装的触发器。`reload()` 先停止旧触发器，
//! 再从设置表重新读取配置并按需安装新触发器，整个过程持有同一把锁。
//!
//! 停止触发器只取消之后的触发，已经开始的备份会执行到结束；
//! `stop()` 会等待这些备份完成。

use crate::backup::BackupManager;
use crate::config_manager::{ConfigManager, ScheduleType};
use crate::constants::cron::MINUTE_FIELDS_COUNT;
use crate::error::{BackupError, Result};
use crate::store::SettingsStore;
use ::cron::Schedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

/// 解析 cron 表达式
///
/// 5 段（分 时 日 月 周，周日为 0 或 7）按秒为 0 补齐；6/7 段按原样解析。
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let fields: Vec<&str> = expression.split_whitespace().collect();

    let normalized = if fields.len() == MINUTE_FIELDS_COUNT {
        format!(
            "0 {} {}",
            fields[..MINUTE_FIELDS_COUNT - 1].join(" "),
            day_of_week_field(fields[MINUTE_FIELDS_COUNT - 1])
        )
    } else {
        fields.join(" ")
    };

    Schedule::from_str(&normalized)
        .map_err(|e| BackupError::Cron(format!("{expression}: {e}")))
}

/// 把 0-7（周日为 0/7）的周字段换算为 1-7（周日为 1）
fn day_of_week_field(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = range
                .split('-')
                .map(|part| match part.parse::<u8>() {
                    Ok(day) => ((day % 7) + 1).to_string(),
                    Err(_) => part.to_string(),
                })
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// 定时触发时执行的备份
#[async_trait]
pub trait ScheduledRunner: Send + Sync {
    /// 返回本次是否全部成功；失败只记录日志
    async fn run_scheduled(&self, schedule_type: ScheduleType, user_id: i64) -> bool;
}

#[async_trait]
impl ScheduledRunner for BackupManager {
    async fn run_scheduled(&self, schedule_type: ScheduleType, user_id: i64) -> bool {
        let mut success = true;

        if schedule_type.runs_mysql() {
            match self.run_database_backups(user_id).await {
                Ok(result) if result.errors.is_empty() => {}
                Ok(result) => {
                    warn!("定时数据库备份部分失败: {} 个目标失败", result.errors.len());
                    success = false;
                }
                Err(e) => {
                    error!("定时数据库备份失败: {}", e);
                    success = false;
                }
            }
        }

        if schedule_type.runs_files() {
            match self.run_file_backups(user_id).await {
                Ok(result) if result.errors.is_empty() => {}
                Ok(result) => {
                    warn!("定时文件备份部分失败: {} 个目标失败", result.errors.len());
                    success = false;
                }
                Err(e) => {
                    error!("定时文件备份失败: {}", e);
                    success = false;
                }
            }
        }

        success
    }
}

struct InstalledTrigger {
    schedule: Schedule,
    /// 丢弃时取消后续触发
    cancel: DropGuard,
    handle: JoinHandle<()>,
}

impl InstalledTrigger {
    /// 取消后续触发，返回仍可能在执行备份的任务
    fn retire(self) -> JoinHandle<()> {
        let Self { cancel, handle, .. } = self;
        drop(cancel);
        handle
    }
}

/// 定时备份调度器
pub struct Scheduler {
    settings: Arc<dyn SettingsStore>,
    runner: Arc<dyn ScheduledRunner>,
    system_user_id: i64,
    installed: Mutex<Option<InstalledTrigger>>,
    /// 已停止但可能仍在执行备份的触发任务
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        runner: Arc<dyn ScheduledRunner>,
        system_user_id: i64,
    ) -> Self {
        Self {
            settings,
            runner,
            system_user_id,
            installed: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// 启动时加载配置
    pub async fn init(&self) -> Result<()> {
        info!("初始化定时备份");
        self.reload().await
    }

    /// 重新加载定时配置
    ///
    /// 表达式无效时只记录错误，不安装触发器。
    pub async fn reload(&self) -> Result<()> {
        let mut installed = self.installed.lock().await;
        if let Some(trigger) = installed.take() {
            let mut retired = self.retired.lock().await;
            retired.retain(|handle| !handle.is_finished());
            retired.push(trigger.retire());
            info!("已停止当前的定时备份任务");
        }

        let config = ConfigManager::new(self.settings.as_ref())
            .get_schedule_config()
            .await?;
        if !config.enabled {
            info!("定时备份未启用");
            return Ok(());
        }

        let schedule = match parse_schedule(&config.cron_expression) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!("定时备份表达式无效，未安装定时任务: {}", e);
                return Ok(());
            }
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(trigger_loop(
            schedule.clone(),
            config.schedule_type,
            self.runner.clone(),
            self.settings.clone(),
            self.system_user_id,
            cancel.clone(),
        ));
        *installed = Some(InstalledTrigger {
            schedule,
            cancel: cancel.drop_guard(),
            handle,
        });

        info!(
            "定时备份已启用: {} (类型: {})",
            config.cron_expression, config.schedule_type
        );
        Ok(())
    }

    /// 停止定时任务，并等待正在执行的定时备份结束
    pub async fn stop(&self) {
        let mut handles = std::mem::take(&mut *self.retired.lock().await);
        if let Some(trigger) = self.installed.lock().await.take() {
            handles.push(trigger.retire());
            info!("定时备份已停止");
        }

        for handle in handles {
            if !handle.is_finished() {
                info!("等待正在执行的定时备份完成");
            }
            if let Err(e) = handle.await {
                warn!("定时备份任务异常退出: {}", e);
            }
        }
    }

    /// 当前安装的触发器数量（0 或 1）
    pub async fn installed_count(&self) -> usize {
        usize::from(self.installed.lock().await.is_some())
    }

    /// 下一次触发时间
    pub async fn next_run(&self) -> Option<DateTime<Utc>> {
        self.installed
            .lock()
            .await
            .as_ref()
            .and_then(|trigger| trigger.schedule.upcoming(Utc).next())
    }
}

async fn trigger_loop(
    schedule: Schedule,
    schedule_type: ScheduleType,
    runner: Arc<dyn ScheduledRunner>,
    settings: Arc<dyn SettingsStore>,
    user_id: i64,
    cancel: CancellationToken,
) {
    // 每次执行后重新计算，错过的触发不补跑
    while let Some(next) = schedule.upcoming(Utc).next() {
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        // 开始后不再响应取消
        info!("定时备份开始 (类型: {})", schedule_type);
        let success = runner.run_scheduled(schedule_type, user_id).await;

        if let Err(e) = ConfigManager::new(settings.as_ref())
            .update_last_backup_time(Utc::now(), success)
            .await
        {
            warn!("记录定时备份执行时间失败: {}", e);
        }
    }
}
