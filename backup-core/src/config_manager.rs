use crate::constants::{cron, settings};
use crate::error::{BackupError, Result};
use crate::scheduler::parse_schedule;
use crate::store::SettingsStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 定时备份的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Mysql,
    Files,
    Both,
}

impl ScheduleType {
    pub fn runs_mysql(&self) -> bool {
        matches!(self, ScheduleType::Mysql | ScheduleType::Both)
    }

    pub fn runs_files(&self) -> bool {
        matches!(self, ScheduleType::Files | ScheduleType::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Mysql => "mysql",
            ScheduleType::Files => "files",
            ScheduleType::Both => "both",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "mysql" => Ok(ScheduleType::Mysql),
            "files" => Ok(ScheduleType::Files),
            "both" => Ok(ScheduleType::Both),
            other => Err(BackupError::configuration(format!(
                "未知的备份类型: {other}（可选 mysql、files、both）"
            ))),
        }
    }
}

/// 定时备份配置，每次 reload 都从设置表重新读取
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub cron_expression: String,
    pub schedule_type: ScheduleType,
}

/// 定时备份状态：配置 + 最近执行情况
#[derive(Debug, Clone, Serialize)]
pub struct AutoBackupStatus {
    #[serde(flatten)]
    pub schedule: ScheduleConfig,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// 配置管理器：基于设置表读写定时备份配置
pub struct ConfigManager<'a> {
    store: &'a dyn SettingsStore,
}

impl<'a> ConfigManager<'a> {
    pub fn new(store: &'a dyn SettingsStore) -> Self {
        Self { store }
    }

    /// 获取定时备份配置
    ///
    /// 只有值为 `true` 时才视为启用；未知的备份类型按 `both` 处理。
    pub async fn get_schedule_config(&self) -> Result<ScheduleConfig> {
        let values = self.store.get_settings(settings::AUTO_BACKUP_PREFIX).await?;

        let enabled = values
            .get(settings::AUTO_BACKUP_ENABLED)
            .is_some_and(|v| v == "true");

        let cron_expression = values
            .get(settings::AUTO_BACKUP_CRON)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(cron::DEFAULT_CRON_EXPRESSION)
            .to_string();

        let schedule_type = match values.get(settings::AUTO_BACKUP_TYPE) {
            None => ScheduleType::Both,
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("{}，按 {} 处理", e, cron::DEFAULT_SCHEDULE_TYPE);
                ScheduleType::Both
            }),
        };

        Ok(ScheduleConfig {
            enabled,
            cron_expression,
            schedule_type,
        })
    }

    /// 获取定时备份状态
    pub async fn get_auto_backup_status(&self) -> Result<AutoBackupStatus> {
        let schedule = self.get_schedule_config().await?;
        let values = self.store.get_settings(settings::AUTO_BACKUP_PREFIX).await?;

        let last_backup_at = values.get(settings::AUTO_BACKUP_LAST_RUN).and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        });

        let consecutive_failures = values
            .get(settings::AUTO_BACKUP_FAILURES)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        Ok(AutoBackupStatus {
            schedule,
            last_backup_at,
            consecutive_failures,
        })
    }

    /// 更新定时备份启用状态
    pub async fn set_auto_backup_enabled(&self, enabled: bool) -> Result<()> {
        self.store
            .set_setting(settings::AUTO_BACKUP_ENABLED, &enabled.to_string())
            .await?;
        tracing::info!("定时备份启用状态已更新: {}", enabled);
        Ok(())
    }

    /// 更新定时备份cron表达式，写入前校验
    pub async fn set_auto_backup_cron(&self, cron_expression: &str) -> Result<()> {
        let cron_expression = cron_expression.trim();
        parse_schedule(cron_expression)?;

        self.store
            .set_setting(settings::AUTO_BACKUP_CRON, cron_expression)
            .await?;
        tracing::info!("定时备份cron表达式已更新: {}", cron_expression);
        Ok(())
    }

    /// 更新定时备份类型
    pub async fn set_auto_backup_type(&self, schedule_type: ScheduleType) -> Result<()> {
        self.store
            .set_setting(settings::AUTO_BACKUP_TYPE, schedule_type.as_str())
            .await?;
        tracing::info!("定时备份类型已更新: {}", schedule_type);
        Ok(())
    }

    /// 记录定时备份执行时间，成功时清零连续失败次数
    pub async fn update_last_backup_time(
        &self,
        backup_time: DateTime<Utc>,
        success: bool,
    ) -> Result<()> {
        self.store
            .set_setting(settings::AUTO_BACKUP_LAST_RUN, &backup_time.to_rfc3339())
            .await?;

        let failures = if success {
            0
        } else {
            self.get_auto_backup_status().await?.consecutive_failures + 1
        };
        self.store
            .set_setting(settings::AUTO_BACKUP_FAILURES, &failures.to_string())
            .await?;

        if failures > 0 {
            tracing::warn!("定时备份已连续失败 {} 次", failures);
        }
        Ok(())
    }
}
