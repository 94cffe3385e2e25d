use backup_core::{
    backup::BackupManager, config::AppConfig, constants::config, database::Database,
    error::Result, remote_storage::DriveClient,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{Commands, DriveCommand, ScheduleCommand};
use crate::commands;
use tracing::debug;

pub struct CliApp {
    pub config: AppConfig,
    pub database: Database,
    pub backup_manager: Arc<BackupManager>,
    pub drive: Arc<DriveClient>,
    config_path: PathBuf,
    user_id: Option<i64>,
}

impl CliApp {
    /// 加载配置并初始化各组件
    ///
    /// 显式指定的配置文件必须存在；未指定时按候选文件名查找，找不到则使用默认配置。
    pub async fn new(config_path: Option<&Path>, user_id: Option<i64>) -> Result<Self> {
        let config = match config_path {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::find_and_load_config()?,
        };

        let db_path = config::get_database_path();
        debug!("打开数据库: {}", db_path.display());
        let database = Database::connect(&db_path).await?;

        let drive = Arc::new(DriveClient::new(
            &config.remote_storage,
            Arc::new(database.clone()),
        ));
        let backup_manager = Arc::new(
            BackupManager::new(config.clone(), Arc::new(database.clone()))
                .with_remote_storage(drive.clone()),
        );

        Ok(Self {
            config,
            database,
            backup_manager,
            drive,
            config_path: config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(config::get_config_file_path),
            user_id,
        })
    }

    /// 命令执行身份：命令行指定的用户，否则为系统账号
    pub fn user_id(&self) -> i64 {
        self.user_id.unwrap_or(self.config.scheduler.system_user_id)
    }

    /// 运行应用命令
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { force } => crate::init::run_init(&self.config_path, force).await,
            Commands::Mysql => commands::run_mysql_backup(self).await,
            Commands::Files => commands::run_files_backup(self).await,
            Commands::History { page, limit } => commands::show_history(self, page, limit).await,
            Commands::Show { id } => commands::show_record(self, id).await,
            Commands::Locate { id } => commands::locate_backup_file(self, id).await,
            Commands::Schedule(cmd) => self.run_schedule_command(cmd).await,
            Commands::Daemon => commands::run_daemon(self).await,
            Commands::Drive(cmd) => self.run_drive_command(cmd).await,
        }
    }

    async fn run_schedule_command(&self, cmd: ScheduleCommand) -> Result<()> {
        match cmd {
            ScheduleCommand::Status => commands::show_schedule_status(self).await,
            ScheduleCommand::Enable => commands::set_schedule_enabled(self, true).await,
            ScheduleCommand::Disable => commands::set_schedule_enabled(self, false).await,
            ScheduleCommand::Cron { expression } => {
                commands::configure_cron(self, &expression).await
            }
            ScheduleCommand::Type { schedule_type } => {
                commands::set_schedule_type(self, &schedule_type).await
            }
        }
    }

    async fn run_drive_command(&self, cmd: DriveCommand) -> Result<()> {
        match cmd {
            DriveCommand::Status => commands::show_drive_status(self).await,
            DriveCommand::AuthUrl => commands::show_auth_url(self),
            DriveCommand::Authorize { code } => commands::authorize_drive(self, &code).await,
            DriveCommand::Test => commands::test_drive_connection(self).await,
            DriveCommand::Disconnect => commands::disconnect_drive(self).await,
            DriveCommand::Delete { file_id } => commands::delete_drive_file(self, &file_id).await,
        }
    }
}
