use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 定时备份相关命令
#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// 显示当前定时备份配置和最近执行情况
    Status,
    /// 启用定时备份
    Enable,
    /// 禁用定时备份
    Disable,
    /// 设置定时备份的 cron 表达式
    Cron {
        #[arg(help = "cron 表达式，例如 '0 3 * * *' 表示每天凌晨3点")]
        expression: String,
    },
    /// 设置定时备份的类型
    Type {
        #[arg(help = "mysql、files 或 both")]
        schedule_type: String,
    },
}

/// Google Drive 相关命令
#[derive(Subcommand, Debug)]
pub enum DriveCommand {
    /// 显示连接状态和存储空间
    Status,
    /// 输出授权页面地址
    AuthUrl,
    /// 使用授权页面返回的授权码完成授权
    Authorize {
        /// 一次性授权码
        code: String,
    },
    /// 测试连接（只读取存储空间，不写入数据）
    Test,
    /// 吊销授权并删除本地令牌
    Disconnect,
    /// 删除 Google Drive 上的文件
    Delete {
        /// 远程文件ID
        file_id: String,
    },
}

/// 服务器备份编排工具：MySQL 转储、文件归档、Google Drive 同步与定时备份
#[derive(Parser, Debug)]
#[command(name = "backup-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// 配置文件路径（未指定时依次查找 config.toml、backup.toml、.backup.toml）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    /// 以该用户身份执行（默认使用配置中的系统账号）
    #[arg(long, global = true)]
    pub user_id: Option<i64>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// `init` 写入和提示使用的配置文件路径
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(backup_core::constants::config::get_config_file_path)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成配置文件模板并初始化数据库
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 立即备份所有配置的数据库
    Mysql,
    /// 立即备份所有配置的文件路径
    Files,
    /// 分页查看备份历史
    History {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// 查看单条备份记录
    Show {
        /// 记录ID
        id: i64,
    },
    /// 输出成功备份记录对应的本地文件路径
    Locate {
        /// 记录ID
        id: i64,
    },
    /// 定时备份管理
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// 前台运行定时备份（SIGHUP 重新加载配置，Ctrl-C 退出）
    Daemon,
    /// Google Drive 远程存储
    #[command(subcommand)]
    Drive(DriveCommand),
}
