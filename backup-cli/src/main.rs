use backup_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use backup_core::BackupError;
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 写文件时 guard 需要存活到进程退出
    let _log_guard = setup_logging(cli.verbose);

    let config_path = cli.config_path();

    // `init` 不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(&config_path, force).await {
            error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let app = match CliApp::new(cli.config.as_deref(), cli.user_id).await {
        Ok(app) => app,
        Err(e) => {
            if matches!(e, BackupError::Toml(_)) {
                error!("❌ 配置文件 '{}' 格式错误: {}", config_path.display(), e);
            } else {
                error!("❌ 应用初始化失败: {}", e);
            }
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run(cli.command).await {
        error!("❌ 操作失败: {}", e);
        std::process::exit(1);
    }
}
