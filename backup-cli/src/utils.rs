use tracing_appender::non_blocking::WorkerGuard;

/// # 日志系统使用说明
///
/// 1. **库代码只使用 `tracing` 宏**：`info!()`, `warn!()`, `error!()`, `debug!()`
/// 2. **应用入口控制日志配置**：在 `main.rs` 中调用 `setup_logging()`
/// 3. **命令结果与日志分离**：运行结果、历史记录以 JSON 输出到标准输出
///
/// ## 配置选项
/// - `-v, --verbose`：启用 DEBUG 级别
/// - `RUST_LOG`：标准的日志级别控制，优先于 `-v`
/// - `BACKUP_LOG_FILE`：日志文件路径，设置后日志写入文件而非终端
///
/// ```bash
/// # 详细日志输出到终端
/// backup-cli -v mysql
///
/// # 守护进程日志写入文件
/// BACKUP_LOG_FILE=/var/log/backup-cli.log backup-cli daemon
///
/// # 只看远程存储模块的调试日志
/// RUST_LOG=backup_core::remote_storage=debug backup-cli drive test
/// ```
///
/// 写文件时返回的 `WorkerGuard` 必须存活到进程退出，否则尾部日志会丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = std::env::var("BACKUP_LOG_FILE")
        .ok()
        .filter(|v| !v.trim().is_empty());

    if let Some(log_file) = log_file {
        let path = std::path::Path::new(&log_file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "backup-cli.log".into());

        // 文件输出：详细格式便于排查
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init();
        Some(guard)
    } else {
        // 终端输出：简洁格式
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .without_time()
            .compact()
            .init();
        None
    }
}

/// 以 JSON 输出命令结果
pub fn print_json<T: serde::Serialize>(value: &T) -> backup_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 人类可读的文件大小
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
