use super::{
    Artifact, BackupProducer, PartialArtifact, artifact_file_name, resolve_tool, verify_archive,
};
use crate::config::AppConfig;
use crate::constants::backup;
use crate::error::{BackupError, Result};
use crate::target::{BackupTarget, TargetKind};
use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// 子进程保留的环境变量，其余全部清空
const INHERITED_ENV: [&str; 6] = ["PATH", "HOME", "LANG", "TZ", "SystemRoot", "TEMP"];

/// 调用本地转储/归档工具的生产者
#[derive(Debug, Clone)]
pub struct LocalCommandProducer {
    output_dir: PathBuf,
    dump_tool: PathBuf,
    archive_tool: PathBuf,
    mysql_host: String,
    mysql_port: u16,
    exclude: Vec<String>,
}

impl LocalCommandProducer {
    pub fn new(config: &AppConfig, output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            dump_tool: resolve_tool(&config.mysql.dump_path, backup::DEFAULT_DUMP_TOOL),
            archive_tool: resolve_tool(&config.files.tar_path, backup::DEFAULT_ARCHIVE_TOOL),
            mysql_host: config.mysql.host.clone(),
            mysql_port: config.mysql.port,
            exclude: config.files.exclude.clone(),
        }
    }

    /// mysqldump 命令，密码通过 `MYSQL_PWD` 传入，不出现在参数列表中
    fn dump_command(&self, target: &BackupTarget, output: &Path) -> Result<Command> {
        let credentials = target
            .credentials
            .as_ref()
            .ok_or_else(|| BackupError::producer(format!("数据库 {} 缺少凭据", target.name)))?;

        let mut cmd = isolated_command(&self.dump_tool);
        cmd.arg("-h")
            .arg(&self.mysql_host)
            .arg("-P")
            .arg(self.mysql_port.to_string())
            .arg("-u")
            .arg(credentials.principal())
            .arg(format!("--result-file={}", output.display()))
            .arg(&target.source_location)
            .env("MYSQL_PWD", credentials.secret().expose_secret());

        Ok(cmd)
    }

    /// tar 命令：`tar -czf <out> [--exclude=..] -C <parent> <base>`
    fn archive_command(&self, target: &BackupTarget, output: &Path) -> Result<Command> {
        let source = Path::new(&target.source_location);
        let base = source
            .file_name()
            .ok_or_else(|| BackupError::producer(format!("无法获取目录名: {}", source.display())))?;
        let parent = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut cmd = isolated_command(&self.archive_tool);
        cmd.arg("-czf").arg(output);
        for pattern in &self.exclude {
            cmd.arg(format!("--exclude={pattern}"));
        }
        cmd.arg("-C").arg(parent).arg(base);

        Ok(cmd)
    }

    async fn run(&self, mut cmd: Command, tool: &Path) -> Result<()> {
        let out = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackupError::producer(format!("tool not found: {}", tool.display()))
            } else {
                BackupError::producer(format!("启动 {} 失败: {e}", tool.display()))
            }
        })?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            let cause = if stderr.is_empty() {
                format!("{} 退出码: {}", tool.display(), out.status)
            } else {
                stderr
            };
            return Err(BackupError::producer(cause));
        }

        let stderr = String::from_utf8_lossy(&out.stderr);
        if !stderr.trim().is_empty() {
            debug!("{} 输出: {}", tool.display(), stderr.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl BackupProducer for LocalCommandProducer {
    async fn produce(&self, target: &BackupTarget) -> Result<Artifact> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let produced_at = Utc::now();
        let output =
            PartialArtifact::new(self.output_dir.join(artifact_file_name(target, produced_at)));

        match target.kind {
            TargetKind::Database => {
                info!(db = %target.name, "开始转储数据库");
                let cmd = self.dump_command(target, output.path())?;
                self.run(cmd, &self.dump_tool).await?;
            }
            TargetKind::FilesystemPath => {
                info!(path = %target.source_location, "开始归档目录");
                let cmd = self.archive_command(target, output.path())?;
                self.run(cmd, &self.archive_tool).await?;
                verify_archive(output.path()).await?;
            }
        }

        Artifact::from_path(output.keep(), produced_at).await
    }
}

fn isolated_command(tool: &Path) -> Command {
    let mut cmd = Command::new(tool);
    cmd.env_clear();
    for key in INHERITED_ENV {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}
