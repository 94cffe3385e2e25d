use super::{Artifact, BackupProducer, PartialArtifact, artifact_file_name, verify_archive};
use crate::config::AppConfig;
use crate::constants::{backup, remote};
use crate::error::{BackupError, Result};
use crate::target::{BackupTarget, TargetKind};
use async_trait::async_trait;
use chrono::Utc;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// SSH 会话回调：只负责主机公钥校验
struct HostKeyCheck {
    expected_fingerprint: Option<String>,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let actual = server_public_key.fingerprint();
        match &self.expected_fingerprint {
            Some(expected) => {
                let matched = fingerprint_matches(expected, &actual);
                if !matched {
                    warn!("远程主机公钥指纹不匹配: SHA256:{}", actual);
                }
                Ok(matched)
            }
            None => {
                debug!("接受远程主机公钥: SHA256:{}", actual);
                Ok(true)
            }
        }
    }
}

/// 远程 tar 的退出情况
#[derive(Debug, Default)]
struct StreamOutcome {
    bytes: u64,
    exit_status: Option<u32>,
    stderr: String,
}

/// 通过 SSH 在远程主机打包目录，标准输出直接流式写入本地文件
#[derive(Debug, Clone)]
pub struct RemoteStreamProducer {
    output_dir: PathBuf,
    host: String,
    port: u16,
    host_key_fingerprint: Option<String>,
    exclude: Vec<String>,
}

impl RemoteStreamProducer {
    pub fn new(config: &AppConfig, output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            host: config.remote.host.clone().unwrap_or_default(),
            port: config.remote.port,
            host_key_fingerprint: config
                .remote
                .host_key_fingerprint
                .clone()
                .filter(|f| !f.trim().is_empty()),
            exclude: config.files.exclude.clone(),
        }
    }

    async fn connect(&self, target: &BackupTarget) -> Result<Handle<HostKeyCheck>> {
        let credentials = target
            .credentials
            .as_ref()
            .ok_or_else(|| BackupError::producer("远程采集缺少传输凭据"))?;

        let config = Arc::new(client::Config::default());
        let handler = HostKeyCheck {
            expected_fingerprint: self.host_key_fingerprint.clone(),
        };

        debug!("连接远程主机 {}:{}", self.host, self.port);
        let mut session = client::connect(config, (self.host.as_str(), self.port), handler)
            .await
            .map_err(|e| BackupError::producer(format!("连接远程主机失败: {e}")))?;

        let authenticated = session
            .authenticate_password(credentials.principal(), credentials.secret().expose_secret())
            .await
            .map_err(|e| BackupError::producer(format!("远程主机认证失败: {e}")))?;
        if !authenticated {
            return Err(BackupError::producer(format!(
                "远程主机拒绝了用户 {} 的密码认证",
                credentials.principal()
            )));
        }

        Ok(session)
    }

    /// 执行远程命令，标准输出写入 `file`，同时收集 stderr
    ///
    /// 两个流在同一个消息循环中消费，stderr 不会阻塞标准输出。
    async fn stream_to_file(
        &self,
        session: &Handle<HostKeyCheck>,
        command: &str,
        file: &mut File,
    ) -> Result<StreamOutcome> {
        let mut channel = session.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut outcome = StreamOutcome::default();
        let mut stderr = Vec::new();

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    file.write_all(data).await?;
                    outcome.bytes += data.len() as u64;
                }
                ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == remote::SSH_EXTENDED_DATA_STDERR {
                        stderr.extend_from_slice(data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    outcome.exit_status = Some(exit_status);
                }
                _ => {}
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        outcome.stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        Ok(outcome)
    }

    async fn capture(&self, target: &BackupTarget, output: &Path) -> Result<StreamOutcome> {
        let session = self.connect(target).await?;
        let command = remote_tar_command(&target.source_location, &self.exclude);
        info!(path = %target.source_location, "执行远程归档命令: {}", command);

        let mut file = File::create(output).await?;
        let result = self.stream_to_file(&session, &command, &mut file).await;
        drop(file);

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("关闭 SSH 会话失败: {}", e);
        }

        result.map_err(|e| match e {
            BackupError::Producer(_) => e,
            other => BackupError::producer(format!("远程数据流中断: {other}")),
        })
    }
}

#[async_trait]
impl BackupProducer for RemoteStreamProducer {
    async fn produce(&self, target: &BackupTarget) -> Result<Artifact> {
        if target.kind != TargetKind::FilesystemPath {
            return Err(BackupError::producer("远程采集只支持目录备份"));
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let produced_at = Utc::now();
        let output =
            PartialArtifact::new(self.output_dir.join(artifact_file_name(target, produced_at)));

        let outcome = self.capture(target, output.path()).await?;

        // 以本地文件写完为准；归档必须能完整读出
        let archive = verify_archive(output.path()).await;
        let entries = judge_capture(&outcome, archive)?;
        if outcome.exited_with_error() {
            debug!(
                path = %target.source_location,
                "远程 tar 退出码 {:?}，归档完整，按成功处理",
                outcome.exit_status
            );
        }

        debug!(bytes = outcome.bytes, entries, "远程数据流写入完成");
        Artifact::from_path(output.keep(), produced_at).await
    }
}

impl StreamOutcome {
    fn exited_with_error(&self) -> bool {
        self.exit_status.is_some_and(|code| code != 0)
    }
}

/// 根据远程退出情况和本地归档校验结果判定本次采集
///
/// - 归档读不完整（流被截断）：失败
/// - 非零退出且归档为空：失败，stderr 作为原因
/// - 非零退出但归档完整：成功，非良性的 stderr 记为警告
fn judge_capture(outcome: &StreamOutcome, archive: Result<usize>) -> Result<usize> {
    let entries = archive?;

    if !outcome.exited_with_error() {
        return Ok(entries);
    }

    if entries == 0 {
        let cause = if outcome.stderr.is_empty() {
            format!("远程 tar 退出码 {:?}，归档为空", outcome.exit_status)
        } else {
            outcome.stderr.clone()
        };
        return Err(BackupError::producer(cause));
    }

    if !outcome.stderr.is_empty() && !is_benign_warning(&outcome.stderr) {
        warn!("远程 tar 输出警告: {}", outcome.stderr);
    }
    Ok(entries)
}

/// 远程归档命令：`tar -czf - [--exclude=..] -C <parent> <base>`
fn remote_tar_command(remote_path: &str, exclude: &[String]) -> String {
    let normalized = remote_path.replace('\\', "/");
    let trimmed = normalized.trim_end_matches('/');
    let (parent, base) = match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => (".", trimmed),
    };

    let mut command = format!("{} -czf -", backup::DEFAULT_ARCHIVE_TOOL);
    for pattern in exclude {
        command.push_str(&format!(" --exclude={}", shell_quote(pattern)));
    }
    command.push_str(&format!(" -C {} {}", shell_quote(parent), shell_quote(base)));
    command
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// tar 剥离前导 `/` 之类的提示不视为警告
fn is_benign_warning(stderr: &str) -> bool {
    stderr.contains(backup::BENIGN_TAR_WARNING)
}

fn fingerprint_matches(expected: &str, actual: &str) -> bool {
    let expected = expected.trim();
    let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
    expected == actual
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_tar_command() {
        assert_eq!(
            remote_tar_command("/var/www", &[]),
            "tar -czf - -C '/var' 'www'"
        );
        assert_eq!(
            remote_tar_command("/srv/site/", &["*.log".to_string()]),
            "tar -czf - --exclude='*.log' -C '/srv' 'site'"
        );
        assert_eq!(remote_tar_command("/www", &[]), "tar -czf - -C '/' 'www'");
        assert_eq!(remote_tar_command("data", &[]), "tar -czf - -C '.' 'data'");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_benign_warning() {
        assert!(is_benign_warning(
            "tar: Removing leading `/' from member names"
        ));
        assert!(!is_benign_warning("tar: www: Cannot open: Permission denied"));
    }

    #[test]
    fn test_fingerprint_matches_with_or_without_prefix() {
        assert!(fingerprint_matches("SHA256:abc123", "abc123"));
        assert!(fingerprint_matches(" abc123 ", "abc123"));
        assert!(!fingerprint_matches("SHA256:other", "abc123"));
    }

    fn outcome(exit_status: Option<u32>, stderr: &str) -> StreamOutcome {
        StreamOutcome {
            bytes: 1024,
            exit_status,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_clean_exit_with_archive_succeeds() {
        assert_eq!(judge_capture(&outcome(Some(0), ""), Ok(3)).unwrap(), 3);
        // 未收到退出码时以本地归档为准
        assert_eq!(judge_capture(&outcome(None, ""), Ok(1)).unwrap(), 1);
    }

    #[test]
    fn test_nonzero_exit_with_complete_archive_is_tolerated() {
        let benign = outcome(Some(1), "tar: Removing leading `/' from member names");
        assert_eq!(judge_capture(&benign, Ok(2)).unwrap(), 2);

        let changed = outcome(Some(1), "tar: www/cache: file changed as we read it");
        assert_eq!(judge_capture(&changed, Ok(5)).unwrap(), 5);
    }

    #[test]
    fn test_nonzero_exit_with_empty_archive_fails() {
        let err = judge_capture(
            &outcome(Some(2), "tar: www: Cannot open: Permission denied"),
            Ok(0),
        )
        .unwrap_err();
        assert!(matches!(err, BackupError::Producer(_)));
        assert!(err.to_string().contains("Permission denied"));

        let err = judge_capture(&outcome(Some(2), ""), Ok(0)).unwrap_err();
        assert!(err.to_string().contains("归档为空"));
    }

    #[test]
    fn test_clean_exit_with_empty_archive_succeeds() {
        assert_eq!(judge_capture(&outcome(Some(0), ""), Ok(0)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_truncated_stream_fails_and_discards_file() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let dir = tempfile::tempdir().unwrap();

        // 完整归档的前半段模拟中断的数据流
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let data: Vec<u8> = (0..64 * 1024u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "www/index.html", data.as_slice())
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let output = PartialArtifact::new(dir.path().join("file_backup_www.tar.gz"));
        let mut file = File::create(output.path()).await.unwrap();
        for chunk in archive[..archive.len() / 2].chunks(4096) {
            file.write_all(chunk).await.unwrap();
        }
        file.flush().await.unwrap();
        drop(file);

        let verified = verify_archive(output.path()).await;
        let err = judge_capture(&outcome(Some(0), ""), verified).unwrap_err();
        assert!(matches!(err, BackupError::Producer(_)));

        let path = output.path().to_path_buf();
        drop(output);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_database_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let producer = RemoteStreamProducer::new(&AppConfig::default(), dir.path());
        let target = BackupTarget {
            kind: TargetKind::Database,
            name: "sales".to_string(),
            source_location: "sales".to_string(),
            credentials: None,
        };

        let err = producer.produce(&target).await.unwrap_err();
        assert!(matches!(err, BackupError::Producer(_)));
    }
}
