use crate::error::{BackupError, Result};
use std::path::Path;

/// 校验 `.tar.gz` 归档完整性
///
/// 完整读取所有条目内容，截断的 gzip 流或 tar 流会返回 `BackupError::Producer`。
/// 返回归档中的条目数。
pub async fn verify_archive(path: &Path) -> Result<usize> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        use flate2::read::GzDecoder;
        use std::fs::File;
        use tar::Archive;

        let file = File::open(&path)?;
        let mut archive = Archive::new(GzDecoder::new(file));

        let mut count = 0usize;
        let entries = archive
            .entries()
            .map_err(|e| BackupError::producer(format!("归档不完整: {e}")))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| BackupError::producer(format!("归档不完整: {e}")))?;
            std::io::copy(&mut entry, &mut std::io::sink())
                .map_err(|e| BackupError::producer(format!("归档不完整: {e}")))?;
            count += 1;
        }

        Ok::<usize, BackupError>(count)
    })
    .await?
}
