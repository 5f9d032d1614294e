//! Local file backend: detects changes by hashing full file contents.

use super::{Backend, BackendKind, CheckResult, SnapshotTable};
use crate::error::BackendError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Tracks the SHA-256 digest of every watched file.
///
/// # Examples
///
/// ```rust,no_run
/// use watchkeeper::surveillee::{Backend, FileHasher};
///
/// # async fn example() {
/// let hasher = FileHasher::new();
/// let path = vec!["/etc/app/config.json".to_string()];
///
/// // first look establishes the baseline
/// let first = hasher.check_for_upstream_changes(&path).await;
/// assert!(!first.has_changed);
/// # }
/// ```
#[derive(Default)]
pub struct FileHasher {
    checksums: SnapshotTable<String>,
}

impl FileHasher {
    /// Create a file backend with an empty checksum table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex-encoded SHA-256 of the file at `path`, streamed in chunks.
    pub async fn checksum(path: impl AsRef<Path>) -> Result<String, BackendError> {
        let mut file = tokio::fs::File::open(path.as_ref()).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Record `checksum` for `path` and report whether it differs from the
    /// previous one. The first checksum for a path is never a change.
    pub fn compare_and_swap(&self, path: &str, checksum: String) -> bool {
        self.checksums
            .compare_and_swap(path, checksum, |old, new| old != new)
    }

    /// Last recorded checksum for `path`.
    pub fn last_checksum(&self, path: &str) -> Option<String> {
        self.checksums.get(path).map(|c| c.as_str().to_owned())
    }
}

#[async_trait]
impl Backend for FileHasher {
    async fn check_for_upstream_changes(&self, fields: &[String]) -> CheckResult {
        let Some(path) = fields.first() else {
            warn!("file check called without a path");
            return CheckResult::unhealthy();
        };
        let checksum = match Self::checksum(path).await {
            Ok(sum) => sum,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to hash watched file");
                return CheckResult::unhealthy();
            }
        };
        let has_changed = self.compare_and_swap(path, checksum);
        debug!(path = %path, has_changed, "file checked");
        CheckResult::healthy(has_changed)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::FileHasher
    }
}
