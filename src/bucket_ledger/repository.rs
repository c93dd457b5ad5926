//! JSON file persistence for the ledger

use super::types::Bucket;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Ledger file repository
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    path: PathBuf,
}

impl LedgerRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted buckets, or `None` when the file is absent or unusable.
    ///
    /// A file whose bucket ids are not exactly `1..=expected` is discarded.
    pub async fn load(&self, expected: u32) -> Option<Vec<Bucket>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No ledger file, starting fresh");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read ledger file");
                return None;
            }
        };

        let mut buckets: Vec<Bucket> = match serde_json::from_slice(&bytes) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ledger file is corrupt, discarding");
                return None;
            }
        };

        buckets.sort_by_key(|b| b.id);
        let ids_match = buckets.len() == expected as usize
            && buckets.iter().zip(1..=expected).all(|(b, id)| b.id == id);
        if !ids_match {
            tracing::warn!(
                path = %self.path.display(),
                persisted = buckets.len(),
                expected,
                "Ledger bucket count changed, discarding persisted state"
            );
            return None;
        }

        Some(buckets)
    }

    /// Write via temp file + rename so readers never see a partial ledger
    pub async fn save(&self, buckets: &[Bucket]) -> Result<()> {
        let json = serde_json::to_vec_pretty(buckets)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Persistence(format!("create {}: {e}", parent.display()))
                })?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| Error::Persistence(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Persistence(format!("rename to {}: {e}", self.path.display())))?;
        Ok(())
    }
}
