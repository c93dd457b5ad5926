//! BucketLedger - Persistent per-bucket counts and thresholds
//!
//! ## Responsibilities
//!
//! - Hold `count`, `set_value` and `filled` for every bucket
//! - Detect the transition to filled exactly once per fill
//! - Persist every mutation and broadcast `buckets_update` to all clients
//!
//! All mutations serialize on one lock. Persistence happens under that lock, so
//! the file always reflects a state that was observable in memory. A failed
//! write is logged and the in-memory state stays authoritative.

mod repository;
mod types;

pub use repository::LedgerRepository;
pub use types::*;

use crate::error::{Error, Result};
use crate::protocol::ServerEvent;
use crate::realtime_hub::RealtimeHub;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared bucket ledger
pub struct BucketLedger {
    buckets: Mutex<Vec<Bucket>>,
    repository: LedgerRepository,
    hub: Arc<RealtimeHub>,
    bucket_count: u32,
}

impl BucketLedger {
    /// Load persisted state, falling back to defaults when absent or mismatched
    pub async fn load(
        repository: LedgerRepository,
        bucket_count: u32,
        default_threshold: u32,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        let buckets = match repository.load(bucket_count).await {
            Some(buckets) => {
                tracing::info!(
                    path = %repository.path().display(),
                    bucket_count,
                    "Restored bucket ledger"
                );
                buckets
            }
            None => Bucket::defaults(bucket_count, default_threshold),
        };

        Self {
            buckets: Mutex::new(buckets),
            repository,
            hub,
            bucket_count,
        }
    }

    /// Map a client-supplied id to a valid bucket id
    pub fn validate_bucket(&self, bucket_id: i64) -> Result<u32> {
        match u32::try_from(bucket_id) {
            Ok(id) if (1..=self.bucket_count).contains(&id) => Ok(id),
            _ => Err(Error::Validation(format!(
                "bucket {} out of range 1..={}",
                bucket_id, self.bucket_count
            ))),
        }
    }

    /// Add `delta` to a bucket's count.
    ///
    /// `None` when the bucket does not exist; that is a no-op, not an error.
    pub async fn apply_delta(&self, bucket_id: u32, delta: u32) -> Option<DeltaOutcome> {
        let mut buckets = self.buckets.lock().await;
        let index = self.index_of(bucket_id)?;
        let bucket = &mut buckets[index];

        if delta == 0 {
            return Some(DeltaOutcome {
                count: bucket.count,
                just_filled: false,
            });
        }

        bucket.count = bucket.count.saturating_add(delta);
        let just_filled = !bucket.filled && bucket.count >= bucket.threshold;
        if just_filled {
            bucket.filled = true;
            tracing::info!(
                bucket = bucket_id,
                count = bucket.count,
                set_value = bucket.threshold,
                "Bucket filled"
            );
        }
        let outcome = DeltaOutcome {
            count: bucket.count,
            just_filled,
        };

        self.commit(&buckets).await;
        Some(outcome)
    }

    /// Change one bucket's threshold; clears `filled` if the count is now below it.
    ///
    /// Lowering it to or below the count leaves `filled` for the next delta to set.
    pub async fn set_threshold(&self, bucket_id: u32, value: u32) -> Result<Bucket> {
        validate_threshold(value)?;
        let mut buckets = self.buckets.lock().await;
        let index = self
            .index_of(bucket_id)
            .ok_or_else(|| Error::Validation(format!("bucket {} does not exist", bucket_id)))?;

        let bucket = &mut buckets[index];
        bucket.threshold = value;
        if bucket.count < value {
            bucket.filled = false;
        }
        let updated = bucket.clone();
        tracing::info!(bucket = bucket_id, set_value = value, "Bucket threshold changed");

        self.commit(&buckets).await;
        Ok(updated)
    }

    /// Apply `set_threshold` semantics to every bucket
    pub async fn set_all_thresholds(&self, value: u32) -> Result<()> {
        validate_threshold(value)?;
        let mut buckets = self.buckets.lock().await;
        for bucket in buckets.iter_mut() {
            bucket.threshold = value;
            if bucket.count < value {
                bucket.filled = false;
            }
        }
        tracing::info!(set_value = value, "All bucket thresholds changed");

        self.commit(&buckets).await;
        Ok(())
    }

    /// Zero every count and clear every fill flag; thresholds are kept
    pub async fn reset_all(&self) {
        let mut buckets = self.buckets.lock().await;
        for bucket in buckets.iter_mut() {
            bucket.count = 0;
            bucket.filled = false;
        }
        tracing::info!("Bucket ledger reset");

        self.commit(&buckets).await;
    }

    pub async fn snapshot(&self) -> Vec<Bucket> {
        self.buckets.lock().await.clone()
    }

    fn index_of(&self, bucket_id: u32) -> Option<usize> {
        if (1..=self.bucket_count).contains(&bucket_id) {
            Some(bucket_id as usize - 1)
        } else {
            None
        }
    }

    /// Persist and broadcast while the caller still holds the lock
    async fn commit(&self, buckets: &[Bucket]) {
        if let Err(e) = self.repository.save(buckets).await {
            tracing::error!(
                path = %self.repository.path().display(),
                error = %e,
                "Failed to persist bucket ledger"
            );
        }
        self.hub
            .broadcast(&ServerEvent::BucketsUpdate {
                buckets: buckets.to_vec(),
            })
            .await;
    }
}

fn validate_threshold(value: u32) -> Result<()> {
    if value == 0 {
        return Err(Error::Validation("set_value must be at least 1".to_string()));
    }
    Ok(())
}
