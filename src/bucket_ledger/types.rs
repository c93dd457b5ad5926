//! Bucket ledger types

use serde::{Deserialize, Serialize};

/// One counting target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// 1-based
    pub id: u32,
    pub count: u32,
    /// Threshold at which the bucket counts as full
    #[serde(rename = "set_value")]
    pub threshold: u32,
    pub filled: bool,
}

impl Bucket {
    pub fn new(id: u32, threshold: u32) -> Self {
        Self {
            id,
            count: 0,
            threshold,
            filled: false,
        }
    }

    /// Fresh buckets `1..=count`
    pub fn defaults(count: u32, threshold: u32) -> Vec<Bucket> {
        (1..=count).map(|id| Bucket::new(id, threshold)).collect()
    }
}

/// Result of `BucketLedger::apply_delta`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub count: u32,
    /// True only on the transition to filled
    pub just_filled: bool,
}
