//! ReportWriter - CSV export of bucket counts
//!
//! One row per report: `timestamp,bucket1_count,...,bucketN_count`. The header
//! is written when the file is new or empty.

use crate::bucket_ledger::Bucket;
use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Row appended by one report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub timestamp: String,
    pub counts: Vec<u32>,
}

/// Appends report rows to a CSV file
#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one row built from `buckets` at time `at`
    pub async fn append(&self, buckets: &[Bucket], at: DateTime<Local>) -> Result<ReportRow> {
        let row = ReportRow {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            counts: buckets.iter().map(|b| b.count).collect(),
        };

        let needs_header = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut writer = csv::Writer::from_writer(Vec::new());
        if needs_header {
            let mut header = vec!["timestamp".to_string()];
            header.extend(buckets.iter().map(|b| format!("bucket{}_count", b.id)));
            writer.write_record(&header).map_err(csv_error)?;
        }
        let mut record = vec![row.timestamp.clone()];
        record.extend(row.counts.iter().map(u32::to_string));
        writer.write_record(&record).map_err(csv_error)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Persistence(format!("csv flush: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Persistence(format!("open {}: {e}", self.path.display())))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::Persistence(format!("append {}: {e}", self.path.display())))?;
        file.flush().await?;

        tracing::info!(path = %self.path.display(), buckets = row.counts.len(), "Report saved");
        Ok(row)
    }
}

fn csv_error(e: csv::Error) -> Error {
    Error::Persistence(format!("csv encode: {e}"))
}
