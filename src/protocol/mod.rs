//! Protocol - WebSocket wire format
//!
//! ## Client → server
//!
//! - Bare tokens: `start`, `stop`, `reset`, `shutdown`
//! - Tagged objects: `set_offset`, `select_bucket`, `set_bucket_value`, `set_all`
//!
//! ## Server → client
//!
//! - Bare tokens: `started`, `stopped`, `reset`
//! - Tagged objects: `buckets_update`, `bucket_stopped`, `selected_bucket`, `error`, `info`
//! - Binary frame: 4-byte big-endian displayed count, then JPEG bytes

use crate::bucket_ledger::Bucket;
use serde::{Deserialize, Serialize};

/// Parsed control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Start,
    Stop,
    Reset,
    Shutdown,
    SelectBucket { bucket: Option<i64> },
    SetBucketValue { bucket: i64, value: i64 },
    SetAll { value: i64 },
    SetOffset { offset: i64 },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Start => "start",
            ClientCommand::Stop => "stop",
            ClientCommand::Reset => "reset",
            ClientCommand::Shutdown => "shutdown",
            ClientCommand::SelectBucket { .. } => "select_bucket",
            ClientCommand::SetBucketValue { .. } => "set_bucket_value",
            ClientCommand::SetAll { .. } => "set_all",
            ClientCommand::SetOffset { .. } => "set_offset",
        }
    }
}

/// Why a text message was not a command
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("unknown token {0:?}")]
    UnknownToken(String),
    #[error("malformed command: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StructuredCommand {
    Start,
    Stop,
    Reset,
    Shutdown,
    SetOffset { offset: i64 },
    SelectBucket { bucket: Option<i64> },
    SetBucketValue { bucket: i64, set_value: i64 },
    SetAll { set_value: i64 },
}

impl From<StructuredCommand> for ClientCommand {
    fn from(cmd: StructuredCommand) -> Self {
        match cmd {
            StructuredCommand::Start => ClientCommand::Start,
            StructuredCommand::Stop => ClientCommand::Stop,
            StructuredCommand::Reset => ClientCommand::Reset,
            StructuredCommand::Shutdown => ClientCommand::Shutdown,
            StructuredCommand::SetOffset { offset } => ClientCommand::SetOffset { offset },
            StructuredCommand::SelectBucket { bucket } => ClientCommand::SelectBucket { bucket },
            StructuredCommand::SetBucketValue { bucket, set_value } => {
                ClientCommand::SetBucketValue {
                    bucket,
                    value: set_value,
                }
            }
            StructuredCommand::SetAll { set_value } => ClientCommand::SetAll { value: set_value },
        }
    }
}

/// Classify a text message as structured object or bare token
pub fn parse_command(text: &str) -> Result<ClientCommand, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    if text.starts_with('{') {
        return serde_json::from_str::<StructuredCommand>(text)
            .map(ClientCommand::from)
            .map_err(|e| ParseError::Malformed(e.to_string()));
    }

    match text {
        "start" => Ok(ClientCommand::Start),
        "stop" => Ok(ClientCommand::Stop),
        "reset" => Ok(ClientCommand::Reset),
        "shutdown" => Ok(ClientCommand::Shutdown),
        other => Err(ParseError::UnknownToken(other.to_string())),
    }
}

/// Server → client text message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Started,
    Stopped,
    Reset,
    BucketsUpdate { buckets: Vec<Bucket> },
    BucketStopped { bucket: u32 },
    SelectedBucket { bucket: Option<u32> },
    Error { code: String, message: String },
    Info { message: String },
}

impl ServerEvent {
    pub fn error(error: &crate::Error) -> Self {
        ServerEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        ServerEvent::Info {
            message: message.into(),
        }
    }

    /// Lifecycle acks go out as bare tokens, everything else as JSON
    pub fn to_text(&self) -> String {
        match self {
            ServerEvent::Started => "started".to_string(),
            ServerEvent::Stopped => "stopped".to_string(),
            ServerEvent::Reset => "reset".to_string(),
            other => match serde_json::to_string(other) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize event");
                    String::from(r#"{"type":"error","code":"serialization_error","message":"event serialization failed"}"#)
                }
            },
        }
    }
}

/// Binary frame message: `[u32 BE displayed count][jpeg...]`
pub fn encode_frame_message(count: u32, jpeg: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(4 + jpeg.len());
    message.extend_from_slice(&count.to_be_bytes());
    message.extend_from_slice(jpeg);
    message
}

/// Displayed count: tracker total plus the session offset, clamped to u32
pub fn displayed_count(tracker_total: u64, offset: i64) -> u32 {
    let total = i128::from(tracker_total) + i128::from(offset);
    total.clamp(0, i128::from(u32::MAX)) as u32
}
