//! StreamingSession - Per-connection streaming state and the frame loop
//!
//! ## Responsibilities
//!
//! - Streaming state machine (`Idle → Opening → Running → Stopping → Idle`, `Closed`)
//! - Session-local settings shared with the running loop (selected bucket, offset)
//! - The cancellable frame loop: detect, track, attribute, annotate, transmit
//!
//! The loop owns the frame source and the actuator lease for its whole run and
//! releases both on every exit path before handing the tracker back.

mod frame_loop;

pub use frame_loop::{ExitReason, FrameLoop, LoopExit};

use std::fmt;

/// Lifecycle of one connection's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Opening,
    Running,
    Stopping,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::Opening => "opening",
            StreamState::Running => "running",
            StreamState::Stopping => "stopping",
            StreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Settings the router changes while the loop reads them every frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bucket that receives count deltas
    pub selected_bucket: Option<u32>,
    /// Display-only bias added to the tracker total
    pub offset: i64,
}

/// Message queued for one client's socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

impl From<&crate::protocol::ServerEvent> for Outbound {
    fn from(event: &crate::protocol::ServerEvent) -> Self {
        Outbound::Text(event.to_text())
    }
}
