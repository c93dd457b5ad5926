//! Sorting-line controller library
//!
//! Counts items crossing a trigger line in a live video feed, attributes the
//! counts to operator-selected buckets, drives the conveyor relay and streams
//! annotated frames to WebSocket clients.
//!
//! ## Architecture
//!
//! 1. Tracker - detections to identities and trigger-line crossings
//! 2. Vision - colour detector and frame annotation
//! 3. FrameSource - ffmpeg-backed raw frame acquisition
//! 4. BucketLedger - persisted per-bucket counts and thresholds
//! 5. RealtimeHub - fan-out of ledger snapshots
//! 6. Actuator - conveyor relay with single-owner leases
//! 7. PanelButtons - physical start/stop buttons
//! 8. StreamingSession - cancellable frame loop
//! 9. CommandRouter - per-connection dispatch and lifecycle
//! 10. WebAPI - WebSocket and REST endpoints
//!
//! ## Design Principles
//!
//! - The ledger is the only shared mutable state; sessions own their tracker
//! - Every exit path of a frame loop stops the relay and releases the source

pub mod actuator;
pub mod bucket_ledger;
pub mod command_router;
pub mod error;
pub mod frame_source;
pub mod panel_buttons;
pub mod power_control;
pub mod protocol;
pub mod realtime_hub;
pub mod report_writer;
pub mod state;
pub mod streaming_session;
pub mod tracker;
pub mod vision;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
