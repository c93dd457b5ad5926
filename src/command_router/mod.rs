//! CommandRouter - Per-connection command dispatch and stream lifecycle
//!
//! ## Responsibilities
//!
//! - Classify and validate inbound text commands
//! - Own the connection's streaming state, tracker and settings
//! - Serialize every lifecycle transition through one dispatch loop
//! - Merge panel button presses into the same loop
//!
//! Ledger mutations go through `BucketLedger`, which serializes them across
//! connections. Nothing here blocks on another connection.

use crate::actuator::ActuatorManager;
use crate::bucket_ledger::BucketLedger;
use crate::error::Error;
use crate::frame_source::{open_with_retry, FrameSourceFactory, RetryPolicy};
use crate::panel_buttons::PanelCommand;
use crate::power_control::PowerControl;
use crate::protocol::{parse_command, ClientCommand, ServerEvent};
use crate::streaming_session::{
    ExitReason, FrameLoop, LoopExit, Outbound, SessionSettings, StreamState,
};
use crate::tracker::{CentroidTracker, Tracker, TrackerConfig};
use crate::vision::{Detector, FrameAnnotator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

/// Shared services every router is built from
#[derive(Clone)]
pub struct RouterContext {
    pub ledger: Arc<BucketLedger>,
    pub actuators: Arc<ActuatorManager>,
    pub frame_sources: Arc<dyn FrameSourceFactory>,
    pub detector: Arc<dyn Detector>,
    pub annotator: FrameAnnotator,
    pub tracker_config: TrackerConfig,
    pub retry: RetryPolicy,
    pub frame_interval: Duration,
    pub power: Arc<dyn PowerControl>,
    /// Pause between the shutdown notice and power-off
    pub power_off_delay: Duration,
}

/// Where a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Client,
    Panel,
}

struct ActiveStream {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<LoopExit>,
}

/// One connection's dispatch loop
pub struct CommandRouter {
    id: Uuid,
    ctx: RouterContext,
    state: StreamState,
    settings: watch::Sender<SessionSettings>,
    tracker: Option<Box<dyn Tracker>>,
    active: Option<ActiveStream>,
    outbound: mpsc::Sender<Outbound>,
}

impl CommandRouter {
    pub fn new(id: Uuid, ctx: RouterContext, outbound: mpsc::Sender<Outbound>) -> Self {
        let (settings, _) = watch::channel(SessionSettings::default());
        Self {
            id,
            ctx,
            state: StreamState::Idle,
            settings,
            tracker: None,
            active: None,
            outbound,
        }
    }

    /// Dispatch until the inbound channel closes, then tear down
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<String>,
        mut panel: Option<broadcast::Receiver<PanelCommand>>,
    ) {
        let snapshot = self.ctx.ledger.snapshot().await;
        self.send(ServerEvent::BucketsUpdate { buckets: snapshot }).await;

        loop {
            tokio::select! {
                text = inbound.recv() => match text {
                    Some(text) => self.handle_text(&text).await,
                    None => break,
                },
                press = next_press(&mut panel) => match press {
                    Ok(command) => self.handle_panel(command).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(connection_id = %self.id, missed, "Missed panel presses");
                    }
                    Err(broadcast::error::RecvError::Closed) => panel = None,
                },
                exit = join_active(&mut self.active) => {
                    self.active = None;
                    self.on_stream_finished(exit).await;
                }
            }
        }

        self.stop_streaming().await;
        self.transition(StreamState::Closed);
        tracing::info!(connection_id = %self.id, "Session closed");
    }

    async fn handle_text(&mut self, text: &str) {
        match parse_command(text) {
            Ok(command) => {
                tracing::debug!(connection_id = %self.id, command = command.name(), "Command received");
                self.dispatch(command, Origin::Client).await;
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Ignoring unrecognised message");
            }
        }
    }

    async fn handle_panel(&mut self, command: PanelCommand) {
        tracing::info!(connection_id = %self.id, command = ?command, "Panel command");
        match command {
            PanelCommand::Start => self.dispatch(ClientCommand::Start, Origin::Panel).await,
            PanelCommand::Stop => self.dispatch(ClientCommand::Stop, Origin::Panel).await,
        }
    }

    async fn dispatch(&mut self, command: ClientCommand, origin: Origin) {
        match command {
            ClientCommand::Start => self.start(origin).await,
            ClientCommand::Stop => self.stop(origin).await,
            ClientCommand::Reset => self.reset().await,
            ClientCommand::Shutdown => self.shutdown().await,
            ClientCommand::SelectBucket { bucket } => self.select_bucket(bucket).await,
            ClientCommand::SetBucketValue { bucket, value } => {
                let result = match (self.ctx.ledger.validate_bucket(bucket), to_threshold(value)) {
                    (Ok(bucket), Ok(value)) => self.ctx.ledger.set_threshold(bucket, value).await.map(|_| ()),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                self.report(result).await;
            }
            ClientCommand::SetAll { value } => {
                let result = match to_threshold(value) {
                    Ok(value) => self.ctx.ledger.set_all_thresholds(value).await,
                    Err(e) => Err(e),
                };
                self.report(result).await;
            }
            ClientCommand::SetOffset { offset } => {
                self.settings.send_modify(|s| s.offset = offset);
                tracing::info!(connection_id = %self.id, offset, "Display offset set");
                self.send(ServerEvent::info(format!("offset set to {offset}"))).await;
            }
        }
    }

    async fn start(&mut self, origin: Origin) {
        if self.active.is_some() {
            if origin == Origin::Client {
                self.send(ServerEvent::info("already streaming")).await;
            }
            return;
        }
        self.transition(StreamState::Opening);

        let Some(lease) = self.ctx.actuators.try_acquire(self.id) else {
            self.transition(StreamState::Idle);
            if origin == Origin::Panel {
                tracing::debug!(connection_id = %self.id, "Panel start taken by another session");
                return;
            }
            tracing::warn!(connection_id = %self.id, "Start refused, conveyor owned by another session");
            let error = Error::ActuatorBusy("conveyor is controlled by another session".to_string());
            self.send(ServerEvent::error(&error)).await;
            return;
        };

        let source = match open_with_retry(self.ctx.frame_sources.as_ref(), self.ctx.retry).await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(connection_id = %self.id, error = %e, "Failed to acquire frame source");
                self.transition(StreamState::Idle);
                self.send(ServerEvent::error(&e)).await;
                return;
            }
        };

        if let Err(e) = lease.start().await {
            tracing::error!(connection_id = %self.id, error = %e, "Failed to start relay");
        }

        let tracker = self.take_tracker();
        let (cancel, cancel_rx) = oneshot::channel();
        let frame_loop = FrameLoop {
            session_id: self.id,
            source,
            tracker,
            detector: self.ctx.detector.clone(),
            annotator: self.ctx.annotator.clone(),
            ledger: self.ctx.ledger.clone(),
            lease,
            settings: self.settings.subscribe(),
            outbound: self.outbound.clone(),
            frame_interval: self.ctx.frame_interval,
        };
        let handle = tokio::spawn(frame_loop.run(cancel_rx));
        self.active = Some(ActiveStream { cancel, handle });

        self.transition(StreamState::Running);
        self.send(ServerEvent::Started).await;
    }

    async fn stop(&mut self, origin: Origin) {
        if self.stop_streaming().await {
            self.send(ServerEvent::Stopped).await;
            return;
        }

        // Idle: stop the line only when nobody else is driving it
        match self.ctx.actuators.stop_if_unowned().await {
            Ok(true) => self.send(ServerEvent::Stopped).await,
            Ok(false) => {
                if origin == Origin::Client {
                    self.send(ServerEvent::info("conveyor is controlled by another session"))
                        .await;
                }
            }
            Err(e) => {
                tracing::error!(connection_id = %self.id, error = %e, "Failed to stop relay");
                self.send(ServerEvent::Stopped).await;
            }
        }
    }

    async fn reset(&mut self) {
        if !self.stop_streaming().await {
            if let Err(e) = self.ctx.actuators.stop_if_unowned().await {
                tracing::error!(connection_id = %self.id, error = %e, "Failed to stop relay");
            }
        }

        self.ctx.ledger.reset_all().await;
        let mut tracker = self.take_tracker();
        tracker.reset();
        self.tracker = Some(tracker);
        self.settings.send_replace(SessionSettings::default());

        tracing::info!(connection_id = %self.id, "Session reset");
        self.send(ServerEvent::Reset).await;
        self.send(ServerEvent::SelectedBucket { bucket: None }).await;
    }

    async fn shutdown(&mut self) {
        tracing::warn!(connection_id = %self.id, "Shutdown requested");
        self.send(ServerEvent::info("shutting down")).await;

        if !self.stop_streaming().await {
            if let Err(e) = self.ctx.actuators.stop_if_unowned().await {
                tracing::error!(connection_id = %self.id, error = %e, "Failed to stop relay");
            }
        }

        let power = self.ctx.power.clone();
        let delay = self.ctx.power_off_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = power.power_off().await {
                tracing::error!(error = %e, "Power-off failed");
            }
        });
    }

    async fn select_bucket(&mut self, bucket: Option<i64>) {
        let selected = match bucket {
            None => None,
            Some(raw) => match self.ctx.ledger.validate_bucket(raw) {
                Ok(id) => Some(id),
                Err(e) => {
                    self.report(Err(e)).await;
                    return;
                }
            },
        };

        self.settings.send_modify(|s| s.selected_bucket = selected);
        tracing::info!(connection_id = %self.id, bucket = ?selected, "Bucket selected");
        self.send(ServerEvent::SelectedBucket { bucket: selected }).await;
    }

    /// Cancel and await the loop; true if one was running
    async fn stop_streaming(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        self.transition(StreamState::Stopping);

        // Err means the loop already finished on its own
        let _ = active.cancel.send(());
        let exit = active.handle.await;
        self.absorb_exit(exit);

        self.transition(StreamState::Idle);
        true
    }

    async fn on_stream_finished(&mut self, exit: std::result::Result<LoopExit, JoinError>) {
        let reason = self.absorb_exit(exit);
        self.transition(StreamState::Idle);

        match reason {
            Some(ExitReason::ClientGone) => {}
            Some(ExitReason::Failed(message)) => {
                self.send(ServerEvent::error(&Error::Frame(message))).await;
                self.send(ServerEvent::Stopped).await;
            }
            Some(ExitReason::Exhausted) | Some(ExitReason::Cancelled) => {
                self.send(ServerEvent::Stopped).await;
            }
            None => {
                self.send(ServerEvent::error(&Error::Internal(
                    "frame loop aborted".to_string(),
                )))
                .await;
                self.send(ServerEvent::Stopped).await;
            }
        }
    }

    /// Take the tracker back from a finished loop
    fn absorb_exit(&mut self, exit: std::result::Result<LoopExit, JoinError>) -> Option<ExitReason> {
        match exit {
            Ok(exit) => {
                self.tracker = Some(exit.tracker);
                Some(exit.reason)
            }
            Err(e) => {
                // The lease's drop schedules the relay stop
                tracing::error!(connection_id = %self.id, error = %e, "Frame loop task aborted");
                self.tracker = None;
                None
            }
        }
    }

    fn take_tracker(&mut self) -> Box<dyn Tracker> {
        let config = self.ctx.tracker_config;
        self.tracker
            .take()
            .unwrap_or_else(|| Box::new(CentroidTracker::new(config)))
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            tracing::debug!(connection_id = %self.id, from = %self.state, to = %next, "Stream state");
            self.state = next;
        }
    }

    async fn report(&self, result: crate::Result<()>) {
        if let Err(e) = result {
            tracing::warn!(connection_id = %self.id, error = %e, "Command rejected");
            self.send(ServerEvent::error(&e)).await;
        }
    }

    async fn send(&self, event: ServerEvent) {
        if self.outbound.send(Outbound::from(&event)).await.is_err() {
            tracing::debug!(connection_id = %self.id, "Client gone, event dropped");
        }
    }
}

fn to_threshold(value: i64) -> crate::Result<u32> {
    match u32::try_from(value) {
        Ok(v) if v >= 1 => Ok(v),
        _ => Err(Error::Validation(format!(
            "set_value must be between 1 and {}, got {}",
            u32::MAX,
            value
        ))),
    }
}

async fn join_active(
    active: &mut Option<ActiveStream>,
) -> std::result::Result<LoopExit, JoinError> {
    match active {
        Some(stream) => (&mut stream.handle).await,
        None => std::future::pending().await,
    }
}

async fn next_press(
    panel: &mut Option<broadcast::Receiver<PanelCommand>>,
) -> std::result::Result<PanelCommand, broadcast::error::RecvError> {
    match panel {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
