//! Cancellable per-frame processing loop

use super::{Outbound, SessionSettings};
use crate::actuator::ActuatorLease;
use crate::bucket_ledger::BucketLedger;
use crate::error::Result;
use crate::frame_source::{Frame, FrameSource};
use crate::protocol::{displayed_count, encode_frame_message, ServerEvent};
use crate::tracker::Tracker;
use crate::vision::{Detector, FrameAnnotator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Source ran out of frames
    Exhausted,
    /// Router asked the loop to stop
    Cancelled,
    /// Frame read, encode, or another per-frame step failed
    Failed(String),
    /// Outbound channel closed
    ClientGone,
}

/// Returned to the router once the loop has released everything
pub struct LoopExit {
    pub tracker: Box<dyn Tracker>,
    pub reason: ExitReason,
    pub frames: u64,
}

/// Everything one streaming run needs, moved into the spawned task
pub struct FrameLoop {
    pub session_id: Uuid,
    pub source: Box<dyn FrameSource>,
    pub tracker: Box<dyn Tracker>,
    pub detector: Arc<dyn Detector>,
    pub annotator: FrameAnnotator,
    pub ledger: Arc<BucketLedger>,
    pub lease: ActuatorLease,
    pub settings: watch::Receiver<SessionSettings>,
    pub outbound: mpsc::Sender<Outbound>,
    pub frame_interval: Duration,
}

enum Step {
    Continue,
    Exit(ExitReason),
}

impl FrameLoop {
    /// Run until cancelled, exhausted, failed, or the client goes away.
    ///
    /// Every suspension point also waits on `cancel`; dropping the sender
    /// counts as cancellation. The relay is stopped and the source released
    /// on every exit path.
    pub async fn run(mut self, mut cancel: oneshot::Receiver<()>) -> LoopExit {
        let session_id = self.session_id;
        let mut interval = tokio::time::interval(self.frame_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames: u64 = 0;

        tracing::info!(connection_id = %session_id, "Frame loop started");

        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut cancel => break ExitReason::Cancelled,
                _ = interval.tick() => {}
            }

            let next = tokio::select! {
                biased;
                _ = &mut cancel => break ExitReason::Cancelled,
                next = self.source.next_frame() => next,
            };
            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => break ExitReason::Exhausted,
                Err(e) => break ExitReason::Failed(e.to_string()),
            };

            let message = match self.process(&frame, &mut cancel).await {
                Ok((message, step)) => {
                    if let Step::Exit(reason) = step {
                        break reason;
                    }
                    message
                }
                Err(e) => break ExitReason::Failed(e.to_string()),
            };

            tokio::select! {
                biased;
                _ = &mut cancel => break ExitReason::Cancelled,
                sent = self.outbound.send(Outbound::Binary(message)) => {
                    if sent.is_err() {
                        break ExitReason::ClientGone;
                    }
                }
            }
            frames += 1;
        };

        // Cleanup runs on every exit path
        if let Err(e) = self.lease.stop().await {
            tracing::error!(connection_id = %session_id, error = %e, "Failed to stop relay");
        }
        self.source.release().await;
        drop(self.lease);

        match &reason {
            ExitReason::Failed(message) => {
                tracing::error!(connection_id = %session_id, frames, error = %message, "Frame loop failed");
            }
            other => {
                tracing::info!(connection_id = %session_id, frames, reason = ?other, "Frame loop ended");
            }
        }

        LoopExit {
            tracker: self.tracker,
            reason,
            frames,
        }
    }

    /// Detect, track, attribute, then build the binary frame message
    async fn process(
        &mut self,
        frame: &Frame,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<(Vec<u8>, Step)> {
        let detections = self.detector.detect(frame);
        let delta = self.tracker.update(&detections);
        let settings = *self.settings.borrow();
        let mut step = Step::Continue;

        if delta > 0 {
            tracing::debug!(
                connection_id = %self.session_id,
                sequence = frame.sequence,
                delta,
                total = self.tracker.total_counted(),
                "Items crossed trigger line"
            );
            if let Some(bucket) = settings.selected_bucket {
                if let Some(outcome) = self.ledger.apply_delta(bucket, delta).await {
                    if outcome.just_filled {
                        step = self.on_bucket_filled(bucket, cancel).await;
                    }
                }
            }
        }

        let displayed = displayed_count(self.tracker.total_counted(), settings.offset);
        let jpeg = self
            .annotator
            .annotate(frame, &self.tracker.objects(), self.tracker.trigger_line())?;
        Ok((encode_frame_message(displayed, &jpeg), step))
    }

    /// Stop the line, tell the client, keep counting overfill
    async fn on_bucket_filled(&mut self, bucket: u32, cancel: &mut oneshot::Receiver<()>) -> Step {
        if let Err(e) = self.lease.stop().await {
            tracing::error!(connection_id = %self.session_id, bucket, error = %e, "Failed to stop relay on fill");
        }
        tracing::info!(connection_id = %self.session_id, bucket, "Bucket full, conveyor stopped");

        let event = ServerEvent::BucketStopped { bucket };
        tokio::select! {
            biased;
            _ = &mut *cancel => Step::Exit(ExitReason::Cancelled),
            sent = self.outbound.send(Outbound::from(&event)) => match sent {
                Ok(()) => Step::Continue,
                Err(_) => Step::Exit(ExitReason::ClientGone),
            },
        }
    }
}
