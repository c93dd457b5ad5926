//! PanelButtons - Physical start/stop buttons
//!
//! ## Responsibilities
//!
//! - Poll sysfs input lines, detect debounced falling edges
//! - Push synthetic `start` / `stop` commands to every connected session
//! - Stop the relay directly when no session is listening
//!
//! Sessions receive presses on the same dispatch loop that handles network
//! commands, so a press never races a client command.

use crate::actuator::ActuatorManager;
use crate::error::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Synthetic command produced by a panel button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Start,
    Stop,
}

/// Distributes button presses to sessions
pub struct PanelButtons {
    tx: broadcast::Sender<PanelCommand>,
    actuators: Arc<ActuatorManager>,
}

impl PanelButtons {
    pub fn new(actuators: Arc<ActuatorManager>) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx, actuators }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelCommand> {
        self.tx.subscribe()
    }

    /// Deliver one press
    pub async fn press(&self, command: PanelCommand) {
        // send fails if the last session went away after the count check
        if self.tx.receiver_count() > 0 {
            if let Ok(receivers) = self.tx.send(command) {
                tracing::info!(command = ?command, receivers, "Panel button pressed");
                return;
            }
        }

        match command {
            PanelCommand::Stop => match self.actuators.stop_if_unowned().await {
                Ok(true) => tracing::info!("Panel stop with no session, relay stopped"),
                Ok(false) => tracing::warn!("Panel stop ignored, relay owned by a session"),
                Err(e) => tracing::error!(error = %e, "Panel stop failed"),
            },
            PanelCommand::Start => {
                tracing::info!("Panel start ignored, no session connected");
            }
        }
    }
}

/// Accepts an edge only when `window` has passed since the last accepted one
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// One button wired to a GPIO input
#[derive(Debug, Clone)]
pub struct ButtonLine {
    pub pin: u32,
    pub command: PanelCommand,
}

/// Start one polling task per button line
pub async fn spawn_button_watchers(
    buttons: Arc<PanelButtons>,
    root: PathBuf,
    lines: Vec<ButtonLine>,
    debounce: Duration,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(lines.len());
    for line in lines {
        crate::actuator::gpio_input(&root, line.pin).await?;
        let value_path = root.join(format!("gpio{}", line.pin)).join("value");
        let buttons = buttons.clone();
        tracing::info!(pin = line.pin, command = ?line.command, "Watching panel button");

        handles.push(tokio::spawn(async move {
            let mut debouncer = Debouncer::new(debounce);
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut previous_high = true;

            loop {
                interval.tick().await;
                let high = match tokio::fs::read_to_string(&value_path).await {
                    Ok(v) => v.trim() != "0",
                    Err(e) => {
                        tracing::warn!(pin = line.pin, error = %e, "Button read failed");
                        continue;
                    }
                };

                // Pull-up wiring: a press pulls the line low
                if previous_high && !high && debouncer.accept(Instant::now()) {
                    buttons.press(line.command).await;
                }
                previous_high = high;
            }
        }));
    }
    Ok(handles)
}
