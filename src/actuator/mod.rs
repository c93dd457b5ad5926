//! Actuator - Conveyor relay control
//!
//! ## Responsibilities
//!
//! - `Actuator` capability surface (`start` / `stop`, idempotent)
//! - sysfs GPIO relay for the real line, simulated relay for bench runs
//! - Single-owner access via `ActuatorManager` / `ActuatorLease`

mod gpio;
mod lease;

pub use gpio::{gpio_input, SysfsGpioRelay, SYSFS_GPIO_ROOT};
pub use lease::{ActuatorLease, ActuatorManager};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Binary conveyor actuator
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    fn describe(&self) -> String;
}

/// In-memory relay used when no GPIO line is configured
#[derive(Debug, Default)]
pub struct SimulatedActuator {
    running: AtomicBool,
    starts: AtomicU32,
    stops: AtomicU32,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Simulated relay on");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Simulated relay off");
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}
