//! ActuatorManager - Single-owner access to the conveyor relay
//!
//! Only one session may drive the relay at a time. A session takes an
//! `ActuatorLease` before starting the line; the lease stops the relay when it
//! is dropped while the line is still running.

use super::Actuator;
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Hands out at most one lease at a time
pub struct ActuatorManager {
    actuator: Arc<dyn Actuator>,
    lock: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
}

impl ActuatorManager {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            actuator,
            lock: Arc::new(Mutex::new(())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take ownership without waiting; `None` while another session holds it
    pub fn try_acquire(&self, owner: Uuid) -> Option<ActuatorLease> {
        match self.lock.clone().try_lock_owned() {
            Ok(guard) => {
                tracing::debug!(owner = %owner, "Actuator lease acquired");
                Some(ActuatorLease {
                    owner,
                    guard: Some(guard),
                    actuator: self.actuator.clone(),
                    running: self.running.clone(),
                })
            }
            Err(_) => {
                tracing::debug!(owner = %owner, "Actuator lease denied - owned elsewhere");
                None
            }
        }
    }

    /// Stop the relay for a caller that holds no lease.
    ///
    /// Returns `Ok(false)` without touching the relay when a session owns it.
    pub async fn stop_if_unowned(&self) -> Result<bool> {
        let Ok(_guard) = self.lock.try_lock() else {
            return Ok(false);
        };
        self.running.store(false, Ordering::SeqCst);
        self.actuator.stop().await?;
        Ok(true)
    }

    /// Stop the relay whoever owns it. Only for process exit, when session
    /// tasks may be dropped without their leases getting a chance to stop it.
    pub async fn force_stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.actuator.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_owned(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub fn describe(&self) -> String {
        self.actuator.describe()
    }
}

/// Exclusive right to drive the relay; released on drop
pub struct ActuatorLease {
    owner: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    actuator: Arc<dyn Actuator>,
    running: Arc<AtomicBool>,
}

impl ActuatorLease {
    pub async fn start(&self) -> Result<()> {
        self.actuator.start().await?;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Always allowed, idempotent
    pub async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.actuator.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ActuatorLease {
    fn drop(&mut self) {
        let guard = self.guard.take();
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!(owner = %self.owner, "Actuator lease released");
            return;
        }

        // Keep the lock until the stop lands so no new owner can start in between
        let actuator = self.actuator.clone();
        let owner = self.owner;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = actuator.stop().await {
                        tracing::error!(owner = %owner, error = %e, "Failed to stop relay on lease drop");
                    }
                    drop(guard);
                    tracing::debug!(owner = %owner, "Actuator lease released after stop");
                });
            }
            Err(_) => {
                tracing::error!(owner = %owner, "Lease dropped outside runtime with relay running");
            }
        }
    }
}
