//! Relay on a sysfs GPIO line (`/sys/class/gpio`)

use super::Actuator;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Output line driving the conveyor relay
#[derive(Debug, Clone)]
pub struct SysfsGpioRelay {
    root: PathBuf,
    pin: u32,
    active_low: bool,
}

impl SysfsGpioRelay {
    /// Export the line and configure it as an output, initially off
    pub async fn open(pin: u32, active_low: bool) -> Result<Self> {
        Self::open_at(SYSFS_GPIO_ROOT, pin, active_low).await
    }

    pub async fn open_at(root: impl Into<PathBuf>, pin: u32, active_low: bool) -> Result<Self> {
        let relay = Self {
            root: root.into(),
            pin,
            active_low,
        };
        export_pin(&relay.root, pin).await?;
        write_attr(&relay.pin_dir().join("direction"), "out").await?;
        relay.write_level(false).await?;
        tracing::info!(pin, active_low, "GPIO relay ready");
        Ok(relay)
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    async fn write_level(&self, on: bool) -> Result<()> {
        let high = on != self.active_low;
        write_attr(&self.pin_dir().join("value"), if high { "1" } else { "0" }).await
    }
}

#[async_trait]
impl Actuator for SysfsGpioRelay {
    async fn start(&self) -> Result<()> {
        self.write_level(true).await?;
        tracing::info!(pin = self.pin, "Relay on");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.write_level(false).await?;
        tracing::info!(pin = self.pin, "Relay off");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("gpio{}", self.pin)
    }
}

/// Export `pin` unless the kernel already exposes it
pub(crate) async fn export_pin(root: &Path, pin: u32) -> Result<()> {
    if tokio::fs::metadata(root.join(format!("gpio{pin}"))).await.is_ok() {
        return Ok(());
    }
    write_attr(&root.join("export"), &pin.to_string()).await
}

/// Export `pin` and configure it as an input
pub async fn gpio_input(root: &Path, pin: u32) -> Result<()> {
    export_pin(root, pin).await?;
    write_attr(&root.join(format!("gpio{pin}")).join("direction"), "in").await
}

pub(crate) async fn write_attr(path: &Path, value: &str) -> Result<()> {
    tokio::fs::write(path, value)
        .await
        .map_err(|e| Error::Actuator(format!("write {:?} to {}: {e}", value, path.display())))
}

#[cfg(test)]
pub(crate) async fn read_attr(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::Actuator(format!("read {}: {e}", path.display())))
}
