//! PowerControl - Out-of-band device power-off
//!
//! Fire-and-forget: callers schedule the power-off and keep running.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn power_off(&self) -> Result<()>;
}

/// Runs a configured shell command (e.g. `systemctl poweroff`)
#[derive(Debug, Clone)]
pub struct SystemPower {
    program: String,
    args: Vec<String>,
}

impl SystemPower {
    /// `None` when the command line is empty
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl PowerControl for SystemPower {
    async fn power_off(&self) -> Result<()> {
        tracing::warn!(program = %self.program, args = ?self.args, "Powering off device");
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Internal(format!("spawn {}: {e}", self.program)))?;
        if !status.success() {
            return Err(Error::Internal(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

/// Power-off disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPower;

#[async_trait]
impl PowerControl for NoopPower {
    async fn power_off(&self) -> Result<()> {
        tracing::warn!("Power-off requested but disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let power = SystemPower::from_command_line("sudo shutdown -h now").unwrap();
        assert_eq!(power.program, "sudo");
        assert_eq!(power.args, vec!["shutdown", "-h", "now"]);
        assert!(SystemPower::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_runs_command() {
        assert!(SystemPower::from_command_line("true")
            .unwrap()
            .power_off()
            .await
            .is_ok());
        assert!(SystemPower::from_command_line("false")
            .unwrap()
            .power_off()
            .await
            .is_err());
    }
}
