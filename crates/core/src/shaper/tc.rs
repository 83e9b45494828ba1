use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;

use super::{Setpoint, ShaperPort};
use crate::errors::ApplyError;

/// Applies setpoints by spawning `tc` and waiting for its exit status.
#[derive(Debug, Clone)]
pub struct TcShaper {
    binary: PathBuf,
    timeout: Duration,
}

impl TcShaper {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }
}

impl ShaperPort for TcShaper {
    async fn apply(&self, interface: &str, setpoint: &Setpoint) -> Result<(), ApplyError> {
        let args = setpoint.tc_args(interface);
        let direction = setpoint.direction;

        let mut command = Command::new(&self.binary);
        command.args(&args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ApplyError::Spawn {
                    direction,
                    command: self.command_line(&args),
                    source,
                })
            }
            Err(_) => {
                return Err(ApplyError::Timeout {
                    direction,
                    command: self.command_line(&args),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(ApplyError::ExitStatus {
                direction,
                command: self.command_line(&args),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        tracing::trace!(
            %direction,
            interface,
            rate_kbit = setpoint.rate_kbit,
            rtt_us = setpoint.rtt_micros,
            "tc qdisc replaced"
        );
        Ok(())
    }
}

/// Logs the `tc` command it would have run and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunShaper;

impl ShaperPort for DryRunShaper {
    async fn apply(&self, interface: &str, setpoint: &Setpoint) -> Result<(), ApplyError> {
        tracing::info!(
            direction = %setpoint.direction,
            command = %format!("tc {}", setpoint.tc_args(interface).join(" ")),
            "Dry run, not applying"
        );
        Ok(())
    }
}
