use std::time::{Duration, Instant};

use serde::Serialize;

use super::{Direction, Setpoint, ShaperPort};

/// Apply bookkeeping for one direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionHealth {
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_applies: u64,
    /// Set once `consecutive_failures` reaches the configured threshold.
    pub degraded: bool,
    /// Whether the most recent tick's apply for this direction succeeded.
    pub applied_last_tick: bool,
    /// Last setpoint the shaper accepted.
    pub last_applied: Option<Setpoint>,
    pub last_error: Option<String>,
}

/// Outcome of applying one tick's pair of setpoints.
#[derive(Debug, Clone, Copy)]
pub struct ApplyReport {
    pub elapsed: Duration,
    pub failures: usize,
}

/// Pushes setpoints to a [`ShaperPort`], one direction after the other.
///
/// Taking `&mut self` for [`apply`](Self::apply) keeps invocations for a
/// direction serialized: the next tick cannot start until both awaits of the
/// current one have returned.
pub struct SetpointAdapter<P> {
    port: P,
    interfaces: [String; 2],
    failure_threshold: u32,
    health: [DirectionHealth; 2],
}

impl<P: ShaperPort> SetpointAdapter<P> {
    pub fn new(
        port: P,
        uplink_interface: impl Into<String>,
        downlink_interface: impl Into<String>,
        failure_threshold: u32,
    ) -> Self {
        Self {
            port,
            interfaces: [uplink_interface.into(), downlink_interface.into()],
            failure_threshold: failure_threshold.max(1),
            health: Default::default(),
        }
    }

    pub fn interface(&self, direction: Direction) -> &str {
        &self.interfaces[direction.index()]
    }

    pub fn health(&self, direction: Direction) -> &DirectionHealth {
        &self.health[direction.index()]
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Apply every setpoint in order. A failure for one direction is recorded
    /// and does not prevent the remaining directions from being applied.
    pub async fn apply(&mut self, setpoints: &[Setpoint]) -> ApplyReport {
        let started = Instant::now();
        let mut failures = 0;

        for setpoint in setpoints {
            let idx = setpoint.direction.index();
            let result = self.port.apply(&self.interfaces[idx], setpoint).await;
            let health = &mut self.health[idx];
            health.total_applies += 1;

            match result {
                Ok(()) => {
                    if health.degraded {
                        tracing::info!(
                            direction = %setpoint.direction,
                            after_failures = health.consecutive_failures,
                            "Shaper apply recovered"
                        );
                    }
                    health.consecutive_failures = 0;
                    health.degraded = false;
                    health.applied_last_tick = true;
                    health.last_applied = Some(*setpoint);
                    health.last_error = None;
                }
                Err(err) => {
                    failures += 1;
                    health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                    health.total_failures += 1;
                    health.applied_last_tick = false;
                    health.last_error = Some(err.to_string());

                    tracing::warn!(
                        direction = %setpoint.direction,
                        consecutive_failures = health.consecutive_failures,
                        error = %err,
                        "Shaper apply failed"
                    );

                    if !health.degraded && health.consecutive_failures >= self.failure_threshold {
                        health.degraded = true;
                        tracing::error!(
                            direction = %setpoint.direction,
                            threshold = self.failure_threshold,
                            last_applied = ?health.last_applied,
                            "Shaper apply failing repeatedly, marking direction degraded"
                        );
                    }
                }
            }
        }

        ApplyReport {
            elapsed: started.elapsed(),
            failures,
        }
    }
}
