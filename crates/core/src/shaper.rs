//! Shaper control port and setpoint application.
//!
//! The rate controller never talks to the kernel directly. It produces one
//! [`Setpoint`] per direction per tick and hands both to the
//! [`SetpointAdapter`], which drives a [`ShaperPort`]: the real
//! [`TcShaper`] spawns `tc`, [`DryRunShaper`] only logs, and
//! `RecordingShaper` (with the `testing` feature) records commands for tests.

use std::fmt;
use std::future::Future;

use serde::Serialize;

use crate::errors::ApplyError;

mod adapter;
#[cfg(any(test, feature = "testing"))]
mod mock;
mod tc;

pub use adapter::{ApplyReport, DirectionHealth, SetpointAdapter};
#[cfg(any(test, feature = "testing"))]
pub use mock::{RecordedApply, RecordingShaper};
pub use tc::{DryRunShaper, TcShaper};

/// Interface role a setpoint is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Uplink, Direction::Downlink];

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Uplink => 0,
            Direction::Downlink => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Uplink => f.write_str("uplink"),
            Direction::Downlink => f.write_str("downlink"),
        }
    }
}

/// Rate, latency and segmentation parameters for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setpoint {
    pub direction: Direction,
    pub rate_kbit: f64,
    pub rtt_micros: u64,
    pub split_gso: bool,
}

impl Setpoint {
    pub fn segmentation_mode(&self) -> &'static str {
        if self.split_gso {
            "split-gso"
        } else {
            "no-split-gso"
        }
    }

    /// Arguments of the `tc` invocation that enforces this setpoint on `interface`.
    ///
    /// `tc qdisc replace dev <iface> root cake rtt <N>us bandwidth <R>kbit <mode>`
    pub fn tc_args(&self, interface: &str) -> Vec<String> {
        vec![
            "qdisc".to_owned(),
            "replace".to_owned(),
            "dev".to_owned(),
            interface.to_owned(),
            "root".to_owned(),
            "cake".to_owned(),
            "rtt".to_owned(),
            format!("{}us", self.rtt_micros),
            "bandwidth".to_owned(),
            format!("{}kbit", self.rate_kbit.round() as u64),
            self.segmentation_mode().to_owned(),
        ]
    }
}

/// Narrow interface to the external shaper.
///
/// Implementations are invoked from the control loop only, one direction at a
/// time, and must not retry on their own.
pub trait ShaperPort: Send + Sync {
    fn apply(
        &self,
        interface: &str,
        setpoint: &Setpoint,
    ) -> impl Future<Output = Result<(), ApplyError>> + Send;
}
