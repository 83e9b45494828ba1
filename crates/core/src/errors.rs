use std::time::Duration;

use thiserror::Error;

use crate::shaper::Direction;

/// Rejected RTT sample. Never affects controller state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SampleError {
    #[error("non-positive rtt duration: {0}ns")]
    NonPositive(i64),

    #[error("rtt duration out of range: {0:?}")]
    OutOfRange(Duration),

    #[error("malformed rtt sample: {0:?}")]
    Malformed(String),

    #[error("ingestion queue full, sample dropped")]
    QueueFull,

    #[error("control loop stopped")]
    Stopped,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    #[error("statistic requested on an empty window")]
    Underflow,
}

/// Failed invocation of the external shaper for one direction.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to spawn `{command}` for {direction}: {source}")]
    Spawn {
        direction: Direction,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` for {direction} exited with {code:?}: {stderr}")]
    ExitStatus {
        direction: Direction,
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` for {direction} timed out after {timeout:?}")]
    Timeout {
        direction: Direction,
        command: String,
        timeout: Duration,
    },
}

impl ApplyError {
    pub fn direction(&self) -> Direction {
        match self {
            ApplyError::Spawn { direction, .. }
            | ApplyError::ExitStatus { direction, .. }
            | ApplyError::Timeout { direction, .. } => *direction,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{direction} interface name must not be empty")]
    EmptyInterface { direction: Direction },

    #[error("rate floor ({floor} kbit) must be at least 1 kbit and at most 90% of max {direction} rate ({max} kbit)")]
    RateFloor {
        direction: Direction,
        floor: f64,
        max: f64,
    },

    #[error("rtt bounds are inverted or zero: min {min:?}, max {max:?}")]
    RttBounds { min: Duration, max: Duration },

    #[error("backoff fraction must be in (0, 1), got {0}")]
    BackoffFraction(f64),

    #[error("cubic concavity constant must be positive, got {0}")]
    CubicConstant(f64),

    #[error("split-gso threshold must be a non-negative number, got {0} kbit")]
    SplitGsoThreshold(f64),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
