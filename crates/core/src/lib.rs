//! Adaptive bandwidth and latency controller for the CAKE queueing discipline.
//!
//! RTT samples observed on live traffic are fed to a [`ShaperController`]
//! handle. A [`ControlLoop`] drains them on a fixed tick, detects latency
//! regressions, runs the rate controller and pushes the resulting rate / RTT
//! setpoints to the kernel shaper through a [`shaper::ShaperPort`].

/// Configuration file, command line and logger setup.
pub mod config;

/// Bufferbloat detection over consecutive RTT observations.
pub mod detector;

pub mod errors;

/// Growing / backoff / cubic recovery state machine.
pub mod rate_control;

/// Optional HTTP status endpoint.
pub mod server;

/// Ingestion handle and the control loop that owns all mutable state.
pub mod service;

/// Shaper command contract and its implementations.
pub mod shaper;

/// Published statistics.
pub mod snapshot;

/// Log subscriber setup.
pub mod tracing;

pub mod util;

/// Fixed-capacity sample windows.
pub mod window;

pub use service::{ControlLoop, ShaperController};
