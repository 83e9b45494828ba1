//! Adaptive rate control for the CAKE shapers.
//!
//! The controller keeps link utilization close to 90% of the configured
//! maximum while reacting to latency regressions:
//!
//! - **Growing**: exponential slow start, doubling every tick up to the ceiling.
//! - **Backoff**: on every bufferbloat signal the rate is cut to a fraction
//!   `B` of the rate at the time of the signal.
//! - **Recovering**: TCP-CUBIC style climb back towards (and past) the rate
//!   that triggered the backoff.
//!
//! Each tick also refreshes the RTT target from the RTT window mean and
//! decides whether CAKE should split GSO super-packets.

mod config;
mod controller;
mod state;
mod stats;


pub use config::{
    RateControlConfig, CEILING_FRACTION, DEFAULT_BACKOFF_FRACTION, DEFAULT_CUBIC_C,
    DEFAULT_MAX_RATE_KBIT, DEFAULT_RATE_FLOOR_KBIT, DEFAULT_SPLIT_GSO_THRESHOLD_KBIT, GBIT,
    INTERNET_RTT, MBIT, METRO_RTT, MIN_RATE_FLOOR_KBIT, OCEANIC_RTT, REGIONAL_RTT, SATELLITE_RTT,
};
pub(crate) use config::millis;
pub use controller::{cubic_rate, RateController};
pub use state::ControlState;
pub use stats::RateControlStats;
