//! Slow-start / cubic-backoff rate controller.

use std::time::{Duration, Instant};

use crate::errors::ConfigError;
use crate::shaper::{Direction, Setpoint};
use crate::util::time_source::{InstantTimeSrc, TimeSource};

use super::config::RateControlConfig;
use super::state::ControlState;
use super::stats::RateControlStats;

#[derive(Debug, Clone, Copy)]
struct DirectionRate {
    current: f64,
    /// Rate at the most recent bufferbloat event.
    reference: f64,
    floor: f64,
    ceiling: f64,
}

impl DirectionRate {
    fn clamp(&self, rate: f64) -> f64 {
        if rate.is_nan() {
            return self.floor;
        }
        rate.clamp(self.floor, self.ceiling)
    }

    fn at_ceiling(&self) -> bool {
        self.current >= self.ceiling
    }
}

/// Rate controller for the uplink and downlink shapers.
///
/// Starts in [`ControlState::Growing`] at the configured floor and doubles the
/// rate of each direction every tick until it reaches 90% of the configured
/// maximum. A bufferbloat signal cuts both rates to `B × reference` (where the
/// reference is the rate at the moment of the signal) and the following ticks
/// climb back along a TCP-CUBIC style curve:
///
/// ```text
/// K       = cbrt(reference × (1 − B) / C)
/// rate(t) = C × (t − K)³ + reference
/// ```
///
/// with `t` the seconds elapsed since the signal. At `t = 0` the curve starts
/// at the cut rate, flattens around the reference at `t = K` and then grows
/// again until the ceiling, where the controller returns to `Growing`.
///
/// Every rate the controller produces is clamped to `[floor, ceiling]`.
///
/// The controller is not thread-safe and is meant to be owned by the control
/// loop. `T` is the clock used for the cubic curve; tests use
/// `SharedMockTimeSource`.
pub struct RateController<T: TimeSource = InstantTimeSrc> {
    config: RateControlConfig,
    time_source: T,
    state: ControlState,
    rates: [DirectionRate; 2],
    /// When the most recent bufferbloat event happened.
    event_time: Option<Instant>,
    rtt_target: Duration,
    split_gso: bool,

    total_backoffs: u64,
    total_recoveries: u64,
    total_ticks: u64,
}

impl RateController<InstantTimeSrc> {
    pub fn new(config: RateControlConfig) -> Result<Self, ConfigError> {
        Self::new_with_time_source(config, InstantTimeSrc::new())
    }
}

impl<T: TimeSource> RateController<T> {
    pub fn new_with_time_source(
        config: RateControlConfig,
        time_source: T,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let rates = Direction::ALL.map(|direction| DirectionRate {
            current: config.rate_floor_kbit,
            reference: config.rate_floor_kbit,
            floor: config.rate_floor_kbit,
            ceiling: config.ceiling(direction),
        });
        let rtt_target = config.clamp_rtt(config.initial_rtt);
        let split_gso = rates
            .iter()
            .any(|rate| rate.current < config.split_gso_threshold_kbit);

        Ok(Self {
            config,
            time_source,
            state: ControlState::Growing,
            rates,
            event_time: None,
            rtt_target,
            split_gso,
            total_backoffs: 0,
            total_recoveries: 0,
            total_ticks: 0,
        })
    }

    pub fn config(&self) -> &RateControlConfig {
        &self.config
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn rate(&self, direction: Direction) -> f64 {
        self.rates[direction.index()].current
    }

    pub fn reference_rate(&self, direction: Direction) -> f64 {
        self.rates[direction.index()].reference
    }

    pub fn rtt_target(&self) -> Duration {
        self.rtt_target
    }

    pub fn split_gso(&self) -> bool {
        self.split_gso
    }

    /// Handle a latency regression: enter `Backoff` and cut both rates.
    ///
    /// Takes effect immediately, whatever the current state. Repeated signals
    /// re-anchor the reference at the already reduced rate, so consecutive
    /// backoffs compound from where the previous one left off rather than
    /// from a stale reference.
    pub fn on_bufferbloat(&mut self) {
        let now = self.time_source.now();
        let previous_state = self.state;
        let backoff_fraction = self.config.backoff_fraction;

        for rate in &mut self.rates {
            rate.reference = rate.current;
            rate.current = rate.clamp(rate.reference * backoff_fraction);
        }
        self.event_time = Some(now);
        self.state = ControlState::Backoff;
        self.total_backoffs += 1;

        tracing::debug!(
            from = %previous_state,
            reference_up_kbit = self.rates[0].reference,
            reference_down_kbit = self.rates[1].reference,
            rate_up_kbit = self.rates[0].current,
            rate_down_kbit = self.rates[1].current,
            total_backoffs = self.total_backoffs,
            "Bufferbloat detected, backing off"
        );
    }

    /// Advance the controller by one tick and return the setpoints to apply.
    ///
    /// `rtt_mean` is the current mean of the RTT window, `None` when the
    /// window is empty; in that case the previous RTT target is kept.
    pub fn on_tick(&mut self, rtt_mean: Option<Duration>) -> [Setpoint; 2] {
        self.total_ticks += 1;

        match self.state {
            ControlState::Growing => {
                for rate in &mut self.rates {
                    rate.current = rate.clamp(rate.current * 2.0);
                }
            }
            ControlState::Backoff => {
                // The cut was applied when the signal arrived; this tick
                // pushes it to the shaper and starts the cubic recovery.
                self.state = ControlState::Recovering;
            }
            ControlState::Recovering => self.recover(),
        }

        if let Some(mean) = rtt_mean {
            self.rtt_target = self.config.clamp_rtt(mean);
        }

        let threshold = self.config.split_gso_threshold_kbit;
        self.split_gso = self.rates.iter().any(|rate| rate.current < threshold);

        let setpoints = self.setpoints();
        tracing::trace!(
            state = %self.state,
            rate_up_kbit = setpoints[0].rate_kbit,
            rate_down_kbit = setpoints[1].rate_kbit,
            rtt_us = setpoints[0].rtt_micros,
            split_gso = self.split_gso,
            "Rate controller tick"
        );
        setpoints
    }

    /// Setpoints for the current rates and RTT target, without advancing.
    pub fn setpoints(&self) -> [Setpoint; 2] {
        let rtt_micros = self.rtt_target.as_micros() as u64;
        Direction::ALL.map(|direction| Setpoint {
            direction,
            rate_kbit: self.rate(direction),
            rtt_micros,
            split_gso: self.split_gso,
        })
    }

    fn recover(&mut self) {
        let elapsed = self.seconds_since_event();
        let b = self.config.backoff_fraction;
        let c = self.config.cubic_c;

        for rate in &mut self.rates {
            rate.current = rate.clamp(cubic_rate(rate.reference, elapsed, b, c));
        }

        if self.rates.iter().all(DirectionRate::at_ceiling) {
            self.state = ControlState::Growing;
            self.total_recoveries += 1;
            tracing::debug!(
                elapsed_secs = elapsed,
                rate_up_kbit = self.rates[0].current,
                rate_down_kbit = self.rates[1].current,
                "Recovered to ceiling, resuming growth"
            );
        }
    }

    fn seconds_since_event(&self) -> f64 {
        self.event_time
            .map(|at| {
                self.time_source
                    .now()
                    .saturating_duration_since(at)
                    .as_secs_f64()
            })
            .unwrap_or(0.0)
    }

    pub fn stats(&self) -> RateControlStats {
        RateControlStats {
            state: self.state,
            upload_kbit: self.rate(Direction::Uplink),
            download_kbit: self.rate(Direction::Downlink),
            reference_upload_kbit: self.reference_rate(Direction::Uplink),
            reference_download_kbit: self.reference_rate(Direction::Downlink),
            rtt_target: self.rtt_target,
            split_gso: self.split_gso,
            since_last_backoff_secs: self.event_time.map(|_| self.seconds_since_event()),
            total_backoffs: self.total_backoffs,
            total_recoveries: self.total_recoveries,
            total_ticks: self.total_ticks,
        }
    }
}

/// Point of the cubic recovery curve `elapsed_secs` after a backoff from
/// `reference` with fraction `b` and concavity `c`.
pub fn cubic_rate(reference: f64, elapsed_secs: f64, b: f64, c: f64) -> f64 {
    let k = (reference * (1.0 - b) / c).cbrt();
    c * (elapsed_secs - k).powi(3) + reference
}
