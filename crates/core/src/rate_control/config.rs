//! Rate controller configuration and constants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::shaper::Direction;

/// 1 Mbit expressed in kbit.
pub const MBIT: f64 = 1_000.0;
/// 1 Gbit expressed in kbit.
pub const GBIT: f64 = 1_000_000.0;

/// Typical round-trip times by path class.
pub const METRO_RTT: Duration = Duration::from_millis(10);
pub const REGIONAL_RTT: Duration = Duration::from_millis(30);
pub const INTERNET_RTT: Duration = Duration::from_millis(100);
pub const OCEANIC_RTT: Duration = Duration::from_millis(300);
pub const SATELLITE_RTT: Duration = Duration::from_secs(1);

/// Rates are never pushed above this fraction of the configured maximum.
pub const CEILING_FRACTION: f64 = 0.9;

pub const DEFAULT_MAX_RATE_KBIT: f64 = 4.0 * GBIT;
pub const DEFAULT_RATE_FLOOR_KBIT: f64 = MBIT;
/// `tc` takes whole kbit and reads `0kbit` as unlimited, so no floor may go below this.
pub const MIN_RATE_FLOOR_KBIT: f64 = 1.0;
/// Multiplicative decrease applied on a bufferbloat event (B).
pub const DEFAULT_BACKOFF_FRACTION: f64 = 0.7;
/// Concavity of the cubic recovery curve (C).
pub const DEFAULT_CUBIC_C: f64 = 0.4;
/// Below this rate in either direction, large packets are split before shaping.
pub const DEFAULT_SPLIT_GSO_THRESHOLD_KBIT: f64 = 100.0 * MBIT;

/// Tuning of the rate controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateControlConfig {
    pub max_upload_kbit: f64,
    pub max_download_kbit: f64,
    /// Lower bound for both directions; must be positive.
    pub rate_floor_kbit: f64,
    #[serde(rename = "min-rtt-ms", with = "millis")]
    pub min_rtt: Duration,
    #[serde(rename = "max-rtt-ms", with = "millis")]
    pub max_rtt: Duration,
    /// RTT target used until the first sample arrives.
    #[serde(rename = "initial-rtt-ms", with = "millis")]
    pub initial_rtt: Duration,
    pub backoff_fraction: f64,
    pub cubic_c: f64,
    pub split_gso_threshold_kbit: f64,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            max_upload_kbit: DEFAULT_MAX_RATE_KBIT,
            max_download_kbit: DEFAULT_MAX_RATE_KBIT,
            rate_floor_kbit: DEFAULT_RATE_FLOOR_KBIT,
            min_rtt: METRO_RTT,
            max_rtt: SATELLITE_RTT,
            initial_rtt: INTERNET_RTT,
            backoff_fraction: DEFAULT_BACKOFF_FRACTION,
            cubic_c: DEFAULT_CUBIC_C,
            split_gso_threshold_kbit: DEFAULT_SPLIT_GSO_THRESHOLD_KBIT,
        }
    }
}

impl RateControlConfig {
    pub fn max_rate(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Uplink => self.max_upload_kbit,
            Direction::Downlink => self.max_download_kbit,
        }
    }

    /// Highest rate the controller will ever set for `direction`.
    pub fn ceiling(&self, direction: Direction) -> f64 {
        self.max_rate(direction) * CEILING_FRACTION
    }

    pub fn clamp_rtt(&self, rtt: Duration) -> Duration {
        rtt.clamp(self.min_rtt, self.max_rtt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for direction in Direction::ALL {
            let max = self.max_rate(direction);
            let floor = self.rate_floor_kbit;
            if !(floor >= MIN_RATE_FLOOR_KBIT && floor <= self.ceiling(direction)) {
                return Err(ConfigError::RateFloor {
                    direction,
                    floor,
                    max,
                });
            }
        }
        if self.min_rtt.is_zero() || self.min_rtt > self.max_rtt {
            return Err(ConfigError::RttBounds {
                min: self.min_rtt,
                max: self.max_rtt,
            });
        }
        if !(self.backoff_fraction > 0.0 && self.backoff_fraction < 1.0) {
            return Err(ConfigError::BackoffFraction(self.backoff_fraction));
        }
        if !(self.cubic_c > 0.0 && self.cubic_c.is_finite()) {
            return Err(ConfigError::CubicConstant(self.cubic_c));
        }
        let threshold = self.split_gso_threshold_kbit;
        if !(threshold >= 0.0 && threshold.is_finite()) {
            return Err(ConfigError::SplitGsoThreshold(threshold));
        }
        Ok(())
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
