//! Published controller metrics.
//!
//! The control loop builds a fresh [`Snapshot`] at the end of every tick and
//! swaps it into a [`SnapshotPublisher`]. Readers get an `Arc` to the latest
//! complete snapshot and never contend with the loop for the windows or the
//! controller state.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::rate_control::{RateControlStats, MBIT};
use crate::shaper::DirectionHealth;

/// Per-direction apply health.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSnapshot {
    pub uplink: DirectionHealth,
    pub downlink: DirectionHealth,
}

impl HealthSnapshot {
    pub fn degraded(&self) -> bool {
        self.uplink.degraded || self.downlink.degraded
    }
}

/// Immutable summary of the controller after a tick.
///
/// Field names in the serialized form match what existing dashboards read
/// from the `/cake` endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Mean of the RTT window, in nanoseconds.
    #[serde(with = "nanos")]
    pub rtt_average: Duration,
    pub rtt_average_string: String,
    pub bw_up_average: f64,
    pub bw_up_average_string: String,
    pub bw_down_average: f64,
    pub bw_down_average_string: String,
    pub bw_up_median: f64,
    pub bw_up_median_string: String,
    pub bw_down_median: f64,
    pub bw_down_median_string: String,
    /// `"<retained> of <capacity>"`.
    pub data_total: String,
    pub sample_count: usize,
    pub window_capacity: usize,
    #[serde(with = "nanos")]
    pub exec_time_last: Duration,
    #[serde(rename = "execTimeCAKE")]
    pub exec_time_cake: String,
    #[serde(with = "nanos")]
    pub exec_time_average: Duration,
    #[serde(rename = "execTimeAverageCAKE")]
    pub exec_time_average_cake: String,
    pub controller: Option<RateControlStats>,
    pub health: HealthSnapshot,
    pub degraded: bool,
    pub ingestion_errors: u64,
    pub dropped_samples: u64,
    pub ticks: u64,
}

/// Aggregates the control loop hands over when publishing.
#[derive(Debug, Clone, Default)]
pub struct SnapshotInputs {
    pub rtt_average: Duration,
    pub bw_up_average: f64,
    pub bw_down_average: f64,
    pub bw_up_median: f64,
    pub bw_down_median: f64,
    pub sample_count: usize,
    pub window_capacity: usize,
    pub exec_time_last: Duration,
    pub exec_time_average: Duration,
    pub controller: Option<RateControlStats>,
    pub health: HealthSnapshot,
    pub ingestion_errors: u64,
    pub dropped_samples: u64,
    pub ticks: u64,
}

impl Snapshot {
    /// Snapshot served before the first tick: every statistic is zero.
    pub fn empty(window_capacity: usize) -> Self {
        Self::from_inputs(SnapshotInputs {
            window_capacity,
            ..Default::default()
        })
    }

    pub fn from_inputs(inputs: SnapshotInputs) -> Self {
        let degraded = inputs.health.degraded();
        Self {
            rtt_average: inputs.rtt_average,
            rtt_average_string: format_duration(inputs.rtt_average),
            bw_up_average: inputs.bw_up_average,
            bw_up_average_string: format_rate(inputs.bw_up_average),
            bw_down_average: inputs.bw_down_average,
            bw_down_average_string: format_rate(inputs.bw_down_average),
            bw_up_median: inputs.bw_up_median,
            bw_up_median_string: format_rate(inputs.bw_up_median),
            bw_down_median: inputs.bw_down_median,
            bw_down_median_string: format_rate(inputs.bw_down_median),
            data_total: format!("{} of {}", inputs.sample_count, inputs.window_capacity),
            sample_count: inputs.sample_count,
            window_capacity: inputs.window_capacity,
            exec_time_last: inputs.exec_time_last,
            exec_time_cake: format_duration(inputs.exec_time_last),
            exec_time_average: inputs.exec_time_average,
            exec_time_average_cake: format_duration(inputs.exec_time_average),
            controller: inputs.controller,
            health: inputs.health,
            degraded,
            ingestion_errors: inputs.ingestion_errors,
            dropped_samples: inputs.dropped_samples,
            ticks: inputs.ticks,
        }
    }
}

/// `"12.34 ms | 12340.00 μs"`
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos() as f64;
    format!("{:.2} ms | {:.2} μs", nanos / 1_000_000.0, nanos / 1_000.0)
}

/// `"2500.00 kbit | 2.50 Mbit"`
pub fn format_rate(kbit: f64) -> String {
    format!("{:.2} kbit | {:.2} Mbit", kbit, kbit / MBIT)
}

/// Latest published [`Snapshot`], swapped atomically.
pub struct SnapshotPublisher {
    current: ArcSwap<Snapshot>,
}

impl SnapshotPublisher {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }
}

mod nanos {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_snapshot_is_all_zero() {
        let snapshot = Snapshot::empty(10_000);
        assert_eq!(snapshot.rtt_average, Duration::ZERO);
        assert_eq!(snapshot.rtt_average_string, "0.00 ms | 0.00 μs");
        assert_eq!(snapshot.bw_up_median_string, "0.00 kbit | 0.00 Mbit");
        assert_eq!(snapshot.data_total, "0 of 10000");
        assert!(snapshot.controller.is_none());
        assert!(!snapshot.degraded);
    }

    #[test]
    fn human_strings_match_dashboard_format() {
        assert_eq!(
            format_duration(Duration::from_micros(12_346)),
            "12.35 ms | 12346.00 μs"
        );
        assert_eq!(format_rate(2_500.0), "2500.00 kbit | 2.50 Mbit");
    }

    #[test]
    fn serializes_with_dashboard_field_names() {
        let snapshot = Snapshot::from_inputs(SnapshotInputs {
            rtt_average: Duration::from_millis(50),
            bw_up_average: 1_000.0,
            sample_count: 3,
            window_capacity: 8,
            ..Default::default()
        });
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["rttAverage"], 50_000_000u64);
        assert_eq!(json["bwUpAverage"], 1_000.0);
        assert_eq!(json["dataTotal"], "3 of 8");
        assert!(json.get("execTimeCAKE").is_some());
        assert!(json.get("execTimeAverageCAKE").is_some());
        assert_eq!(json["health"]["uplink"]["consecutiveFailures"], 0);
    }

    #[test]
    fn publisher_swaps_whole_snapshots() {
        let publisher = SnapshotPublisher::new(Snapshot::empty(4));
        let before = publisher.load();

        publisher.publish(Snapshot::from_inputs(SnapshotInputs {
            sample_count: 2,
            window_capacity: 4,
            ..Default::default()
        }));

        assert_eq!(before.sample_count, 0);
        assert_eq!(publisher.load().data_total, "2 of 4");
    }
}
