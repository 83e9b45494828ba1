use std::time::Duration;

use serde::Serialize;

use super::state::ControlState;

/// Point-in-time view of the rate controller for telemetry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateControlStats {
    pub state: ControlState,
    pub upload_kbit: f64,
    pub download_kbit: f64,
    /// Rates recorded at the most recent bufferbloat event.
    pub reference_upload_kbit: f64,
    pub reference_download_kbit: f64,
    pub rtt_target: Duration,
    pub split_gso: bool,
    /// Seconds since the most recent bufferbloat event, if any.
    pub since_last_backoff_secs: Option<f64>,
    pub total_backoffs: u64,
    pub total_recoveries: u64,
    pub total_ticks: u64,
}
