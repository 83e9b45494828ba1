use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::rate_control::{millis, RateControlConfig};
use crate::shaper::Direction;

/// Default uplink interface (the physical WAN port).
pub const DEFAULT_UPLINK_INTERFACE: &str = "enp3s0";
/// Default downlink interface (the IFB mirroring ingress of the WAN port).
pub const DEFAULT_DOWNLINK_INTERFACE: &str = "ifb4enp3s0";
pub const DEFAULT_WINDOW_CAPACITY: usize = 10_000;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);
/// Consecutive apply failures before a direction is reported degraded.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_INGEST_QUEUE_CAPACITY: usize = 65_536;
pub const DEFAULT_TC_BINARY: &str = "tc";

/// Current version of the crate.
pub const PCK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Complete configuration of the shaper controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ShaperConfig {
    pub uplink_interface: String,
    pub downlink_interface: String,
    #[serde(flatten)]
    pub rate_control: RateControlConfig,
    /// Capacity of the RTT, rate and apply-duration windows.
    pub window_capacity: usize,
    #[serde(rename = "tick-interval-ms", with = "millis")]
    pub tick_interval: Duration,
    pub failure_threshold: u32,
    #[serde(rename = "apply-timeout-ms", with = "millis")]
    pub apply_timeout: Duration,
    pub ingest_queue_capacity: usize,
    pub tc_binary: PathBuf,
    /// Log `tc` commands instead of running them.
    pub dry_run: bool,
    /// Where to serve the status endpoint, disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_address: Option<SocketAddr>,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self {
            uplink_interface: DEFAULT_UPLINK_INTERFACE.to_owned(),
            downlink_interface: DEFAULT_DOWNLINK_INTERFACE.to_owned(),
            rate_control: RateControlConfig::default(),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            apply_timeout: DEFAULT_APPLY_TIMEOUT,
            ingest_queue_capacity: DEFAULT_INGEST_QUEUE_CAPACITY,
            tc_binary: PathBuf::from(DEFAULT_TC_BINARY),
            dry_run: false,
            metrics_address: None,
        }
    }
}

impl ShaperConfig {
    pub fn interface(&self, direction: Direction) -> &str {
        match direction {
            Direction::Uplink => &self.uplink_interface,
            Direction::Downlink => &self.downlink_interface,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for direction in Direction::ALL {
            if self.interface(direction).trim().is_empty() {
                return Err(ConfigError::EmptyInterface { direction });
            }
        }
        self.rate_control.validate()?;
        if self.window_capacity == 0 {
            return Err(ConfigError::Zero("window-capacity"));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Zero("tick-interval-ms"));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Zero("failure-threshold"));
        }
        if self.apply_timeout.is_zero() {
            return Err(ConfigError::Zero("apply-timeout-ms"));
        }
        if self.ingest_queue_capacity == 0 {
            return Err(ConfigError::Zero("ingest-queue-capacity"));
        }
        Ok(())
    }

    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        tracing::debug!(path = ?path, "Reading configuration file");
        toml::from_str(&content)
            .with_context(|| format!("parsing configuration file {}", path.display()))
    }
}

/// Command line and environment overrides.
///
/// Every value given here wins over the configuration file, which in turn
/// wins over the built-in defaults.
#[derive(clap::Parser, Debug, Clone, Default)]
#[command(name = "cakerate", version, about = "Adaptive CAKE bandwidth controller")]
pub struct ConfigArgs {
    /// TOML configuration file.
    #[arg(long, short, env = "CAKERATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "CAKERATE_LOG_LEVEL")]
    pub log_level: Option<tracing::level_filters::LevelFilter>,

    /// Interface shaped for upload traffic.
    #[arg(long, env = "CAKERATE_UPLINK_INTERFACE")]
    pub uplink_interface: Option<String>,

    /// Interface shaped for download traffic (usually an IFB device).
    #[arg(long, env = "CAKERATE_DOWNLINK_INTERFACE")]
    pub downlink_interface: Option<String>,

    /// Maximum upload rate advertised by the ISP, in kbit/s.
    #[arg(long, env = "CAKERATE_MAX_UPLOAD_KBIT")]
    pub max_upload_kbit: Option<f64>,

    /// Maximum download rate advertised by the ISP, in kbit/s.
    #[arg(long, env = "CAKERATE_MAX_DOWNLOAD_KBIT")]
    pub max_download_kbit: Option<f64>,

    /// Lowest rate ever set on either direction, in kbit/s.
    #[arg(long, env = "CAKERATE_RATE_FLOOR_KBIT")]
    pub rate_floor_kbit: Option<f64>,

    #[arg(long, env = "CAKERATE_WINDOW_CAPACITY")]
    pub window_capacity: Option<usize>,

    #[arg(long, env = "CAKERATE_TICK_INTERVAL_MS")]
    pub tick_interval_ms: Option<u64>,

    #[arg(long, env = "CAKERATE_MIN_RTT_MS")]
    pub min_rtt_ms: Option<u64>,

    #[arg(long, env = "CAKERATE_MAX_RTT_MS")]
    pub max_rtt_ms: Option<u64>,

    #[arg(long, env = "CAKERATE_INITIAL_RTT_MS")]
    pub initial_rtt_ms: Option<u64>,

    /// Fraction of the rate kept on a bufferbloat event (B).
    #[arg(long, env = "CAKERATE_BACKOFF_FRACTION")]
    pub backoff_fraction: Option<f64>,

    /// Concavity of the cubic recovery curve (C).
    #[arg(long, env = "CAKERATE_CUBIC_C")]
    pub cubic_c: Option<f64>,

    /// Below this rate (kbit/s) in either direction, use split-gso.
    #[arg(long, env = "CAKERATE_SPLIT_GSO_THRESHOLD_KBIT")]
    pub split_gso_threshold_kbit: Option<f64>,

    #[arg(long, env = "CAKERATE_FAILURE_THRESHOLD")]
    pub failure_threshold: Option<u32>,

    #[arg(long, env = "CAKERATE_APPLY_TIMEOUT_MS")]
    pub apply_timeout_ms: Option<u64>,

    #[arg(long, env = "CAKERATE_INGEST_QUEUE_CAPACITY")]
    pub ingest_queue_capacity: Option<usize>,

    #[arg(long, env = "CAKERATE_TC_BINARY")]
    pub tc_binary: Option<PathBuf>,

    /// Log the tc commands instead of running them.
    #[arg(long, env = "CAKERATE_DRY_RUN")]
    pub dry_run: bool,

    /// Serve the status endpoint on this address.
    #[arg(long, env = "CAKERATE_METRICS_ADDRESS")]
    pub metrics_address: Option<SocketAddr>,
}

impl ConfigArgs {
    pub fn current_version(&self) -> &str {
        PCK_VERSION
    }

    /// Resolve the final configuration: defaults, then file, then overrides.
    pub fn build(self) -> anyhow::Result<ShaperConfig> {
        let mut config = match &self.config {
            Some(path) => ShaperConfig::from_toml_file(path)?,
            None => ShaperConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply_overrides(self, config: &mut ShaperConfig) {
        let rate_control = &mut config.rate_control;
        if let Some(v) = self.uplink_interface {
            config.uplink_interface = v;
        }
        if let Some(v) = self.downlink_interface {
            config.downlink_interface = v;
        }
        if let Some(v) = self.max_upload_kbit {
            rate_control.max_upload_kbit = v;
        }
        if let Some(v) = self.max_download_kbit {
            rate_control.max_download_kbit = v;
        }
        if let Some(v) = self.rate_floor_kbit {
            rate_control.rate_floor_kbit = v;
        }
        if let Some(v) = self.min_rtt_ms {
            rate_control.min_rtt = Duration::from_millis(v);
        }
        if let Some(v) = self.max_rtt_ms {
            rate_control.max_rtt = Duration::from_millis(v);
        }
        if let Some(v) = self.initial_rtt_ms {
            rate_control.initial_rtt = Duration::from_millis(v);
        }
        if let Some(v) = self.backoff_fraction {
            rate_control.backoff_fraction = v;
        }
        if let Some(v) = self.cubic_c {
            rate_control.cubic_c = v;
        }
        if let Some(v) = self.split_gso_threshold_kbit {
            rate_control.split_gso_threshold_kbit = v;
        }
        if let Some(v) = self.window_capacity {
            config.window_capacity = v;
        }
        if let Some(v) = self.tick_interval_ms {
            config.tick_interval = Duration::from_millis(v);
        }
        if let Some(v) = self.failure_threshold {
            config.failure_threshold = v;
        }
        if let Some(v) = self.apply_timeout_ms {
            config.apply_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.ingest_queue_capacity {
            config.ingest_queue_capacity = v;
        }
        if let Some(v) = self.tc_binary {
            config.tc_binary = v;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(v) = self.metrics_address {
            config.metrics_address = Some(v);
        }
    }
}

pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Err(err) = crate::tracing::tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err:#}");
        }
    }
    #[cfg(not(feature = "trace"))]
    let _ = level;
}
