//! The control loop and its ingestion handle.
//!
//! ```text
//!  record_rtt ──► bounded queue ──► ControlLoop::tick
//!                                    ├─ RTT window + detector (per sample)
//!                                    ├─ RateController::on_tick
//!                                    ├─ SetpointAdapter::apply (both directions)
//!                                    └─ SnapshotPublisher::publish
//!  snapshot ◄─────────────────────────────────┘
//! ```
//!
//! The loop is the single writer of the windows and of the controller.
//! [`ShaperController`] only ever touches the queue, a few atomic counters and
//! the published snapshot, so producers are never blocked by a shaper apply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::ShaperConfig;
use crate::detector::BufferbloatDetector;
use crate::errors::{ConfigError, SampleError};
use crate::rate_control::RateController;
use crate::shaper::{Direction, SetpointAdapter, ShaperPort};
use crate::snapshot::{HealthSnapshot, Snapshot, SnapshotInputs, SnapshotPublisher};
use crate::util::time_source::{InstantTimeSrc, TimeSource};
use crate::window::SlidingWindow;

/// An accepted RTT observation, tagged with its arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttSample {
    pub duration: Duration,
    pub seq: u64,
}

#[derive(Debug, Default)]
struct IngestCounters {
    next_seq: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
}

/// Cloneable handle used by RTT producers and snapshot readers.
#[derive(Clone)]
pub struct ShaperController {
    samples: Sender<RttSample>,
    counters: Arc<IngestCounters>,
    publisher: Arc<SnapshotPublisher>,
}

impl ShaperController {
    /// Queue an RTT sample given in nanoseconds. Never blocks.
    pub fn record_rtt(&self, duration_nanos: i64) -> Result<(), SampleError> {
        if duration_nanos <= 0 {
            return Err(self.reject(SampleError::NonPositive(duration_nanos)));
        }
        self.record_rtt_duration(Duration::from_nanos(duration_nanos as u64))
    }

    pub fn record_rtt_duration(&self, duration: Duration) -> Result<(), SampleError> {
        if duration.is_zero() {
            return Err(self.reject(SampleError::NonPositive(0)));
        }
        if duration.as_nanos() > u128::from(u64::MAX) {
            return Err(self.reject(SampleError::OutOfRange(duration)));
        }

        let sample = RttSample {
            duration,
            seq: self.counters.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        match self.samples.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(seq = sample.seq, "Ingestion queue full, dropping RTT sample");
                Err(SampleError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(SampleError::Stopped),
        }
    }

    /// Parse and queue one textual sample (see [`parse_rtt`]).
    pub fn record_rtt_str(&self, input: &str) -> Result<(), SampleError> {
        match parse_rtt(input) {
            Ok(duration) => self.record_rtt_duration(duration),
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.publisher.load()
    }

    pub fn ingestion_errors(&self) -> u64 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    pub fn dropped_samples(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    fn reject(&self, err: SampleError) -> SampleError {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(error = %err, "Rejected RTT sample");
        err
    }
}

/// Parse an RTT given as integer nanoseconds or with a `ns`, `us`, `µs`,
/// `ms` or `s` suffix, e.g. `"42ms"` or `"42000000"`.
pub fn parse_rtt(input: &str) -> Result<Duration, SampleError> {
    let input = input.trim();
    let (number, unit) = ["ns", "us", "µs", "ms", "s"]
        .iter()
        .find_map(|unit| input.strip_suffix(unit).map(|number| (number, *unit)))
        .unwrap_or((input, "ns"));

    let value: i64 = number
        .trim()
        .parse()
        .map_err(|_| SampleError::Malformed(input.to_owned()))?;
    if value <= 0 {
        return Err(SampleError::NonPositive(value));
    }

    let value = value as u64;
    Ok(match unit {
        "us" | "µs" => Duration::from_micros(value),
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        _ => Duration::from_nanos(value),
    })
}

/// Owns every piece of mutable controller state and drives it tick by tick.
pub struct ControlLoop<P, T: TimeSource = InstantTimeSrc> {
    samples: Receiver<RttSample>,
    counters: Arc<IngestCounters>,
    publisher: Arc<SnapshotPublisher>,
    rtt_window: SlidingWindow<Duration>,
    upload_window: SlidingWindow<f64>,
    download_window: SlidingWindow<f64>,
    apply_window: SlidingWindow<Duration>,
    last_apply: Duration,
    detector: BufferbloatDetector,
    controller: RateController<T>,
    adapter: SetpointAdapter<P>,
    tick_interval: Duration,
    ticks: u64,
}

impl<P: ShaperPort> ControlLoop<P> {
    pub fn new(config: &ShaperConfig, port: P) -> Result<(ShaperController, Self), ConfigError> {
        Self::new_with_time_source(config, port, InstantTimeSrc::new())
    }
}

impl<P: ShaperPort, T: TimeSource> ControlLoop<P, T> {
    pub fn new_with_time_source(
        config: &ShaperConfig,
        port: P,
        time_source: T,
    ) -> Result<(ShaperController, Self), ConfigError> {
        config.validate()?;
        let controller = RateController::new_with_time_source(config.rate_control.clone(), time_source)?;
        let (tx, rx) = channel::bounded(config.ingest_queue_capacity);
        let counters = Arc::new(IngestCounters::default());
        let publisher = Arc::new(SnapshotPublisher::new(Snapshot::empty(config.window_capacity)));

        let handle = ShaperController {
            samples: tx,
            counters: counters.clone(),
            publisher: publisher.clone(),
        };
        let control_loop = Self {
            samples: rx,
            counters,
            publisher,
            rtt_window: SlidingWindow::new(config.window_capacity),
            upload_window: SlidingWindow::new(config.window_capacity),
            download_window: SlidingWindow::new(config.window_capacity),
            apply_window: SlidingWindow::new(config.window_capacity),
            last_apply: Duration::ZERO,
            // The first sample has nothing to regress from.
            detector: BufferbloatDetector::new(Duration::MAX),
            controller,
            adapter: SetpointAdapter::new(
                port,
                config.uplink_interface.clone(),
                config.downlink_interface.clone(),
                config.failure_threshold,
            ),
            tick_interval: config.tick_interval,
            ticks: 0,
        };
        Ok((handle, control_loop))
    }

    pub fn controller(&self) -> &RateController<T> {
        &self.controller
    }

    pub fn adapter(&self) -> &SetpointAdapter<P> {
        &self.adapter
    }

    pub fn rtt_window(&self) -> &SlidingWindow<Duration> {
        &self.rtt_window
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one full control step: drain samples, update the controller,
    /// apply both setpoints and publish a fresh snapshot.
    pub async fn tick(&mut self) {
        let mut drained = 0usize;
        while let Ok(sample) = self.samples.try_recv() {
            drained += 1;
            self.rtt_window.push(sample.duration);
            if self.detector.observe(sample.duration) {
                tracing::debug!(
                    seq = sample.seq,
                    rtt_us = sample.duration.as_micros() as u64,
                    "Latency increase"
                );
                self.controller.on_bufferbloat();
            }
        }

        let rtt_mean = self.rtt_window.try_mean_duration().ok();
        let setpoints = self.controller.on_tick(rtt_mean);
        self.upload_window.push(setpoints[Direction::Uplink.index()].rate_kbit);
        self.download_window.push(setpoints[Direction::Downlink.index()].rate_kbit);

        let report = self.adapter.apply(&setpoints).await;
        self.last_apply = report.elapsed;
        self.apply_window.push(report.elapsed);
        self.ticks += 1;

        tracing::trace!(
            tick = self.ticks,
            drained,
            apply_us = report.elapsed.as_micros() as u64,
            failures = report.failures,
            "Control loop tick"
        );
        self.publish();
    }

    fn publish(&self) {
        let snapshot = Snapshot::from_inputs(SnapshotInputs {
            rtt_average: self.rtt_window.mean_duration(),
            bw_up_average: self.upload_window.mean(),
            bw_down_average: self.download_window.mean(),
            bw_up_median: self.upload_window.median(),
            bw_down_median: self.download_window.median(),
            sample_count: self.rtt_window.len(),
            window_capacity: self.rtt_window.capacity(),
            exec_time_last: self.last_apply,
            exec_time_average: self.apply_window.mean_duration(),
            controller: Some(self.controller.stats()),
            health: HealthSnapshot {
                uplink: self.adapter.health(Direction::Uplink).clone(),
                downlink: self.adapter.health(Direction::Downlink).clone(),
            },
            ingestion_errors: self.counters.errors.load(Ordering::Relaxed),
            dropped_samples: self.counters.dropped.load(Ordering::Relaxed),
            ticks: self.ticks,
        });
        self.publisher.publish(snapshot);
    }

    /// Tick on a fixed interval until `shutdown` turns `true` or its sender
    /// goes away. Shutdown is only observed between ticks.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            uplink = self.adapter.interface(Direction::Uplink),
            downlink = self.adapter.interface(Direction::Downlink),
            tick_ms = self.tick_interval.as_millis() as u64,
            "Control loop started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => self.tick().await,
            }
        }

        tracing::info!(ticks = self.ticks, "Control loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::rate_control::{ControlState, RateControlConfig};
    use crate::shaper::RecordingShaper;
    use crate::util::time_source::SharedMockTimeSource;

    const RTT_50MS: i64 = 50_000_000;

    fn small_link() -> ShaperConfig {
        ShaperConfig {
            uplink_interface: "wan0".into(),
            downlink_interface: "ifb4wan0".into(),
            rate_control: RateControlConfig {
                max_upload_kbit: 10_000.0,
                max_download_kbit: 10_000.0,
                rate_floor_kbit: 100.0,
                ..Default::default()
            },
            window_capacity: 64,
            failure_threshold: 2,
            ..Default::default()
        }
    }

    struct Fixture {
        handle: ShaperController,
        control: ControlLoop<RecordingShaper, SharedMockTimeSource>,
        shaper: RecordingShaper,
        time: SharedMockTimeSource,
    }

    fn fixture(config: ShaperConfig) -> Fixture {
        let shaper = RecordingShaper::new();
        let time = SharedMockTimeSource::new(Instant::now());
        let (handle, control) =
            ControlLoop::new_with_time_source(&config, shaper.clone(), time.clone()).unwrap();
        Fixture {
            handle,
            control,
            shaper,
            time,
        }
    }

    #[test]
    fn parses_plain_and_suffixed_samples() {
        assert_eq!(parse_rtt("1500"), Ok(Duration::from_nanos(1_500)));
        assert_eq!(parse_rtt(" 42ms\n"), Ok(Duration::from_millis(42)));
        assert_eq!(parse_rtt("250us"), Ok(Duration::from_micros(250)));
        assert_eq!(parse_rtt("250µs"), Ok(Duration::from_micros(250)));
        assert_eq!(parse_rtt("2s"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_rtt("7ns"), Ok(Duration::from_nanos(7)));
        assert_eq!(parse_rtt("-3ms"), Err(SampleError::NonPositive(-3)));
        assert_eq!(parse_rtt("0"), Err(SampleError::NonPositive(0)));
        assert_eq!(
            parse_rtt("fast"),
            Err(SampleError::Malformed("fast".to_owned()))
        );
        assert!(parse_rtt("").is_err());
    }

    #[test]
    fn cold_start_snapshot_is_neutral() {
        let fx = fixture(small_link());
        let snapshot = fx.handle.snapshot();
        assert_eq!(snapshot.rtt_average, Duration::ZERO);
        assert_eq!(snapshot.bw_up_average, 0.0);
        assert_eq!(snapshot.bw_down_median, 0.0);
        assert_eq!(snapshot.data_total, "0 of 64");
        assert_eq!(snapshot.exec_time_average, Duration::ZERO);
        assert_eq!(snapshot.ticks, 0);
    }

    #[test_log::test(tokio::test)]
    async fn rejected_samples_are_counted_and_ignored() {
        let mut fx = fixture(small_link());

        assert_eq!(fx.handle.record_rtt(0), Err(SampleError::NonPositive(0)));
        assert_eq!(fx.handle.record_rtt(-10), Err(SampleError::NonPositive(-10)));
        assert!(fx.handle.record_rtt_str("garbage").is_err());
        fx.control.tick().await;

        let snapshot = fx.handle.snapshot();
        assert_eq!(snapshot.ingestion_errors, 3);
        assert_eq!(snapshot.sample_count, 0);
        assert_eq!(fx.control.controller().stats().total_backoffs, 0);
        // Empty window: the initial target is held.
        assert_eq!(fx.control.controller().rtt_target(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn stable_link_ramps_up_without_backoff() {
        let mut fx = fixture(small_link());

        for _ in 0..10 {
            fx.handle.record_rtt(RTT_50MS).unwrap();
            fx.control.tick().await;
        }

        let uplink: Vec<f64> = fx
            .shaper
            .applies_for(Direction::Uplink)
            .iter()
            .map(|apply| apply.setpoint.rate_kbit)
            .collect();
        assert_eq!(uplink.len(), 10);
        assert!(uplink.windows(2).all(|pair| pair[1] >= pair[0]));
        assert_eq!(uplink.last(), Some(&9_000.0));
        assert_eq!(fx.control.controller().state(), ControlState::Growing);

        let snapshot = fx.handle.snapshot();
        assert_eq!(snapshot.rtt_average, Duration::from_millis(50));
        // 200, 400, ..., 6400 then four ticks at the ceiling.
        assert_eq!(snapshot.bw_up_median, 4_800.0);
        assert_eq!(snapshot.bw_down_median, 4_800.0);
        assert_eq!(snapshot.data_total, "10 of 64");
        assert_eq!(snapshot.ticks, 10);
        assert_eq!(
            fx.shaper.applies().last().map(|apply| apply.tc_args()),
            Some(
                [
                    "qdisc", "replace", "dev", "ifb4wan0", "root", "cake", "rtt", "50000us",
                    "bandwidth", "9000kbit", "split-gso",
                ]
                .map(String::from)
                .to_vec()
            )
        );
    }

    #[tokio::test]
    async fn spike_cuts_rate_within_the_same_tick() {
        let mut fx = fixture(small_link());
        for _ in 0..8 {
            fx.handle.record_rtt(RTT_50MS).unwrap();
            fx.control.tick().await;
        }
        fx.shaper.clear();

        fx.handle.record_rtt(RTT_50MS).unwrap();
        fx.handle.record_rtt(200_000_000).unwrap();
        fx.control.tick().await;

        let applied = fx.shaper.applies_for(Direction::Uplink);
        assert!((applied[0].setpoint.rate_kbit - 6_300.0).abs() < 1e-9);
        assert_eq!(fx.control.controller().state(), ControlState::Recovering);

        let mut previous = applied[0].setpoint.rate_kbit;
        for _ in 0..25 {
            fx.time.advance_time(Duration::from_secs(1));
            fx.handle.record_rtt(RTT_50MS).unwrap();
            fx.control.tick().await;
            let rate = fx.control.controller().rate(Direction::Uplink);
            assert!(rate >= previous);
            previous = rate;
        }
        assert_eq!(previous, 9_000.0);
        assert_eq!(fx.control.controller().state(), ControlState::Growing);
    }

    #[tokio::test]
    async fn every_regression_in_a_burst_backs_off() {
        let mut fx = fixture(small_link());
        for rtt_ms in [10, 20, 30, 40] {
            fx.handle.record_rtt_duration(Duration::from_millis(rtt_ms)).unwrap();
        }
        fx.control.tick().await;
        assert_eq!(fx.control.controller().stats().total_backoffs, 3);
    }

    #[tokio::test]
    async fn lowest_floor_never_reaches_tc_as_unlimited() {
        let sub_kbit = ShaperConfig {
            rate_control: RateControlConfig {
                rate_floor_kbit: 0.4,
                ..small_link().rate_control
            },
            ..small_link()
        };
        assert!(matches!(
            ControlLoop::new(&sub_kbit, RecordingShaper::new()),
            Err(ConfigError::RateFloor { .. })
        ));

        let one_kbit = ShaperConfig {
            rate_control: RateControlConfig {
                rate_floor_kbit: 1.0,
                ..small_link().rate_control
            },
            ..small_link()
        };
        let mut fx = fixture(one_kbit);
        for rtt_us in 1..=60 {
            fx.handle
                .record_rtt_duration(Duration::from_micros(30_000 + rtt_us))
                .unwrap();
        }
        fx.control.tick().await;

        assert_eq!(fx.control.controller().rate(Direction::Uplink), 1.0);
        for apply in fx.shaper.applies() {
            let args = apply.tc_args();
            assert_eq!(args[8], "bandwidth");
            assert_eq!(args[9], "1kbit");
        }
    }

    #[tokio::test]
    async fn full_queue_drops_samples() {
        let config = ShaperConfig {
            ingest_queue_capacity: 2,
            ..small_link()
        };
        let mut fx = fixture(config);

        fx.handle.record_rtt(RTT_50MS).unwrap();
        fx.handle.record_rtt(RTT_50MS).unwrap();
        assert_eq!(fx.handle.record_rtt(RTT_50MS), Err(SampleError::QueueFull));
        assert_eq!(fx.handle.dropped_samples(), 1);

        fx.control.tick().await;
        fx.handle.record_rtt(RTT_50MS).unwrap();
        assert_eq!(fx.handle.snapshot().dropped_samples, 1);
    }

    #[tokio::test]
    async fn failing_direction_is_reported_degraded() {
        let mut fx = fixture(small_link());
        fx.shaper.set_failing(Direction::Downlink, true);

        fx.control.tick().await;
        assert!(!fx.handle.snapshot().degraded);
        fx.control.tick().await;

        let snapshot = fx.handle.snapshot();
        assert!(snapshot.degraded);
        assert!(snapshot.health.downlink.degraded);
        assert!(!snapshot.health.uplink.degraded);
        assert_eq!(snapshot.health.uplink.total_applies, 2);
        // The in-memory setpoint keeps advancing.
        assert_eq!(fx.control.controller().rate(Direction::Downlink), 400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_shutdown() {
        let fx = fixture(small_link());
        let (tx, rx) = watch::channel(false);
        let handle = fx.handle.clone();

        let task = tokio::spawn(fx.control.run(rx));
        tokio::time::sleep(Duration::from_millis(55)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(handle.snapshot().ticks >= 5);
        assert_eq!(handle.record_rtt(RTT_50MS), Err(SampleError::Stopped));
    }
}
