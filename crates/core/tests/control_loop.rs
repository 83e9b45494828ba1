use std::time::Duration;

use cakerate::config::ShaperConfig;
use cakerate::rate_control::{ControlState, RateControlConfig};
use cakerate::shaper::Direction;
use cakerate::ControlLoop;
use testresult::TestResult;

mod common;

use common::{CapturingShaper, ManualClock};

fn config() -> ShaperConfig {
    ShaperConfig {
        uplink_interface: "enp3s0".into(),
        downlink_interface: "ifb4enp3s0".into(),
        rate_control: RateControlConfig {
            max_upload_kbit: 20_000.0,
            max_download_kbit: 100_000.0,
            rate_floor_kbit: 500.0,
            ..Default::default()
        },
        window_capacity: 16,
        ..Default::default()
    }
}

#[test_log::test(tokio::test)]
async fn end_to_end_ramp_spike_and_recovery() -> TestResult {
    let shaper = CapturingShaper::default();
    let time = ManualClock::new();
    let (controller, mut control) =
        ControlLoop::new_with_time_source(&config(), shaper.clone(), time.clone())?;

    // Cold start.
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.rtt_average, Duration::ZERO);
    assert_eq!(snapshot.data_total, "0 of 16");
    assert!(snapshot.controller.is_none());

    // Stable link: both directions climb to 90% of their own maximum.
    for _ in 0..12 {
        controller.record_rtt(30_000_000)?;
        time.advance(Duration::from_millis(10));
        control.tick().await;
    }
    assert_eq!(control.controller().rate(Direction::Uplink), 18_000.0);
    assert_eq!(control.controller().rate(Direction::Downlink), 90_000.0);
    assert_eq!(control.controller().stats().total_backoffs, 0);

    // One latency spike.
    controller.record_rtt(120_000_000)?;
    control.tick().await;
    let stats = control.controller().stats();
    assert_eq!(stats.state, ControlState::Recovering);
    assert_eq!(stats.total_backoffs, 1);
    assert!((stats.upload_kbit - 12_600.0).abs() < 1e-9);
    assert!((stats.download_kbit - 63_000.0).abs() < 1e-9);

    // Recovery is bounded: the downlink curve (larger reference, K ≈ 41s) is the slow one.
    let mut ticks = 0;
    while control.controller().state() != ControlState::Growing {
        time.advance(Duration::from_secs(1));
        controller.record_rtt(30_000_000)?;
        control.tick().await;
        ticks += 1;
        assert!(ticks <= 60, "recovery did not converge");
    }

    // The window only keeps the last 16 samples.
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.sample_count, 16);
    assert_eq!(snapshot.data_total, "16 of 16");
    assert!(!snapshot.degraded);

    // Every tick applied both directions, uplink first.
    let setpoints = shaper.setpoints();
    assert_eq!(setpoints.len() as u64, 2 * snapshot.ticks);
    assert!(setpoints
        .chunks(2)
        .all(|pair| pair[0].direction == Direction::Uplink
            && pair[1].direction == Direction::Downlink));
    Ok(())
}

#[tokio::test]
async fn uplink_failure_does_not_block_downlink() -> TestResult {
    let shaper = CapturingShaper::default();
    shaper.fail_uplink(true);
    let (controller, mut control) = ControlLoop::new(&config(), shaper.clone())?;

    for _ in 0..6 {
        control.tick().await;
    }

    let snapshot = controller.snapshot();
    assert!(snapshot.health.uplink.degraded);
    assert_eq!(snapshot.health.uplink.consecutive_failures, 6);
    assert!(snapshot.health.uplink.last_applied.is_none());
    assert!(snapshot.health.uplink.last_error.is_some());
    assert!(!snapshot.health.downlink.degraded);
    assert_eq!(shaper.count_for(Direction::Downlink), 6);

    shaper.fail_uplink(false);
    control.tick().await;
    let snapshot = controller.snapshot();
    assert!(!snapshot.degraded);
    assert_eq!(
        snapshot.health.uplink.last_applied.map(|setpoint| setpoint.rate_kbit),
        Some(control.controller().rate(Direction::Uplink))
    );
    Ok(())
}

#[test]
fn invalid_configuration_is_rejected() {
    let config = ShaperConfig {
        uplink_interface: String::new(),
        ..config()
    };
    assert!(ControlLoop::new(&config, CapturingShaper::default()).is_err());
}
