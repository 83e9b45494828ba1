use std::sync::Arc;
use std::time::{Duration, Instant};

use cakerate::errors::ApplyError;
use cakerate::shaper::{Direction, Setpoint, ShaperPort};
use cakerate::util::time_source::TimeSource;
use parking_lot::Mutex;

/// Clock moved forward by hand; clones share it.
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<Instant>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn advance(&self, duration: Duration) {
        *self.0.lock() += duration;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock()
    }
}

#[derive(Default)]
struct Calls {
    setpoints: Vec<Setpoint>,
    failing_uplink: bool,
}

/// Remembers every setpoint it is asked to apply; uplink applies can be made to fail.
#[derive(Clone, Default)]
pub struct CapturingShaper(Arc<Mutex<Calls>>);

impl CapturingShaper {
    pub fn fail_uplink(&self, failing: bool) {
        self.0.lock().failing_uplink = failing;
    }

    pub fn setpoints(&self) -> Vec<Setpoint> {
        self.0.lock().setpoints.clone()
    }

    pub fn count_for(&self, direction: Direction) -> usize {
        self.setpoints()
            .iter()
            .filter(|setpoint| setpoint.direction == direction)
            .count()
    }
}

impl ShaperPort for CapturingShaper {
    async fn apply(&self, interface: &str, setpoint: &Setpoint) -> Result<(), ApplyError> {
        let mut calls = self.0.lock();
        calls.setpoints.push(*setpoint);
        if calls.failing_uplink && setpoint.direction == Direction::Uplink {
            return Err(ApplyError::ExitStatus {
                direction: setpoint.direction,
                command: format!("tc {}", setpoint.tc_args(interface).join(" ")),
                code: Some(2),
                stderr: "RTNETLINK answers: Operation not permitted".to_owned(),
            });
        }
        Ok(())
    }
}
