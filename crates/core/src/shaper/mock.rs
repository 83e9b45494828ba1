use std::sync::Arc;

use parking_lot::Mutex;

use super::{Direction, Setpoint, ShaperPort};
use crate::errors::ApplyError;

/// One call received by a [`RecordingShaper`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedApply {
    pub interface: String,
    pub setpoint: Setpoint,
    pub succeeded: bool,
}

impl RecordedApply {
    /// The `tc` arguments this call stands for.
    pub fn tc_args(&self) -> Vec<String> {
        self.setpoint.tc_args(&self.interface)
    }
}

#[derive(Default)]
struct Recorder {
    applies: Vec<RecordedApply>,
    failing: [bool; 2],
}

/// In-memory [`ShaperPort`] that records every call and can be told to fail.
///
/// Clones share the same record, so a test keeps one clone and hands the
/// other to the control loop.
#[derive(Clone, Default)]
pub struct RecordingShaper {
    inner: Arc<Mutex<Recorder>>,
}

impl RecordingShaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent apply for `direction` fail (or succeed again).
    pub fn set_failing(&self, direction: Direction, failing: bool) {
        self.inner.lock().failing[direction.index()] = failing;
    }

    pub fn applies(&self) -> Vec<RecordedApply> {
        self.inner.lock().applies.clone()
    }

    pub fn applies_for(&self, direction: Direction) -> Vec<RecordedApply> {
        self.inner
            .lock()
            .applies
            .iter()
            .filter(|apply| apply.setpoint.direction == direction)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().applies.clear();
    }
}

impl ShaperPort for RecordingShaper {
    async fn apply(&self, interface: &str, setpoint: &Setpoint) -> Result<(), ApplyError> {
        let failing = {
            let mut inner = self.inner.lock();
            let failing = inner.failing[setpoint.direction.index()];
            inner.applies.push(RecordedApply {
                interface: interface.to_owned(),
                setpoint: *setpoint,
                succeeded: !failing,
            });
            failing
        };

        if failing {
            return Err(ApplyError::ExitStatus {
                direction: setpoint.direction,
                command: format!("tc {}", setpoint.tc_args(interface).join(" ")),
                code: Some(2),
                stderr: "simulated failure".to_owned(),
            });
        }
        Ok(())
    }
}
