//! Bufferbloat detection.
//!
//! Any strict increase between two consecutive RTT observations counts as the
//! onset of queueing delay. The comparison is evaluated once per ingested
//! sample, so a burst of regressions yields one signal per regression.

use std::time::Duration;

/// Returns `true` iff `newest` is strictly greater than `previous`.
#[inline]
pub fn latency_increased(previous: Duration, newest: Duration) -> bool {
    newest > previous
}

/// Remembers the previous RTT observation and compares each new one against it.
///
/// The comparison itself is [`latency_increased`]; this only carries the
/// previous value across samples.
#[derive(Debug, Clone, Copy)]
pub struct BufferbloatDetector {
    previous: Duration,
}

impl BufferbloatDetector {
    /// `baseline` plays the role of the observation preceding the first sample.
    pub fn new(baseline: Duration) -> Self {
        Self { previous: baseline }
    }

    /// Feed the newest sample; returns whether it is a latency regression.
    pub fn observe(&mut self, newest: Duration) -> bool {
        let increased = latency_increased(self.previous, newest);
        self.previous = newest;
        increased
    }

    pub fn previous(&self) -> Duration {
        self.previous
    }
}
