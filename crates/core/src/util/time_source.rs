use std::time::Instant;

pub trait TimeSource {
    fn now(&self) -> Instant;
}

/// A simple time source that returns the current time using `Instant::now()`.
#[derive(Clone, Copy, Default)]
pub struct InstantTimeSrc(());

impl InstantTimeSrc {
    pub fn new() -> Self {
        InstantTimeSrc(())
    }
}

impl TimeSource for InstantTimeSrc {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "testing"))]
pub use mock::SharedMockTimeSource;

#[cfg(any(test, feature = "testing"))]
mod mock {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::TimeSource;

    /// A manually driven time source whose clones all observe the same instant.
    ///
    /// The rate controller keeps its own clone, so tests advance time from the
    /// outside and the controller sees it on the next tick.
    #[derive(Clone)]
    pub struct SharedMockTimeSource {
        current_instant: Arc<Mutex<Instant>>,
    }

    impl Default for SharedMockTimeSource {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl SharedMockTimeSource {
        pub fn new(start_instant: Instant) -> Self {
            SharedMockTimeSource {
                current_instant: Arc::new(Mutex::new(start_instant)),
            }
        }

        pub fn advance_time(&self, duration: Duration) {
            *self.current_instant.lock() += duration;
        }
    }

    impl TimeSource for SharedMockTimeSource {
        fn now(&self) -> Instant {
            *self.current_instant.lock()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn clones_share_the_same_clock() {
        let start = Instant::now();
        let time_source = SharedMockTimeSource::new(start);
        let observer = time_source.clone();

        time_source.advance_time(Duration::from_millis(250));

        assert_eq!(observer.now(), start + Duration::from_millis(250));
    }

    #[test]
    fn instant_source_is_monotonic() {
        let time_source = InstantTimeSrc::new();
        let first = time_source.now();
        let second = time_source.now();
        assert!(second >= first);
    }
}
