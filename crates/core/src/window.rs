//! Fixed-capacity sliding statistics windows.
//!
//! A [`SlidingWindow`] keeps the most recent `capacity` samples in insertion
//! order. Appending to a full window evicts the oldest sample first, so the
//! length never exceeds the capacity. The mean is served from a running sum
//! in O(1); the median is a real order statistic computed by selection over a
//! scratch copy, which is O(n) instead of a full sort.

use std::collections::VecDeque;
use std::time::Duration;

use crate::errors::WindowError;

/// Value that can be aggregated by a [`SlidingWindow`].
pub trait WindowSample: Copy {
    fn as_f64(&self) -> f64;
}

impl WindowSample for f64 {
    fn as_f64(&self) -> f64 {
        *self
    }
}

impl WindowSample for u64 {
    fn as_f64(&self) -> f64 {
        *self as f64
    }
}

/// Durations aggregate in nanoseconds.
impl WindowSample for Duration {
    fn as_f64(&self) -> f64 {
        self.as_nanos() as f64
    }
}

#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    samples: VecDeque<T>,
    capacity: usize,
    running_sum: f64,
    /// Evictions since the running sum was last rebuilt from scratch.
    evictions_since_resum: usize,
}

impl<T: WindowSample> SlidingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            running_sum: 0.0,
            evictions_since_resum: 0,
        }
    }

    /// Append a sample, returning the evicted oldest sample if the window was full.
    pub fn push(&mut self, sample: T) -> Option<T> {
        let evicted = if self.samples.len() == self.capacity {
            let oldest = self.samples.pop_front();
            if let Some(oldest) = oldest {
                self.running_sum -= oldest.as_f64();
                self.evictions_since_resum += 1;
            }
            oldest
        } else {
            None
        };

        self.samples.push_back(sample);
        self.running_sum += sample.as_f64();

        // Subtracting evicted floats accumulates rounding error; rebuild the
        // sum once per full turn of the buffer.
        if self.evictions_since_resum >= self.capacity {
            self.running_sum = self.samples.iter().map(WindowSample::as_f64).sum();
            self.evictions_since_resum = 0;
        }

        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Most recently appended sample.
    pub fn latest(&self) -> Option<T> {
        self.samples.back().copied()
    }

    /// Oldest retained sample.
    pub fn oldest(&self) -> Option<T> {
        self.samples.front().copied()
    }

    /// Retained samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.samples.iter()
    }

    pub fn try_mean(&self) -> Result<f64, WindowError> {
        if self.samples.is_empty() {
            return Err(WindowError::Underflow);
        }
        Ok(self.running_sum / self.samples.len() as f64)
    }

    /// Arithmetic mean of the retained samples, `0.0` on an empty window.
    pub fn mean(&self) -> f64 {
        self.try_mean().unwrap_or(0.0)
    }

    pub fn try_median(&self) -> Result<f64, WindowError> {
        let mut values: Vec<f64> = self.samples.iter().map(WindowSample::as_f64).collect();
        let len = values.len();
        if len == 0 {
            return Err(WindowError::Underflow);
        }

        let mid = len / 2;
        let (lower, upper_middle, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
        let upper_middle = *upper_middle;
        if len % 2 == 1 {
            return Ok(upper_middle);
        }
        // Even cardinality: the lower central value is the maximum of the
        // partition left of the selected element.
        let lower_middle = lower
            .iter()
            .copied()
            .max_by(f64::total_cmp)
            .unwrap_or(upper_middle);
        Ok((lower_middle + upper_middle) / 2.0)
    }

    /// Median of the retained samples, `0.0` on an empty window.
    pub fn median(&self) -> f64 {
        self.try_median().unwrap_or(0.0)
    }
}

impl SlidingWindow<Duration> {
    pub fn try_mean_duration(&self) -> Result<Duration, WindowError> {
        self.try_mean()
            .map(|nanos| Duration::from_nanos(nanos.round() as u64))
    }

    /// Mean duration, [`Duration::ZERO`] on an empty window.
    pub fn mean_duration(&self) -> Duration {
        self.try_mean_duration().unwrap_or(Duration::ZERO)
    }
}
