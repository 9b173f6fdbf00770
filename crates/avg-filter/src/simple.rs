use std::collections::VecDeque;

use crate::{std_dev_around, AvgFilter};

/// Arithmetic mean over a sliding window of the most recent samples.
#[derive(Debug, Clone)]
pub struct SimpleAvgFilter<T> {
    window: usize,
    samples: VecDeque<T>,
}

impl<T> SimpleAvgFilter<T> {
    /// # Panics
    ///
    /// Panics if `window` is zero.
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "window must hold at least one sample");
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl<T: Into<f64> + Copy> AvgFilter<T> for SimpleAvgFilter<T> {
    fn reset(&mut self) {
        self.samples.clear();
    }

    fn add_value(&mut self, value: T) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NAN;
        }
        let sum: f64 = self.samples.iter().map(|&sample| sample.into()).sum();
        sum / self.samples.len() as f64
    }

    fn std_dev(&self) -> f64 {
        std_dev_around(
            self.samples.iter().map(|&sample| sample.into()),
            self.average(),
        )
    }
}
