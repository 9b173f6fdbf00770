use std::collections::VecDeque;

use crate::{std_dev_around, AvgFilter};

/// Exponentially weighted moving average.
///
/// The smoothed value follows `s = alpha * x + (1 - alpha) * s`; a bounded
/// window of recent raw samples is kept only to estimate the deviation
/// around the smoothed value.
#[derive(Debug, Clone)]
pub struct ExpAvgFilter<T> {
    alpha: f64,
    window: usize,
    samples: VecDeque<T>,
    smoothed: f64,
}

impl<T> ExpAvgFilter<T> {
    /// `alpha` is the weight of the newest sample, in `(0, 1]`;
    /// `std_dev_window` bounds the raw samples retained for the deviation
    /// estimate.
    ///
    /// # Panics
    ///
    /// Panics if `alpha` is outside `(0, 1]` or `std_dev_window` is zero.
    pub fn new(alpha: f64, std_dev_window: usize) -> Self {
        assert!(alpha > 0.0 && alpha <= 1.0, "alpha must be in (0, 1]");
        assert!(std_dev_window > 0, "window must hold at least one sample");
        Self {
            alpha,
            window: std_dev_window,
            samples: VecDeque::with_capacity(std_dev_window),
            smoothed: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl<T: Into<f64> + Copy> AvgFilter<T> for ExpAvgFilter<T> {
    fn reset(&mut self) {
        self.samples.clear();
        self.smoothed = 0.0;
    }

    fn add_value(&mut self, value: T) {
        self.smoothed =
            self.alpha * value.into() + (1.0 - self.alpha) * self.smoothed;
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NAN;
        }
        self.smoothed
    }

    fn std_dev(&self) -> f64 {
        std_dev_around(
            self.samples.iter().map(|&sample| sample.into()),
            self.average(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_reports_nan() {
        let filter = ExpAvgFilter::<f64>::new(0.5, 4);
        assert!(filter.average().is_nan());
        assert!(filter.std_dev().is_nan());
    }

    #[test]
    fn smoothing_follows_the_recurrence() {
        let mut filter = ExpAvgFilter::new(0.5, 8);
        filter.add_value(1.0);
        assert!((filter.average() - 0.5).abs() < 1e-12);
        filter.add_value(1.0);
        assert!((filter.average() - 0.75).abs() < 1e-12);
        filter.add_value(0.0);
        assert!((filter.average() - 0.375).abs() < 1e-12);
    }

    #[test]
    fn alpha_one_tracks_the_newest_sample() {
        let mut filter = ExpAvgFilter::new(1.0, 4);
        for value in [3.0, 9.0, -2.0] {
            filter.add_value(value);
        }
        assert!((filter.average() + 2.0).abs() < 1e-12);
    }

    #[test]
    fn deviation_window_is_bounded() {
        let mut filter = ExpAvgFilter::new(0.5, 2);
        for value in [100.0, 1.0, 1.0] {
            filter.add_value(value);
        }
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn reset_clears_the_running_average() {
        let mut filter = ExpAvgFilter::new(0.5, 4);
        filter.add_value(10.0);
        filter.reset();
        assert!(filter.average().is_nan());
        filter.add_value(1.0);
        // The recurrence restarts from zero after a reset.
        assert!((filter.average() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn invalid_parameters_panic() {
        assert!(std::panic::catch_unwind(|| ExpAvgFilter::<f64>::new(0.0, 4)).is_err());
        assert!(std::panic::catch_unwind(|| ExpAvgFilter::<f64>::new(0.5, 0)).is_err());
    }
}
