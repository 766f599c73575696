use std::ops::AddAssign;

/// Running mean that ignores NaN samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvgTracker {
    total: f64,
    count: u64,
}

impl AvgTracker {
    pub fn new(total: f64, count: u64) -> Self {
        Self { total, count }
    }

    /// Mean of the samples, NaN when there are none.
    pub fn get(&self) -> f64 {
        if self.count > 0 {
            self.total / self.count as f64
        } else {
            f64::NAN
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.total = 0.0;
        self.count = 0;
    }
}

impl AddAssign<f64> for AvgTracker {
    fn add_assign(&mut self, val: f64) {
        if !val.is_nan() {
            self.total += val;
            self.count += 1;
        }
    }
}

impl AddAssign<bool> for AvgTracker {
    fn add_assign(&mut self, hit: bool) {
        *self += f64::from(u8::from(hit));
    }
}

impl AddAssign<AvgTracker> for AvgTracker {
    fn add_assign(&mut self, other: AvgTracker) {
        if !other.total.is_nan() {
            self.total += other.total;
            self.count += other.count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_nan() {
        assert!(AvgTracker::default().get().is_nan());
    }

    #[test]
    fn skips_nan_samples() {
        let mut avg = AvgTracker::default();
        avg += 1.0;
        avg += f64::NAN;
        avg += 3.0;
        assert_eq!(avg.get(), 2.0);
        assert_eq!(avg.count(), 2);
    }

    #[test]
    fn bools_average_to_a_rate() {
        let mut acc = AvgTracker::default();
        for hit in [true, false, true, true] {
            acc += hit;
        }
        assert_eq!(acc.get(), 0.75);

        acc.reset();
        acc += AvgTracker::new(3.0, 6);
        assert_eq!(acc.get(), 0.5);
    }
}
