//! Per-cycle state carried between detection runs.

/// Weight of the newest latency sample in [`LatencyAverage`].
pub const LATENCY_SMOOTHING: f32 = 0.1;

/// Confirms a detection only after `required` consecutive scores at or above
/// `threshold`, then starts counting again from zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Hysteresis {
    threshold: f32,
    required: u32,
    consecutive: u32,
}

impl Hysteresis {
    pub fn new(threshold: f32, required: u32) -> Self {
        Self {
            threshold,
            required: required.max(1),
            consecutive: 0,
        }
    }

    /// Feed one cycle's score. Returns `true` on the cycle that completes a
    /// run of `required` highs. A lower score (or NaN) breaks the run.
    pub fn observe(&mut self, score: f32) -> bool {
        if score >= self.threshold {
            self.consecutive += 1;
            if self.consecutive >= self.required {
                self.consecutive = 0;
                return true;
            }
        } else {
            self.consecutive = 0;
        }
        false
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Highs seen in the current unbroken run.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Exponential moving average of cycle latency, starting from zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyAverage {
    average_ms: f32,
    samples: u64,
}

impl LatencyAverage {
    /// Fold in one latency and return the new average.
    pub fn record(&mut self, latency_ms: f32) -> f32 {
        self.average_ms =
            latency_ms * LATENCY_SMOOTHING + self.average_ms * (1.0 - LATENCY_SMOOTHING);
        self.samples += 1;
        self.average_ms
    }

    pub fn average_ms(&self) -> f32 {
        self.average_ms
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn single_high_followed_by_low_never_fires() {
        let mut h = Hysteresis::new(0.95, 2);
        assert!(!h.observe(0.97));
        assert!(!h.observe(0.40));
        assert_eq!(h.consecutive(), 0);
        assert!(!h.observe(0.97));
    }

    #[test]
    fn two_consecutive_highs_fire_once_then_restart() {
        let mut h = Hysteresis::new(0.95, 2);
        assert!(!h.observe(0.95));
        assert!(h.observe(0.99));
        assert_eq!(h.consecutive(), 0);

        // third high starts a new run
        assert!(!h.observe(0.99));
        assert!(h.observe(0.99));
    }

    #[test]
    fn nan_breaks_the_run() {
        let mut h = Hysteresis::new(0.95, 2);
        h.observe(0.99);
        assert!(!h.observe(f32::NAN));
        assert!(!h.observe(0.99));
    }

    #[test]
    fn required_of_one_fires_every_high() {
        let mut h = Hysteresis::new(0.5, 1);
        assert!(h.observe(0.6));
        assert!(h.observe(0.6));
        assert!(!h.observe(0.1));
    }

    #[test]
    fn latency_follows_exponential_formula() {
        let latencies = [10.0f32, 20.0, 5.0, 40.0];
        let mut avg = LatencyAverage::default();
        let mut expected = 0.0f32;
        for &l in &latencies {
            expected = 0.1 * l + 0.9 * expected;
            assert_abs_diff_eq!(avg.record(l), expected, epsilon = 1e-5);
        }
        assert_eq!(avg.samples(), 4);

        avg.reset();
        assert_eq!(avg.average_ms(), 0.0);
        assert_eq!(avg.samples(), 0);
    }

    #[test]
    fn first_sample_is_a_tenth() {
        let mut avg = LatencyAverage::default();
        assert_abs_diff_eq!(avg.record(50.0), 5.0, epsilon = 1e-6);
    }
}
