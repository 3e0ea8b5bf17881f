//! Analysis window.

use std::f32::consts::PI;

/// Hann window sampled at bin centres: `0.5 - 0.5 cos(2π (i + 0.5) / N)`.
///
/// Sampling at `i + 0.5` keeps the window symmetric without forcing either
/// end to exactly zero, so no frame sample is discarded outright.
pub fn hann(len: usize) -> Vec<f32> {
    let n = len as f32;
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * (i as f32 + 0.5) / n).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn symmetric_with_unit_peak() {
        let w = hann(320);
        assert_eq!(w.len(), 320);
        for i in 0..160 {
            assert_abs_diff_eq!(w[i], w[319 - i], epsilon = 1e-5);
        }
        assert_abs_diff_eq!(w[159], 1.0, epsilon = 1e-4);
        assert!(w[0] > 0.0 && w[0] < 1e-3);
    }

    #[test]
    fn empty_window() {
        assert!(hann(0).is_empty());
    }
}
