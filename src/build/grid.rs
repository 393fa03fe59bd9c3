//! Frequency grid comparison and reconciliation.
//!
//! Records that share a band key may still carry axes that drifted by a few
//! ULPs from the canonical axis. Such grids are re-interpolated onto the
//! canonical frequencies; anything drifting further is rejected upstream.

/// Largest per-bin relative deviation between two axes of equal length.
pub fn max_relative_deviation(canonical: &[f64], axis: &[f64]) -> f64 {
    debug_assert_eq!(canonical.len(), axis.len());

    canonical
        .iter()
        .zip(axis.iter())
        .map(|(&c, &a)| {
            let denom = c.abs().max(1.0);
            (a - c).abs() / denom
        })
        .fold(0.0, f64::max)
}

/// Whether `axis` is reconcilable onto `canonical` at the given relative
/// tolerance (checked at every index).
pub fn within_tolerance(canonical: &[f64], axis: &[f64], tolerance: f64) -> bool {
    canonical.len() == axis.len() && max_relative_deviation(canonical, axis) <= tolerance
}

/// Piecewise-linear resampling of `power` (sampled at `freqs`) onto the
/// canonical axis.
///
/// Targets outside the record's frequency range are clamped to the nearest
/// endpoint sample; an exact frequency match reproduces the original sample
/// bit-for-bit.
pub fn resample_onto(canonical: &[f64], freqs: &[f64], power: &[f32]) -> Vec<f32> {
    debug_assert_eq!(freqs.len(), power.len());
    debug_assert!(!freqs.is_empty());

    let last = freqs.len() - 1;
    canonical
        .iter()
        .map(|&target| {
            if target <= freqs[0] {
                return power[0];
            }
            if target >= freqs[last] {
                return power[last];
            }

            // First index with freqs[idx] >= target; in (0, last] here.
            let idx = freqs.partition_point(|&f| f < target);
            if freqs[idx] == target {
                return power[idx];
            }

            let (f0, f1) = (freqs[idx - 1], freqs[idx]);
            let (p0, p1) = (power[idx - 1] as f64, power[idx] as f64);
            let t = (target - f0) / (f1 - f0);
            (p0 + t * (p1 - p0)) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + i as f64 * step).collect()
    }

    #[test]
    fn test_identical_axes_are_within_tolerance() {
        let a = axis(100e6, 100.0, 64);
        assert!(within_tolerance(&a, &a, 1e-6));
        assert_eq!(max_relative_deviation(&a, &a), 0.0);
    }

    #[test]
    fn test_millihertz_drift_is_within_tolerance() {
        let canonical = axis(100e6, 100.0, 64);
        let drifted: Vec<f64> = canonical.iter().map(|f| f + 1e-3).collect();
        assert!(within_tolerance(&canonical, &drifted, 1e-6));
        assert!(max_relative_deviation(&canonical, &drifted) > 0.0);
    }

    #[test]
    fn test_large_drift_is_rejected() {
        let canonical = axis(100e6, 100.0, 64);
        let drifted: Vec<f64> = canonical.iter().map(|f| f * (1.0 + 5e-6)).collect();
        assert!(!within_tolerance(&canonical, &drifted, 1e-6));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let canonical = axis(100e6, 100.0, 64);
        let other = axis(100e6, 100.0, 63);
        assert!(!within_tolerance(&canonical, &other, 1e-6));
    }

    #[test]
    fn test_resample_exact_match_is_identity() {
        let freqs = axis(100e6, 100.0, 32);
        let power: Vec<f32> = (0..32).map(|i| -90.0 + i as f32 * 0.25).collect();

        let resampled = resample_onto(&freqs, &freqs, &power);
        assert_eq!(resampled, power);
    }

    #[test]
    fn test_resample_interpolates_midpoints() {
        let freqs = vec![0.0, 10.0, 20.0];
        let power = vec![0.0f32, 10.0, 30.0];
        let canonical = vec![5.0, 15.0];

        let resampled = resample_onto(&canonical, &freqs, &power);
        assert_eq!(resampled, vec![5.0, 20.0]);
    }

    #[test]
    fn test_resample_clamps_beyond_endpoints() {
        let freqs = vec![10.0, 20.0];
        let power = vec![-3.0f32, 7.0];
        let canonical = vec![9.999_999, 20.000_001];

        let resampled = resample_onto(&canonical, &freqs, &power);
        assert_eq!(resampled, vec![-3.0, 7.0]);
    }
}
