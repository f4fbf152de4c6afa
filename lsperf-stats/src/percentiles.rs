//! Percentile Computation
//!
//! Linear interpolation between nearest ranks. Used for medians, where an
//! even-length list lands exactly between the two middle samples.

/// Compute a single percentile (0-100) from unsorted samples
///
/// Returns 0 for an empty slice; callers that must distinguish "no data"
/// go through [`crate::median`] instead.
pub fn compute_percentile(samples: &[f64], percentile: f64) -> f64 {
    match samples {
        [] => 0.0,
        [only] => *only,
        _ => {
            let mut sorted = samples.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));

            let n = sorted.len();
            let rank = (percentile / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let fraction = rank - lower as f64;

            sorted[lower] + fraction * (sorted[upper] - sorted[lower])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd() {
        assert!((compute_percentile(&[5.0, 1.0, 3.0, 2.0, 4.0], 50.0) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_median_even_is_midpoint() {
        assert!((compute_percentile(&[1.0, 2.0, 3.0, 10.0], 50.0) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bounds() {
        let samples: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert_eq!(compute_percentile(&samples, 0.0), 1.0);
        assert_eq!(compute_percentile(&samples, 100.0), 100.0);
        assert_eq!(compute_percentile(&samples, 250.0), 100.0);
    }

    #[test]
    fn test_single_and_empty() {
        assert_eq!(compute_percentile(&[42.0], 50.0), 42.0);
        assert_eq!(compute_percentile(&[], 50.0), 0.0);
    }
}
