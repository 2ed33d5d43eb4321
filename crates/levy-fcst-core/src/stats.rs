//! Descriptive statistics over rate series.
//!
//! All dispersion measures are population statistics (divide by `n`), which
//! is what the interval and z-score calculations are calibrated against.

/// Arithmetic mean. Returns NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance. Returns NaN for an empty slice.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Linear-interpolated percentile of an already sorted slice, `p` in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let n = sorted.len() as f64;
    let idx = p * (n - 1.0);
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    let frac = idx - lower as f64;

    if upper >= sorted.len() {
        sorted[sorted.len() - 1]
    } else {
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// First and third quartiles of an unsorted slice.
pub fn quartiles(values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    (percentile(&sorted, 0.25), percentile(&sorted, 0.75))
}

/// Smallest value, NaN when empty.
pub fn min(values: &[f64]) -> f64 {
    values.iter().cloned().fold(f64::NAN, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_and_std() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&values), 5.0);
        assert_relative_eq!(std_dev(&values), 2.0);
    }

    #[test]
    fn test_empty_series() {
        assert!(mean(&[]).is_nan());
        assert!(std_dev(&[]).is_nan());
        assert!(percentile(&[], 0.5).is_nan());
        assert!(min(&[]).is_nan());
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(percentile(&sorted, 0.0), 1.0);
        assert_relative_eq!(percentile(&sorted, 0.5), 2.5);
        assert_relative_eq!(percentile(&sorted, 1.0), 4.0);
    }

    #[test]
    fn test_quartiles_unsorted_input() {
        let (q1, q3) = quartiles(&[1.3, 1.0, 2.0, 1.1, 1.2]);
        assert_relative_eq!(q1, 1.1, epsilon = 1e-12);
        assert_relative_eq!(q3, 1.3, epsilon = 1e-12);
    }

    #[test]
    fn test_min_ignores_order() {
        assert_relative_eq!(min(&[0.4, -0.2, 1.5]), -0.2);
    }
}
