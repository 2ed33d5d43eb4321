//! Prediction intervals around point forecasts.
//!
//! The half-width is `z(confidence) · σ` where `σ` is the population
//! standard deviation of the historical rates and `z` the two-sided normal
//! quantile. Intervals are symmetric except that the lower bound is clamped
//! at zero.

use crate::error::{ForecastError, Result};
use crate::stats;
use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided standard normal quantile for `confidence`, e.g. 0.95 → 1.96.
pub fn z_score(confidence: f64) -> Result<f64> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(ForecastError::InvalidParameter {
            param: "confidence_level".to_string(),
            value: confidence.to_string(),
            reason: "must be strictly between 0 and 1".to_string(),
        });
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| ForecastError::ComputationError(format!("Normal distribution: {}", e)))?;
    Ok(normal.inverse_cdf((1.0 + confidence) / 2.0))
}

/// Half-width shared by every forecast year.
pub fn half_width(historical: &[f64], confidence: f64) -> Result<f64> {
    if historical.is_empty() {
        return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
    }
    Ok(z_score(confidence)? * stats::std_dev(historical))
}

/// Lower and upper bounds for each point forecast.
pub fn prediction_intervals(
    forecasts: &[f64],
    historical: &[f64],
    confidence: f64,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let width = half_width(historical, confidence)?;
    let lower = forecasts.iter().map(|f| (f - width).max(0.0)).collect();
    let upper = forecasts.iter().map(|f| f + width).collect();
    Ok((lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_z_score_known_values() {
        assert_relative_eq!(z_score(0.95).unwrap(), 1.959964, epsilon = 1e-5);
        assert_relative_eq!(z_score(0.90).unwrap(), 1.644854, epsilon = 1e-5);
        assert_relative_eq!(z_score(0.99).unwrap(), 2.575829, epsilon = 1e-5);
    }

    #[test]
    fn test_z_score_rejects_bad_levels() {
        for level in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            assert!(matches!(
                z_score(level),
                Err(ForecastError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_intervals_are_symmetric() {
        let historical = [1.0, 1.1, 1.2, 1.3, 1.4];
        let (lower, upper) = prediction_intervals(&[1.5, 1.6], &historical, 0.95).unwrap();
        let width = 1.959964 * stats::std_dev(&historical);
        for (i, f) in [1.5, 1.6].iter().enumerate() {
            assert_relative_eq!(upper[i] - f, width, epsilon = 1e-5);
            assert_relative_eq!(f - lower[i], width, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_lower_bound_clamped_at_zero() {
        let historical = [0.1, 2.0, 0.2, 1.9];
        let (lower, upper) = prediction_intervals(&[0.3], &historical, 0.95).unwrap();
        assert_eq!(lower[0], 0.0);
        assert!(upper[0] > 0.3);
    }

    #[test]
    fn test_constant_history_gives_zero_width() {
        let (lower, upper) = prediction_intervals(&[2.0], &[2.0, 2.0, 2.0], 0.8).unwrap();
        assert_eq!(lower[0], 2.0);
        assert_eq!(upper[0], 2.0);
    }
}
