//! Error metrics for scoring model predictions against held-out rates.
//!
//! | Metric | Meaning |
//! |--------|---------|
//! | error | signed `predicted - actual` |
//! | MAE | mean of absolute errors |
//! | RMSE | root of mean squared errors |
//! | percent error | MAE relative to the mean absolute actual, in percent |
//!
//! With a single held-out year MAE equals `|error|` and RMSE equals
//! `sqrt(error²)`; they are computed over slices so multi-year hold-outs
//! report the same fields.

use crate::error::{ForecastError, Result};

/// Calculates Mean Absolute Error between actual and predicted values.
///
/// # Formula
/// MAE = (1/n) * Σ|actual_i - forecast_i|
///
/// # Example
/// ```
/// use levy_fcst_core::metrics::mae;
/// let error = mae(&[1.5], &[1.4]).unwrap();
/// assert!((error - 0.1).abs() < 1e-9);
/// ```
pub fn mae(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;
    let sum: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| (a - f).abs())
        .sum();
    Ok(sum / actual.len() as f64)
}

/// Calculates Mean Squared Error between actual and predicted values.
pub fn mse(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;
    let sum: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| (a - f).powi(2))
        .sum();
    Ok(sum / actual.len() as f64)
}

/// Calculates Root Mean Squared Error between actual and predicted values.
pub fn rmse(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    Ok(mse(actual, forecast)?.sqrt())
}

/// Mean signed error (`forecast - actual`). Positive means over-forecasting.
pub fn bias(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;
    let sum: f64 = actual.iter().zip(forecast.iter()).map(|(a, f)| f - a).sum();
    Ok(sum / actual.len() as f64)
}

/// Absolute error as a percentage of the mean absolute actual value.
///
/// Returns infinity when every actual is zero but the forecast is not, and
/// zero when both are zero.
pub fn percent_error(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    let abs_error = mae(actual, forecast)?;
    let scale = actual.iter().map(|a| a.abs()).sum::<f64>() / actual.len() as f64;
    if scale < f64::EPSILON {
        return Ok(if abs_error < f64::EPSILON {
            0.0
        } else {
            f64::INFINITY
        });
    }
    Ok(abs_error / scale * 100.0)
}

fn validate_inputs(actual: &[f64], forecast: &[f64]) -> Result<()> {
    if actual.len() != forecast.len() {
        return Err(ForecastError::InvalidInput(format!(
            "Actual and forecast arrays must have the same length: {} vs {}",
            actual.len(),
            forecast.len()
        )));
    }
    if actual.is_empty() {
        return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_point_metrics() {
        let actual = [1.4];
        let forecast = [1.5];
        assert_relative_eq!(mae(&actual, &forecast).unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(rmse(&actual, &forecast).unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(bias(&actual, &forecast).unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(
            percent_error(&actual, &forecast).unwrap(),
            0.1 / 1.4 * 100.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_rmse_penalizes_large_errors() {
        let actual = vec![1.0, 2.0, 3.0];
        let forecast = vec![1.0, 2.0, 4.0];
        assert_relative_eq!(
            rmse(&actual, &forecast).unwrap(),
            (1.0_f64 / 3.0).sqrt(),
            epsilon = 0.001
        );
        assert!(rmse(&actual, &forecast).unwrap() > mae(&actual, &forecast).unwrap());
    }

    #[test]
    fn test_percent_error_zero_actuals() {
        assert_eq!(percent_error(&[0.0], &[0.0]).unwrap(), 0.0);
        assert!(percent_error(&[0.0], &[0.5]).unwrap().is_infinite());
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            mae(&[1.0, 2.0], &[1.0]),
            Err(ForecastError::InvalidInput(_))
        ));
        assert!(matches!(
            rmse(&[], &[]),
            Err(ForecastError::InsufficientData { needed: 1, got: 0 })
        ));
    }
}
