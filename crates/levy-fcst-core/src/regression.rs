//! Ordinary least-squares line fits used by the trend-based models.
//!
//! Years are centered on their mean before fitting so the design matrix stays
//! well conditioned for calendar-scale regressors (x ≈ 2000).

use crate::error::{ForecastError, Result};
use anofox_regression::prelude::*;
use tracing::debug;

/// A fitted straight line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LineFit {
    /// Change in y per unit of x
    pub slope: f64,
    /// Value of the line at the mean of the regressor
    pub centered_intercept: f64,
    /// Mean of the regressor used for centering
    pub x_mean: f64,
    /// Root mean squared residual of the fit
    pub residual_rms: f64,
}

impl LineFit {
    /// Evaluate the line at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        self.centered_intercept + self.slope * (x - self.x_mean)
    }

    /// Intercept of the line at `x = 0`.
    pub fn intercept(&self) -> f64 {
        self.centered_intercept - self.slope * self.x_mean
    }
}

/// Fit `y` against `x` by ordinary least squares.
///
/// Uses the anofox OLS solver; if it rejects the system (or there are too few
/// points to leave residual degrees of freedom) the closed-form normal
/// equations are solved directly.
pub fn fit_line(x: &[f64], y: &[f64]) -> Result<LineFit> {
    if x.len() != y.len() {
        return Err(ForecastError::InvalidInput(format!(
            "Regressor and response must have the same length: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(ForecastError::InsufficientData {
            needed: 2,
            got: x.len(),
        });
    }
    if y.iter().chain(x.iter()).any(|v| !v.is_finite()) {
        return Err(ForecastError::InvalidInput(
            "Line fit inputs must be finite".to_string(),
        ));
    }

    let n = x.len();
    let x_mean = x.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = x.iter().map(|v| v - x_mean).collect();

    let (slope, centered_intercept) = if n > 2 {
        match solve_ols(&centered, y) {
            Some(coeffs) => coeffs,
            None => {
                debug!(n, "OLS solver rejected system, using closed form");
                solve_closed_form(&centered, y)?
            }
        }
    } else {
        solve_closed_form(&centered, y)?
    };

    let residual_rms = (centered
        .iter()
        .zip(y.iter())
        .map(|(xc, yv)| (yv - (centered_intercept + slope * xc)).powi(2))
        .sum::<f64>()
        / n as f64)
        .sqrt();

    Ok(LineFit {
        slope,
        centered_intercept,
        x_mean,
        residual_rms,
    })
}

/// Returns `(slope, intercept)` from the anofox OLS regressor.
fn solve_ols(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = y.len();
    let x_mat = faer::Mat::from_fn(n, 1, |i, _| x[i]);
    let y_col = faer::Col::from_fn(n, |i| y[i]);

    let fitted = OlsRegressor::builder()
        .with_intercept(true)
        .build()
        .fit(&x_mat, &y_col)
        .ok()?;

    let intercept = fitted.intercept().unwrap_or(0.0);
    let coeffs = fitted.coefficients();
    if coeffs.nrows() != 1 {
        return None;
    }
    let slope = coeffs[0];

    if slope.is_finite() && intercept.is_finite() {
        Some((slope, intercept))
    } else {
        None
    }
}

fn solve_closed_form(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    for (&xv, &yv) in x.iter().zip(y.iter()) {
        ss_xy += (xv - x_mean) * (yv - y_mean);
        ss_xx += (xv - x_mean).powi(2);
    }

    if ss_xx.abs() < f64::EPSILON {
        return Err(ForecastError::InvalidInput(
            "Regressor has zero variance; cannot fit a line".to_string(),
        ));
    }

    let slope = ss_xy / ss_xx;
    Ok((slope, y_mean - slope * x_mean))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_line() {
        let x = vec![2020.0, 2021.0, 2022.0, 2023.0, 2024.0];
        let y = vec![1.0, 1.1, 1.2, 1.3, 1.4];
        let fit = fit_line(&x, &y).unwrap();
        assert_relative_eq!(fit.slope, 0.1, epsilon = 1e-9);
        assert_relative_eq!(fit.eval(2025.0), 1.5, epsilon = 1e-9);
        assert!(fit.residual_rms < 1e-9);
    }

    #[test]
    fn test_two_points_interpolate() {
        let fit = fit_line(&[2010.0, 2012.0], &[2.0, 3.0]).unwrap();
        assert_relative_eq!(fit.slope, 0.5, epsilon = 1e-12);
        assert_relative_eq!(fit.eval(2011.0), 2.5, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept(), 3.0 - 0.5 * 2012.0, epsilon = 1e-9);
    }

    #[test]
    fn test_noisy_line_residuals() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = vec![0.0, 1.2, 1.8, 3.1];
        let fit = fit_line(&x, &y).unwrap();
        assert!(fit.residual_rms > 0.0);
        for (xv, yv) in x.iter().zip(y.iter()) {
            assert!((fit.eval(*xv) - yv).abs() <= 2.0 * fit.residual_rms + 1e-12);
        }
    }

    #[test]
    fn test_rejects_degenerate_inputs() {
        assert!(matches!(
            fit_line(&[2020.0], &[1.0]),
            Err(ForecastError::InsufficientData { needed: 2, got: 1 })
        ));
        assert!(fit_line(&[2020.0, 2020.0], &[1.0, 2.0]).is_err());
        assert!(fit_line(&[1.0, 2.0], &[1.0, f64::NAN]).is_err());
    }
}
