//! Linear trend forecaster (degree-1 least squares on year).

use super::{check_target, to_f64, validate_series};
use crate::error::Result;
use crate::regression::{fit_line, LineFit};

/// Least-squares line through `(year, rate)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearForecaster {
    line: LineFit,
    min_year: i32,
}

impl LinearForecaster {
    /// Fit on at least two points.
    pub fn fit(years: &[i32], rates: &[f64]) -> Result<Self> {
        validate_series(years, rates, 2)?;
        let line = fit_line(&to_f64(years), rates)?;
        Ok(Self {
            line,
            min_year: years[0],
        })
    }

    /// `slope * year + intercept`.
    pub fn predict(&self, year: i32) -> Result<f64> {
        check_target(year, self.min_year)?;
        Ok(self.line.eval(f64::from(year)))
    }

    pub fn slope(&self) -> f64 {
        self.line.slope
    }

    pub fn intercept(&self) -> f64 {
        self.line.intercept()
    }

    /// RMS of in-sample residuals.
    pub fn residual_rms(&self) -> f64 {
        self.line.residual_rms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_trend_extrapolates() {
        let years = [2020, 2021, 2022, 2023, 2024];
        let rates = [1.0, 1.1, 1.2, 1.3, 1.4];
        let model = LinearForecaster::fit(&years, &rates).unwrap();
        assert_relative_eq!(model.predict(2025).unwrap(), 1.5, epsilon = 1e-9);
        assert_relative_eq!(model.slope(), 0.1, epsilon = 1e-9);
        assert_relative_eq!(
            model.slope() * 2025.0 + model.intercept(),
            1.5,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_in_sample_predictions_lie_on_the_line() {
        let years = [2015, 2016, 2017, 2018, 2019, 2020];
        let rates = [2.1, 2.3, 2.2, 2.6, 2.5, 2.9];
        let model = LinearForecaster::fit(&years, &rates).unwrap();
        let bound = (years.len() as f64).sqrt() * model.residual_rms() + 1e-12;
        for (year, rate) in years.iter().zip(rates.iter()) {
            let predicted = model.predict(*year).unwrap();
            assert!((predicted - rate).abs() <= bound);
        }
    }

    #[test]
    fn test_requires_two_points() {
        assert!(matches!(
            LinearForecaster::fit(&[2020], &[1.0]),
            Err(ForecastError::InsufficientData { needed: 2, got: 1 })
        ));
    }
}
