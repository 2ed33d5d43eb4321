//! ARIMA forecaster with an explicit Linear fallback.
//!
//! In-sample years return the observed rate. Out-of-sample years are
//! produced by recursive one-step forecasts from a single fit (the model is
//! never re-fitted on its own forecasts). Short or degenerate histories, and
//! any fitting or prediction failure, degrade to a [`LinearForecaster`] over
//! the same training data.

use super::{check_target, validate_series, LinearForecaster};
use crate::error::{ForecastError, Result};
use crate::stats;
use anofox_forecast::core::TimeSeries;
use anofox_forecast::models::arima::ARIMA as ArimaModel;
use anofox_forecast::prelude::Forecaster;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Minimum history length for an ARIMA fit.
pub const MIN_ARIMA_POINTS: usize = 4;

/// ARIMA `(p, d, q)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl Default for ArimaOrder {
    fn default() -> Self {
        Self { p: 1, d: 1, q: 1 }
    }
}

impl std::fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ARIMA({},{},{})", self.p, self.d, self.q)
    }
}

enum ArimaState {
    Fitted(Box<ArimaModel>),
    Fallback { reason: String },
}

/// Fitted ARIMA model or its Linear stand-in.
pub struct ArimaForecaster {
    order: ArimaOrder,
    years: Vec<i32>,
    rates: Vec<f64>,
    state: ArimaState,
    fallback: OnceLock<LinearForecaster>,
}

impl std::fmt::Debug for ArimaForecaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArimaForecaster")
            .field("order", &self.order)
            .field("years", &self.years)
            .field("rates", &self.rates)
            .field("fallback_reason", &self.fallback_reason())
            .finish()
    }
}

impl ArimaForecaster {
    /// Fit with the default `(1,1,1)` order.
    pub fn fit(years: &[i32], rates: &[f64]) -> Result<Self> {
        Self::fit_with_order(years, rates, ArimaOrder::default())
    }

    pub fn fit_with_order(years: &[i32], rates: &[f64], order: ArimaOrder) -> Result<Self> {
        validate_series(years, rates, 2)?;

        let state = if years.len() < MIN_ARIMA_POINTS {
            ArimaState::Fallback {
                reason: format!(
                    "need at least {} observations, got {}",
                    MIN_ARIMA_POINTS,
                    years.len()
                ),
            }
        } else {
            match fit_arima(years, rates, order) {
                Ok(model) => ArimaState::Fitted(Box::new(model)),
                Err(e) => ArimaState::Fallback {
                    reason: e.to_string(),
                },
            }
        };

        let forecaster = Self {
            order,
            years: years.to_vec(),
            rates: rates.to_vec(),
            state,
            fallback: OnceLock::new(),
        };

        if let Some(reason) = forecaster.fallback_reason() {
            debug!(%order, reason, "ARIMA unavailable, using linear fallback");
            // fallback must be buildable; surface its error at fit time
            forecaster.fallback()?;
        }

        Ok(forecaster)
    }

    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    /// True when the model was never fitted and the Linear fallback serves
    /// every prediction.
    pub fn uses_fallback(&self) -> bool {
        matches!(self.state, ArimaState::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match &self.state {
            ArimaState::Fallback { reason } => Some(reason),
            ArimaState::Fitted(_) => None,
        }
    }

    pub fn predict(&self, year: i32) -> Result<f64> {
        let first = self.years[0];
        let last = self.years[self.years.len() - 1];
        check_target(year, first)?;

        let model = match &self.state {
            ArimaState::Fallback { .. } => return self.fallback()?.predict(year),
            ArimaState::Fitted(model) => model,
        };

        if year <= last {
            return Ok(self.in_sample(year));
        }

        let steps = (year - last) as usize;
        match forecast_ahead(model, steps) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(year, error = %e, "ARIMA prediction failed, delegating to linear fallback");
                self.fallback()?.predict(year)
            }
        }
    }

    /// Observed rate for a training year; interior gaps are linearly interpolated.
    fn in_sample(&self, year: i32) -> f64 {
        match self.years.binary_search(&year) {
            Ok(idx) => self.rates[idx],
            Err(idx) => {
                let (y0, y1) = (self.years[idx - 1], self.years[idx]);
                let (r0, r1) = (self.rates[idx - 1], self.rates[idx]);
                let frac = f64::from(year - y0) / f64::from(y1 - y0);
                r0 + (r1 - r0) * frac
            }
        }
    }

    fn fallback(&self) -> Result<&LinearForecaster> {
        if let Some(model) = self.fallback.get() {
            return Ok(model);
        }
        let model = LinearForecaster::fit(&self.years, &self.rates)?;
        Ok(self.fallback.get_or_init(|| model))
    }
}

fn fit_arima(years: &[i32], rates: &[f64], order: ArimaOrder) -> Result<ArimaModel> {
    let mut differenced = rates.to_vec();
    for _ in 0..order.d {
        differenced = differenced.windows(2).map(|w| w[1] - w[0]).collect();
    }
    if differenced.len() < 2 || stats::variance(&differenced) < 1e-12 {
        return Err(ForecastError::ModelFitFailure(
            "differenced series has no variance".to_string(),
        ));
    }

    let series = TimeSeries::univariate(year_timestamps(years)?, rates.to_vec()).map_err(|e| {
        ForecastError::ComputationError(format!("Failed to build TimeSeries: {}", e))
    })?;

    let mut model = ArimaModel::new(order.p, order.d, order.q);
    model
        .fit(&series)
        .map_err(|e| ForecastError::ModelFitFailure(format!("Failed to fit ARIMA: {}", e)))?;

    // a model whose first step is unusable is treated as a failed fit
    forecast_ahead(&model, 1)?;

    Ok(model)
}

/// One timestamp per observation, at January 1st of its year.
fn year_timestamps(years: &[i32]) -> Result<Vec<DateTime<Utc>>> {
    years
        .iter()
        .map(|&year| {
            Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| ForecastError::InvalidInput(format!("year {} out of range", year)))
        })
        .collect()
}

/// Value `steps` years past the end of training.
fn forecast_ahead(model: &ArimaModel, steps: usize) -> Result<f64> {
    let forecast = model.predict(steps).map_err(|e| {
        ForecastError::ComputationError(format!("Failed to generate ARIMA forecasts: {}", e))
    })?;

    let point = forecast.point().first().cloned().unwrap_or_default();
    match point.get(steps - 1) {
        Some(value) if value.is_finite() => Ok(*value),
        Some(_) => Err(ForecastError::ComputationError(
            "ARIMA produced a non-finite forecast".to_string(),
        )),
        None => Err(ForecastError::ComputationError(format!(
            "ARIMA returned {} steps, expected {}",
            point.len(),
            steps
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn noisy_history() -> (Vec<i32>, Vec<f64>) {
        let years: Vec<i32> = (2005..2021).collect();
        let rates = vec![
            1.20, 1.26, 1.25, 1.33, 1.31, 1.40, 1.38, 1.47, 1.45, 1.52, 1.55, 1.53, 1.62, 1.60,
            1.68, 1.71,
        ];
        (years, rates)
    }

    #[test]
    fn test_short_history_falls_back_to_linear() {
        let years = [2022, 2023, 2024];
        let rates = [1.5, 1.6, 1.7];
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        let linear = LinearForecaster::fit(&years, &rates).unwrap();

        assert!(arima.uses_fallback());
        assert_eq!(arima.predict(2025).unwrap(), linear.predict(2025).unwrap());
        assert_relative_eq!(arima.predict(2025).unwrap(), 1.8, epsilon = 1e-9);
    }

    #[test]
    fn test_constant_growth_is_degenerate() {
        let years = [2020, 2021, 2022, 2023, 2024];
        let rates = [1.0, 1.1, 1.2, 1.3, 1.4];
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        assert!(arima.uses_fallback());
        assert!(arima.fallback_reason().unwrap().contains("variance"));
    }

    #[test]
    fn test_noisy_history_fits() {
        let (years, rates) = noisy_history();
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        assert!(!arima.uses_fallback(), "{:?}", arima.fallback_reason());
        assert_eq!(arima.fallback_reason(), None);
    }

    #[test]
    fn test_in_sample_returns_observed_rates() {
        let (years, rates) = noisy_history();
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        assert!(!arima.uses_fallback());
        for (year, rate) in years.iter().zip(rates.iter()) {
            assert_eq!(arima.predict(*year).unwrap(), *rate);
        }
    }

    #[test]
    fn test_in_sample_gap_is_interpolated() {
        let years = [2010, 2011, 2012, 2014, 2015, 2016, 2017, 2018];
        let rates = [1.20, 1.26, 1.25, 1.31, 1.40, 1.38, 1.47, 1.45];
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        assert_relative_eq!(arima.predict(2013).unwrap(), 1.28, epsilon = 1e-12);
    }

    #[test]
    fn test_forecasts_differ_from_linear() {
        let (years, rates) = noisy_history();
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        let linear = LinearForecaster::fit(&years, &rates).unwrap();
        assert!(!arima.uses_fallback());

        let max_gap = (2021..2026)
            .map(|year| (arima.predict(year).unwrap() - linear.predict(year).unwrap()).abs())
            .fold(0.0, f64::max);
        assert!(max_gap > 1e-6);
    }

    #[test]
    fn test_first_step_matches_model() {
        let (years, rates) = noisy_history();
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        let model = match &arima.state {
            ArimaState::Fitted(model) => model,
            ArimaState::Fallback { reason } => panic!("unexpected fallback: {}", reason),
        };
        assert_eq!(arima.predict(2021).unwrap(), forecast_ahead(model, 1).unwrap());
        assert!(arima.fallback.get().is_none());
    }

    #[test]
    fn test_multi_step_forecasts_are_finite() {
        let (years, rates) = noisy_history();
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        for year in 2021..2026 {
            assert!(arima.predict(year).unwrap().is_finite());
        }
    }

    #[test]
    fn test_rejects_years_before_history() {
        let (years, rates) = noisy_history();
        let arima = ArimaForecaster::fit(&years, &rates).unwrap();
        assert!(matches!(
            arima.predict(2000),
            Err(ForecastError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_order_display() {
        assert_eq!(ArimaOrder::default().to_string(), "ARIMA(1,1,1)");
    }
}
