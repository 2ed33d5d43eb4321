//! Fitted year → rate forecasters.
//!
//! Every model is built from two equal-length arrays `years[]` and `rates[]`,
//! fitted once at construction and queried afterwards through
//! [`FittedModel::predict`]. Degradation (ARIMA → Linear, AI-enhanced →
//! base) is owned by the wrapping model rather than by the caller.

pub mod ai;
pub mod arima;
pub mod exponential;
pub mod linear;

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};

pub use ai::{AiEnhancedForecaster, GenerationSettings};
pub use arima::{ArimaForecaster, ArimaOrder};
pub use exponential::ExponentialForecaster;
pub use linear::LinearForecaster;

/// Models the engine can fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Exponential,
    Arima,
    AiEnhanced,
}

impl ModelKind {
    /// Statistical models, in ensemble order.
    pub const STATISTICAL: [ModelKind; 3] =
        [ModelKind::Linear, ModelKind::Exponential, ModelKind::Arima];

    /// Canonical report key for the model.
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Exponential => "exponential",
            ModelKind::Arima => "arima",
            ModelKind::AiEnhanced => "ai_enhanced",
        }
    }

    /// Whether the model needs an LLM gateway.
    pub fn requires_gateway(&self) -> bool {
        matches!(self, ModelKind::AiEnhanced)
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = ForecastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "linear" => return Ok(ModelKind::Linear),
            "exponential" => return Ok(ModelKind::Exponential),
            "arima" => return Ok(ModelKind::Arima),
            "ai_enhanced" => return Ok(ModelKind::AiEnhanced),
            _ => {}
        }

        match s.trim().to_lowercase().as_str() {
            "linear" | "lin" | "ols" => Ok(ModelKind::Linear),
            "exponential" | "exp" | "log_linear" => Ok(ModelKind::Exponential),
            "arima" | "arima(1,1,1)" => Ok(ModelKind::Arima),
            "ai_enhanced" | "ai-enhanced" | "aienhanced" | "ai" | "llm" => {
                Ok(ModelKind::AiEnhanced)
            }
            _ => Err(ForecastError::InvalidModel(format!("Unknown model: {}", s))),
        }
    }
}

/// A fitted model of any kind.
#[derive(Debug)]
pub enum FittedModel {
    Linear(LinearForecaster),
    Exponential(ExponentialForecaster),
    Arima(ArimaForecaster),
    AiEnhanced(AiEnhancedForecaster),
}

impl FittedModel {
    /// Fit one of the statistical models on `(years, rates)`.
    ///
    /// The AI-enhanced model wraps an already fitted base and is built with
    /// [`AiEnhancedForecaster::new`] instead.
    pub fn fit(kind: ModelKind, years: &[i32], rates: &[f64]) -> Result<Self> {
        match kind {
            ModelKind::Linear => Ok(FittedModel::Linear(LinearForecaster::fit(years, rates)?)),
            ModelKind::Exponential => Ok(FittedModel::Exponential(
                ExponentialForecaster::fit(years, rates)?,
            )),
            ModelKind::Arima => Ok(FittedModel::Arima(ArimaForecaster::fit(years, rates)?)),
            ModelKind::AiEnhanced => Err(ForecastError::InvalidModel(
                "ai_enhanced must be built around a fitted base model".to_string(),
            )),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            FittedModel::Linear(_) => ModelKind::Linear,
            FittedModel::Exponential(_) => ModelKind::Exponential,
            FittedModel::Arima(_) => ModelKind::Arima,
            FittedModel::AiEnhanced(_) => ModelKind::AiEnhanced,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Point prediction for `year`.
    pub fn predict(&self, year: i32) -> Result<f64> {
        match self {
            FittedModel::Linear(m) => m.predict(year),
            FittedModel::Exponential(m) => m.predict(year),
            FittedModel::Arima(m) => m.predict(year),
            FittedModel::AiEnhanced(m) => m.predict(year),
        }
    }

    /// Whether predictions are currently served by a degraded fallback.
    pub fn uses_fallback(&self) -> bool {
        match self {
            FittedModel::Arima(m) => m.uses_fallback(),
            _ => false,
        }
    }
}

/// Validate a training series: equal lengths, enough points, finite rates,
/// strictly increasing years.
pub(crate) fn validate_series(years: &[i32], rates: &[f64], needed: usize) -> Result<()> {
    if years.len() != rates.len() {
        return Err(ForecastError::InvalidInput(format!(
            "years and rates must have the same length: {} vs {}",
            years.len(),
            rates.len()
        )));
    }
    if years.len() < needed {
        return Err(ForecastError::InsufficientData {
            needed,
            got: years.len(),
        });
    }
    if rates.iter().any(|r| !r.is_finite()) {
        return Err(ForecastError::InvalidInput(
            "rates must be finite".to_string(),
        ));
    }
    if years.windows(2).any(|w| w[1] <= w[0]) {
        return Err(ForecastError::InvalidInput(
            "years must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// Reject targets that precede the training window.
pub(crate) fn check_target(year: i32, earliest: i32) -> Result<()> {
    if year < earliest {
        return Err(ForecastError::InvalidTarget { year, earliest });
    }
    Ok(())
}

pub(crate) fn to_f64(years: &[i32]) -> Vec<f64> {
    years.iter().map(|&y| f64::from(y)).collect()
}
