//! Forecast orchestration for a single tax code.
//!
//! [`LevyForecaster::forecast_for_tax_code`] pulls the levy history through a
//! [`HistoricalDataProvider`], fits the model ensemble, builds prediction
//! intervals, ranks models on a hold-out, detects anomalies, checks the
//! statutory limit and assembles a [`ForecastReport`].
//!
//! Individual model failures are recorded in the report's
//! `model_evaluation`; only missing or too-short history is an error.

use crate::anomaly::{detect_anomalies, Anomaly, AnomalyOptions};
use crate::chart::{shape_chart_data, ChartData};
use crate::compliance::{check_compliance, ComplianceReport, StatutoryLimits};
use crate::data::{project_levy, DistrictInfo, HistoricalDataProvider, RateSeries};
use crate::error::{ForecastError, Result};
use crate::evaluation::{
    evaluate_models, select_best_model, AiContext, EvaluationResult, HoldOut,
};
use crate::gateway::{HttpGateway, LlmGateway};
use crate::intervals::{prediction_intervals, z_score};
use crate::models::{AiEnhancedForecaster, FittedModel, GenerationSettings, ModelKind};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimum history length for a forecast.
pub const MIN_HISTORY: usize = 3;

/// Forecast options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOptions {
    /// Number of future years after the last observation
    pub years_to_forecast: usize,
    /// Confidence level of the prediction intervals (0-1)
    pub confidence_level: f64,
    /// Restrict the ensemble to one model
    pub preferred_model: Option<ModelKind>,
    pub anomaly: AnomalyOptions,
    /// Explicit evaluation hold-out; the last observation otherwise
    pub holdout: Option<HoldOut>,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            years_to_forecast: 3,
            confidence_level: 0.95,
            preferred_model: None,
            anomaly: AnomalyOptions::default(),
            holdout: None,
        }
    }
}

impl ForecastOptions {
    pub fn validate(&self) -> Result<()> {
        if self.years_to_forecast == 0 {
            return Err(ForecastError::InvalidParameter {
                param: "years_to_forecast".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        z_score(self.confidence_level)?;
        Ok(())
    }

    /// The `years_to_forecast` years following `last_year`.
    pub fn forecast_years(&self, last_year: i32) -> Result<Vec<i32>> {
        let horizon_error = || ForecastError::InvalidParameter {
            param: "years_to_forecast".to_string(),
            value: self.years_to_forecast.to_string(),
            reason: format!("horizon runs past the last representable year after {}", last_year),
        };
        let horizon = i32::try_from(self.years_to_forecast).map_err(|_| horizon_error())?;
        last_year.checked_add(horizon).ok_or_else(horizon_error)?;
        Ok((1..=horizon).map(|k| last_year + k).collect())
    }
}

/// Point forecasts and interval bounds for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelForecast {
    pub forecast: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Complete forecast result for one tax code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    pub tax_code: String,
    pub tax_code_id: String,
    pub district: DistrictInfo,
    pub historical_years: Vec<i32>,
    pub historical_rates: Vec<f64>,
    pub forecast_years: Vec<i32>,
    pub forecasts: BTreeMap<String, ModelForecast>,
    pub best_model: String,
    pub model_evaluation: BTreeMap<String, EvaluationResult>,
    pub anomalies: Vec<Anomaly>,
    pub compliance: ComplianceReport,
    /// Best-model levy amount per forecast year at the latest assessed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projected_levy: Option<Vec<f64>>,
    /// RFC 3339 timestamp
    pub generation_time: String,
}

impl ForecastReport {
    /// Forecast of the best model.
    pub fn best_forecast(&self) -> Option<&ModelForecast> {
        self.forecasts.get(&self.best_model)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ForecastError::ComputationError(format!("report serialization: {}", e)))
    }

    pub fn chart_data(&self) -> Result<ChartData> {
        shape_chart_data(
            &self.historical_years,
            &self.historical_rates,
            &self.forecast_years,
            &self.forecasts,
        )
    }
}

impl std::fmt::Display for ForecastReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Tax code {} ({}, {})",
            self.tax_code, self.district.name, self.district.district_type
        )?;
        writeln!(
            f,
            "History: {} years, {}-{}",
            self.historical_years.len(),
            self.historical_years.first().copied().unwrap_or_default(),
            self.historical_years.last().copied().unwrap_or_default()
        )?;
        writeln!(f, "Best model: {}", self.best_model)?;

        if let Some(best) = self.best_forecast() {
            for (i, year) in self.forecast_years.iter().enumerate() {
                write!(
                    f,
                    "  {}: {:.4} [{:.4}, {:.4}]",
                    year, best.forecast[i], best.lower[i], best.upper[i]
                )?;
                if let Some(levy) = self.projected_levy.as_ref().and_then(|l| l.get(i)) {
                    write!(f, " levy {:.2}", levy)?;
                }
                writeln!(f)?;
            }
        }

        if self.anomalies.is_empty() {
            writeln!(f, "Anomalies: none")?;
        } else {
            writeln!(f, "Anomalies:")?;
            for anomaly in &self.anomalies {
                writeln!(
                    f,
                    "  {} (severity {:.2}): {}",
                    anomaly.year, anomaly.severity, anomaly.description
                )?;
            }
        }

        let c = &self.compliance;
        match (&c.error, c.statutory_limit, c.percent_of_limit) {
            (Some(error), _, _) => write!(f, "Compliance: {}", error),
            (None, Some(limit), Some(percent)) => {
                let status = if c.exceeds_limit {
                    "EXCEEDS LIMIT"
                } else if c.approaching_limit {
                    "approaching limit"
                } else {
                    "within limit"
                };
                write!(
                    f,
                    "Compliance: {:.4} of {:.4} ({:.1}%), {}",
                    c.current_rate, limit, percent, status
                )?;
                if c.years_until_limit.is_finite() {
                    write!(f, ", {:.1} years to limit", c.years_until_limit)?;
                }
                Ok(())
            }
            _ => write!(f, "Compliance: unavailable"),
        }
    }
}

/// Forecast engine over a historical-data provider.
pub struct LevyForecaster<P> {
    provider: P,
    limits: StatutoryLimits,
    gateway: Option<Arc<dyn LlmGateway>>,
    settings: GenerationSettings,
}

impl<P: HistoricalDataProvider> LevyForecaster<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            limits: StatutoryLimits::default(),
            gateway: None,
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_limits(mut self, limits: StatutoryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach an [`HttpGateway`] when LLM credentials are in the environment.
    pub fn with_env_gateway(mut self) -> Self {
        match HttpGateway::from_env() {
            Some(gateway) => {
                self.settings = GenerationSettings::from(gateway.config());
                self.gateway = Some(Arc::new(gateway));
            }
            None => debug!("no LLM credentials, ai_enhanced model disabled"),
        }
        self
    }

    pub fn limits(&self) -> &StatutoryLimits {
        &self.limits
    }

    /// Whether the AI-enhanced model joins the ensemble.
    pub fn ai_available(&self) -> bool {
        self.gateway.as_ref().is_some_and(|g| g.is_available())
    }

    /// Ensemble for a run, honouring a supported preferred model.
    fn ensemble(&self, preferred: Option<ModelKind>) -> Vec<ModelKind> {
        let ai = self.ai_available();
        if let Some(kind) = preferred {
            if !kind.requires_gateway() || ai {
                return vec![kind];
            }
            warn!(model = %kind, "preferred model unavailable, using full ensemble");
        }
        let mut models = ModelKind::STATISTICAL.to_vec();
        if ai {
            models.push(ModelKind::AiEnhanced);
        }
        models
    }

    /// Build the forecast report for `tax_code_id`.
    pub fn forecast_for_tax_code(
        &self,
        tax_code_id: &str,
        options: &ForecastOptions,
    ) -> Result<ForecastReport> {
        options.validate()?;

        let tax_code = self.provider.get_tax_code(tax_code_id)?;
        let history = self.provider.get_historical_rates(tax_code_id)?;
        if history.len() < MIN_HISTORY {
            return Err(ForecastError::InsufficientData {
                needed: MIN_HISTORY,
                got: history.len(),
            });
        }

        let series = RateSeries::from_history(&history)?;
        let (years, rates) = (&series.years[..], &series.rates[..]);
        let mut district = tax_code.district.clone();
        if district.assessed_value_history.is_empty() {
            district.assessed_value_history = series.assessed_values.clone();
        }

        let models = self.ensemble(options.preferred_model);
        let ai_context = self.gateway.as_ref().map(|gateway| AiContext {
            district: district.clone(),
            gateway: Arc::clone(gateway),
            settings: self.settings,
        });

        let (mut model_evaluation, ai_base) =
            match evaluate_models(years, rates, options.holdout, &models, ai_context.as_ref()) {
                Ok(evaluation) => {
                    let base = evaluation
                        .ai_base_model
                        .unwrap_or_else(|| evaluation.best_statistical());
                    (evaluation.results, base)
                }
                Err(e) => {
                    warn!(tax_code = %tax_code.code, error = %e, "model evaluation skipped");
                    (BTreeMap::new(), ModelKind::Linear)
                }
            };

        let last_year = series.last_year().unwrap_or_default();
        let forecast_years = options.forecast_years(last_year)?;

        let mut forecasts = BTreeMap::new();
        for kind in &models {
            let fitted = self.fit_model(*kind, years, rates, &district, ai_base);
            let result = fitted.and_then(|model| {
                forecast_model(&model, &forecast_years, rates, options.confidence_level)
            });
            match result {
                Ok(fc) => {
                    forecasts.insert(kind.name().to_string(), fc);
                }
                Err(e) => {
                    warn!(model = %kind, error = %e, "model unavailable for forecasting");
                    model_evaluation.insert(kind.name().to_string(), EvaluationResult::failed(&e));
                }
            }
        }
        if forecasts.is_empty() {
            return Err(ForecastError::ModelFitFailure(format!(
                "no model could be fitted for tax code {}",
                tax_code.code
            )));
        }

        let best_model = choose_best_model(&model_evaluation, &forecasts);
        let anomalies = detect_anomalies(years, rates, &options.anomaly)?;

        let current_rate = series.latest_rate().unwrap_or_default();
        let trend = (rates[rates.len() - 1] - rates[0]) / rates.len() as f64;
        let compliance = check_compliance(&district, current_rate, trend, &self.limits);

        let assessed_value = series
            .assessed_values
            .last()
            .or(district.assessed_value_history.last())
            .copied();
        let projected_levy = match (assessed_value, forecasts.get(&best_model)) {
            (Some(av), Some(fc)) => Some(fc.forecast.iter().map(|&r| project_levy(r, av)).collect()),
            _ => None,
        };

        info!(
            tax_code = %tax_code.code,
            models = forecasts.len(),
            best_model = %best_model,
            anomalies = anomalies.len(),
            "forecast report assembled"
        );

        Ok(ForecastReport {
            tax_code: tax_code.code,
            tax_code_id: tax_code_id.to_string(),
            district,
            historical_years: series.years.clone(),
            historical_rates: series.rates.clone(),
            forecast_years,
            forecasts,
            best_model,
            model_evaluation,
            anomalies,
            compliance,
            projected_levy,
            generation_time: Utc::now().to_rfc3339(),
        })
    }

    fn fit_model(
        &self,
        kind: ModelKind,
        years: &[i32],
        rates: &[f64],
        district: &DistrictInfo,
        ai_base: ModelKind,
    ) -> Result<FittedModel> {
        if !kind.requires_gateway() {
            return FittedModel::fit(kind, years, rates);
        }
        let mut model = AiEnhancedForecaster::fit(ai_base, years, rates)?
            .with_district(district.clone())
            .with_settings(self.settings);
        if let Some(gateway) = &self.gateway {
            model = model.with_gateway(Arc::clone(gateway));
        }
        Ok(FittedModel::AiEnhanced(model))
    }
}

/// Point forecasts, clamped at zero, with intervals from the rate spread.
fn forecast_model(
    model: &FittedModel,
    forecast_years: &[i32],
    historical: &[f64],
    confidence: f64,
) -> Result<ModelForecast> {
    let forecast = forecast_years
        .iter()
        .map(|&year| {
            let value = model.predict(year)?;
            if !value.is_finite() {
                return Err(ForecastError::ComputationError(format!(
                    "{} produced a non-finite forecast for {}",
                    model.name(),
                    year
                )));
            }
            Ok(value.max(0.0))
        })
        .collect::<Result<Vec<f64>>>()?;

    let (lower, upper) = prediction_intervals(&forecast, historical, confidence)?;
    Ok(ModelForecast {
        forecast,
        lower,
        upper,
    })
}

/// Best evaluated model that also produced a forecast; Linear, then the
/// first forecast model, when none scored.
fn choose_best_model(
    evaluation: &BTreeMap<String, EvaluationResult>,
    forecasts: &BTreeMap<String, ModelForecast>,
) -> String {
    let forecastable: BTreeMap<String, EvaluationResult> = evaluation
        .iter()
        .filter(|(name, _)| forecasts.contains_key(*name))
        .map(|(name, result)| (name.clone(), result.clone()))
        .collect();

    select_best_model(&forecastable)
        .or_else(|| {
            forecasts
                .contains_key(ModelKind::Linear.name())
                .then(|| ModelKind::Linear.name().to_string())
        })
        .or_else(|| forecasts.keys().next().cloned())
        .unwrap_or_default()
}
