//! Hold-out evaluation and best-model selection.
//!
//! Every model is fitted on the same training slice (all years before the
//! hold-out year) and scored on the held-out rate. A model that fails to fit
//! or predict is recorded with its error message; the others are still
//! scored.

use crate::data::DistrictInfo;
use crate::error::{ForecastError, Result};
use crate::gateway::LlmGateway;
use crate::metrics;
use crate::models::{AiEnhancedForecaster, FittedModel, GenerationSettings, ModelKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Year held out of training, with its observed rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldOut {
    pub year: i32,
    pub actual: f64,
}

/// Metrics for one model on the hold-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub predicted: f64,
    pub actual: f64,
    /// Signed `predicted - actual`
    pub error: f64,
    pub mae: f64,
    pub rmse: f64,
    #[serde(with = "crate::serde_ext::infinite_as_null")]
    pub percent_error: f64,
    /// Set when the prediction came from a degraded fallback model
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

impl ModelScore {
    pub fn new(predicted: f64, actual: f64) -> Result<Self> {
        let (a, p) = ([actual], [predicted]);
        Ok(Self {
            predicted,
            actual,
            error: metrics::bias(&a, &p)?,
            mae: metrics::mae(&a, &p)?,
            rmse: metrics::rmse(&a, &p)?,
            percent_error: metrics::percent_error(&a, &p)?,
            fallback: false,
        })
    }
}

/// Outcome of evaluating one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvaluationResult {
    Scored(ModelScore),
    Failed { error_message: String },
}

impl EvaluationResult {
    pub fn failed(error: &ForecastError) -> Self {
        EvaluationResult::Failed {
            error_message: error.to_string(),
        }
    }

    pub fn score(&self) -> Option<&ModelScore> {
        match self {
            EvaluationResult::Scored(score) => Some(score),
            EvaluationResult::Failed { .. } => None,
        }
    }

    pub fn mae(&self) -> Option<f64> {
        self.score().map(|s| s.mae)
    }

    /// Scored by the model itself rather than a fallback.
    pub fn is_available(&self) -> bool {
        self.score().is_some_and(|s| !s.fallback)
    }
}

/// AI-enhanced evaluation needs district context and a gateway.
#[derive(Clone)]
pub struct AiContext {
    pub district: DistrictInfo,
    pub gateway: Arc<dyn LlmGateway>,
    pub settings: GenerationSettings,
}

/// Results of a hold-out evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub test_year: i32,
    pub actual: f64,
    pub results: BTreeMap<String, EvaluationResult>,
    pub best_model: Option<String>,
    /// Base model chosen for the AI-enhanced forecaster, if it was evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_base_model: Option<ModelKind>,
}

impl Evaluation {
    /// Best statistical model by the usual ranking, Linear if none scored.
    pub fn best_statistical(&self) -> ModelKind {
        best_statistical(&self.results)
    }
}

/// Evaluate `models` on `(years, rates)`.
///
/// Without `holdout` the last observation is held out. With one, training
/// uses the years strictly before `holdout.year`. The AI-enhanced model is
/// only evaluated when `ai` is supplied; its base is the best statistical
/// model from the same run.
pub fn evaluate_models(
    years: &[i32],
    rates: &[f64],
    holdout: Option<HoldOut>,
    models: &[ModelKind],
    ai: Option<&AiContext>,
) -> Result<Evaluation> {
    if years.len() != rates.len() {
        return Err(ForecastError::InvalidInput(format!(
            "years and rates must have the same length: {} vs {}",
            years.len(),
            rates.len()
        )));
    }

    let (train_len, holdout) = match holdout {
        Some(h) => (years.iter().take_while(|&&y| y < h.year).count(), h),
        None => {
            if years.is_empty() {
                return Err(ForecastError::InsufficientData { needed: 3, got: 0 });
            }
            let last = years.len() - 1;
            (
                last,
                HoldOut {
                    year: years[last],
                    actual: rates[last],
                },
            )
        }
    };
    if train_len < 2 {
        return Err(ForecastError::InsufficientData {
            needed: 2,
            got: train_len,
        });
    }
    let (train_years, train_rates) = (&years[..train_len], &rates[..train_len]);

    let mut results = BTreeMap::new();
    for kind in models.iter().filter(|k| !k.requires_gateway()) {
        let result = match FittedModel::fit(*kind, train_years, train_rates) {
            Ok(model) => score_model(&model, holdout),
            Err(e) => EvaluationResult::failed(&e),
        };
        log_result(*kind, &result);
        results.insert(kind.name().to_string(), result);
    }

    let mut ai_base_model = None;
    if let (true, Some(ctx)) = (models.contains(&ModelKind::AiEnhanced), ai) {
        let base_kind = best_statistical(&results);
        ai_base_model = Some(base_kind);
        let result = match AiEnhancedForecaster::fit(base_kind, train_years, train_rates) {
            Ok(model) => {
                let model = model
                    .with_district(ctx.district.clone())
                    .with_gateway(Arc::clone(&ctx.gateway))
                    .with_settings(ctx.settings);
                score_model(&FittedModel::AiEnhanced(model), holdout)
            }
            Err(e) => EvaluationResult::failed(&e),
        };
        log_result(ModelKind::AiEnhanced, &result);
        results.insert(ModelKind::AiEnhanced.name().to_string(), result);
    }

    let best_model = select_best_model(&results);
    debug!(test_year = holdout.year, best_model = ?best_model, "evaluation complete");

    Ok(Evaluation {
        test_year: holdout.year,
        actual: holdout.actual,
        results,
        best_model,
        ai_base_model,
    })
}

fn score_model(model: &FittedModel, holdout: HoldOut) -> EvaluationResult {
    let scored = model
        .predict(holdout.year)
        .and_then(|predicted| ModelScore::new(predicted, holdout.actual));
    match scored {
        Ok(mut score) => {
            score.fallback = model.uses_fallback();
            EvaluationResult::Scored(score)
        }
        Err(e) => EvaluationResult::failed(&e),
    }
}

fn log_result(kind: ModelKind, result: &EvaluationResult) {
    match result {
        EvaluationResult::Scored(score) => {
            debug!(model = %kind, mae = score.mae, fallback = score.fallback, "model scored")
        }
        EvaluationResult::Failed { error_message } => {
            warn!(model = %kind, error = %error_message, "model evaluation failed")
        }
    }
}

/// Pick the model with the smallest MAE, then RMSE, then name.
///
/// Models scored through a fallback only compete when nothing else scored.
pub fn select_best_model(results: &BTreeMap<String, EvaluationResult>) -> Option<String> {
    let rank = |only_available: bool| {
        results
            .iter()
            .filter_map(|(name, result)| result.score().map(|s| (name, s)))
            .filter(|(_, s)| !only_available || !s.fallback)
            .min_by(|(name_a, a), (name_b, b)| {
                a.mae
                    .total_cmp(&b.mae)
                    .then(a.rmse.total_cmp(&b.rmse))
                    .then_with(|| name_a.cmp(name_b))
            })
            .map(|(name, _)| name.clone())
    };
    rank(true).or_else(|| rank(false))
}

fn best_statistical(results: &BTreeMap<String, EvaluationResult>) -> ModelKind {
    let statistical: BTreeMap<String, EvaluationResult> = results
        .iter()
        .filter(|(name, _)| {
            name.parse::<ModelKind>()
                .is_ok_and(|kind| ModelKind::STATISTICAL.contains(&kind))
        })
        .map(|(name, result)| (name.clone(), result.clone()))
        .collect();
    select_best_model(&statistical)
        .and_then(|name| name.parse().ok())
        .unwrap_or(ModelKind::Linear)
}
