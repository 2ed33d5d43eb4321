//! AI-enhanced forecaster: a statistical base refined by an LLM answer.
//!
//! The LLM is asked for a single number and its answer is only ever used
//! through [`clamp_ai_prediction`]. Any gateway problem (no gateway, offline,
//! transport error, unparsable reply) yields the base prediction unchanged.

use super::{FittedModel, ModelKind};
use crate::data::DistrictInfo;
use crate::error::{ForecastError, Result};
use crate::gateway::{parse_first_float, GatewayConfig, LlmGateway};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Relative deviation from the base beyond which the LLM answer is blended.
pub const MAX_RELATIVE_DEVIATION: f64 = 0.5;
/// Weight kept on the base prediction when blending.
pub const BASE_WEIGHT: f64 = 0.7;

/// Sampling settings passed to the gateway on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 50,
            temperature: 0.0,
        }
    }
}

impl From<&GatewayConfig> for GenerationSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Statistical base model plus an optional LLM gateway.
pub struct AiEnhancedForecaster {
    base: Box<FittedModel>,
    years: Vec<i32>,
    rates: Vec<f64>,
    district: Option<DistrictInfo>,
    gateway: Option<Arc<dyn LlmGateway>>,
    settings: GenerationSettings,
}

impl std::fmt::Debug for AiEnhancedForecaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiEnhancedForecaster")
            .field("base", &self.base)
            .field("district", &self.district)
            .field("gateway_available", &self.gateway_available())
            .field("settings", &self.settings)
            .finish()
    }
}

impl AiEnhancedForecaster {
    /// Fit `base_kind` on `(years, rates)` and wrap it.
    pub fn fit(base_kind: ModelKind, years: &[i32], rates: &[f64]) -> Result<Self> {
        if base_kind.requires_gateway() {
            return Err(ForecastError::InvalidModel(
                "ai_enhanced cannot use itself as a base model".to_string(),
            ));
        }
        let base = FittedModel::fit(base_kind, years, rates)?;
        Ok(Self::new(base, years, rates))
    }

    /// Wrap an already fitted statistical model.
    pub fn new(base: FittedModel, years: &[i32], rates: &[f64]) -> Self {
        Self {
            base: Box::new(base),
            years: years.to_vec(),
            rates: rates.to_vec(),
            district: None,
            gateway: None,
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_district(mut self, district: DistrictInfo) -> Self {
        self.district = Some(district);
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

    pub fn base(&self) -> &FittedModel {
        &self.base
    }

    /// True when a gateway is attached and reports itself usable.
    pub fn gateway_available(&self) -> bool {
        self.gateway.as_ref().is_some_and(|g| g.is_available())
    }

    pub fn predict(&self, year: i32) -> Result<f64> {
        let base_pred = self.base.predict(year)?;

        let gateway = match &self.gateway {
            Some(gateway) if gateway.is_available() => gateway,
            _ => return Ok(base_pred),
        };

        let prompt = build_prompt(
            &self.years,
            &self.rates,
            self.district.as_ref(),
            self.base.name(),
            year,
            base_pred,
        );

        let reply = match gateway.generate(
            &prompt,
            self.settings.max_tokens,
            self.settings.temperature,
        ) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(year, error = %e, "LLM gateway failed, using base prediction");
                return Ok(base_pred);
            }
        };

        match parse_first_float(&reply) {
            Some(candidate) => {
                let value = clamp_ai_prediction(base_pred, candidate);
                debug!(year, base_pred, candidate, value, "AI-enhanced prediction");
                Ok(value)
            }
            None => {
                debug!(year, reply = %reply.trim(), "no number in LLM reply, using base prediction");
                Ok(base_pred)
            }
        }
    }
}

/// Bound an LLM candidate against the base prediction.
///
/// Negative or non-finite candidates are discarded. Candidates further than
/// half the base away are blended `0.7·base + 0.3·candidate`.
pub fn clamp_ai_prediction(base_pred: f64, candidate: f64) -> f64 {
    if !candidate.is_finite() || candidate < 0.0 {
        return base_pred;
    }
    if (candidate - base_pred).abs() > MAX_RELATIVE_DEVIATION * base_pred.abs() {
        BASE_WEIGHT * base_pred + (1.0 - BASE_WEIGHT) * candidate
    } else {
        candidate
    }
}

/// Prompt asking the LLM for a single refined levy rate.
pub fn build_prompt(
    years: &[i32],
    rates: &[f64],
    district: Option<&DistrictInfo>,
    base_model: &str,
    target_year: i32,
    base_prediction: f64,
) -> String {
    let mut prompt = String::from(
        "You are a property tax analyst forecasting levy rates \
         (dollars per $1000 of assessed value).\n\nHistorical levy rates:\n",
    );
    for (i, (year, rate)) in years.iter().zip(rates.iter()).enumerate() {
        let _ = writeln!(prompt, "{}. {}: {:.4}", i + 1, year, rate);
    }

    prompt.push_str("\nDistrict:\n");
    match district {
        Some(d) => {
            let _ = writeln!(prompt, "- name: {}", d.name);
            let _ = writeln!(prompt, "- code: {}", d.code);
            let _ = writeln!(prompt, "- type: {}", d.district_type);
            if let Some(latest) = d.assessed_value_history.last() {
                let _ = writeln!(prompt, "- latest assessed value: {:.0}", latest);
            }
        }
        None => prompt.push_str("- unknown\n"),
    }

    let _ = write!(
        prompt,
        "\nThe {} model predicts {:.4} for {}.\n\
         Considering the history and district context, give your best estimate \
         of the {} levy rate. Respond with a single number on one line and nothing else.",
        base_model, base_prediction, target_year, target_year
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedGateway {
        reply: String,
        calls: AtomicUsize,
    }

    impl FixedGateway {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl LlmGateway for FixedGateway {
        fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f64) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct OfflineGateway;

    impl LlmGateway for OfflineGateway {
        fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f64) -> Result<String> {
            Err(ForecastError::GatewayUnavailable("offline".to_string()))
        }

        fn is_available(&self) -> bool {
            false
        }
    }

    struct BrokenGateway;

    impl LlmGateway for BrokenGateway {
        fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f64) -> Result<String> {
            Err(ForecastError::GatewayUnavailable("timeout".to_string()))
        }
    }

    /// Linear base predicting exactly 1.5 for 2025.
    fn forecaster() -> AiEnhancedForecaster {
        AiEnhancedForecaster::fit(
            ModelKind::Linear,
            &[2021, 2022, 2023, 2024],
            &[1.1, 1.2, 1.3, 1.4],
        )
        .unwrap()
        .with_district(DistrictInfo::new("Central School", "SD-1", "School"))
    }

    #[test]
    fn test_clamp_rules() {
        assert_relative_eq!(clamp_ai_prediction(1.5, 5.0), 2.55, epsilon = 1e-12);
        assert_eq!(clamp_ai_prediction(1.5, -1.0), 1.5);
        assert_eq!(clamp_ai_prediction(1.5, f64::NAN), 1.5);
        assert_eq!(clamp_ai_prediction(1.5, 1.9), 1.9);
        assert_eq!(clamp_ai_prediction(1.5, 2.25), 2.25);
    }

    #[test]
    fn test_outlier_reply_is_blended() {
        let model = forecaster().with_gateway(FixedGateway::new("5.0"));
        assert_relative_eq!(model.predict(2025).unwrap(), 2.55, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_reply_returns_base() {
        let model = forecaster().with_gateway(FixedGateway::new("-1"));
        assert_relative_eq!(model.predict(2025).unwrap(), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_plausible_reply_is_used() {
        let model = forecaster().with_gateway(FixedGateway::new("Estimate: 1.62"));
        assert_relative_eq!(model.predict(2025).unwrap(), 1.62, epsilon = 1e-12);
    }

    #[test]
    fn test_unparsable_reply_returns_base() {
        let model = forecaster().with_gateway(FixedGateway::new("I cannot say."));
        assert_relative_eq!(model.predict(2025).unwrap(), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_unavailable_gateway_is_not_called() {
        let model = forecaster().with_gateway(Arc::new(OfflineGateway));
        assert!(!model.gateway_available());
        assert_relative_eq!(model.predict(2025).unwrap(), 1.5, epsilon = 1e-9);

        let model = forecaster().with_gateway(Arc::new(BrokenGateway));
        assert!(model.gateway_available());
        assert_relative_eq!(model.predict(2025).unwrap(), 1.5, epsilon = 1e-9);

        let model = forecaster();
        assert!(!model.gateway_available());
        assert_relative_eq!(model.predict(2025).unwrap(), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_gateway_called_once_per_prediction() {
        let gateway = FixedGateway::new("1.5");
        let model = forecaster().with_gateway(gateway.clone());
        model.predict(2025).unwrap();
        model.predict(2026).unwrap();
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_prompt_contents() {
        let district = DistrictInfo::new("Fire 3", "FD-3", "Fire");
        let prompt = build_prompt(
            &[2022, 2023],
            &[1.2, 1.25],
            Some(&district),
            "linear",
            2024,
            1.3,
        );
        assert!(prompt.contains("1. 2022: 1.2000"));
        assert!(prompt.contains("2. 2023: 1.2500"));
        assert!(prompt.contains("- type: Fire"));
        assert!(prompt.contains("The linear model predicts 1.3000 for 2024"));
        assert!(prompt.contains("single number"));

        let prompt = build_prompt(&[2022], &[1.2], None, "arima", 2023, 1.2);
        assert!(prompt.contains("- unknown"));
    }

    #[test]
    fn test_rejects_self_as_base() {
        assert!(matches!(
            AiEnhancedForecaster::fit(ModelKind::AiEnhanced, &[2020, 2021], &[1.0, 1.1]),
            Err(ForecastError::InvalidModel(_))
        ));
    }
}
