//! Property-tax levy rate forecasting.
//!
//! This crate fits Linear, Exponential, ARIMA and (optionally) LLM-assisted
//! models to a tax code's levy-rate history, produces point forecasts with
//! prediction intervals, ranks the models on a hold-out year, flags
//! anomalous years and checks the statutory rate limit.
//!
//! ```no_run
//! use levy_fcst_core::{ForecastOptions, InMemoryDataProvider, LevyForecaster};
//!
//! let provider = InMemoryDataProvider::new();
//! let engine = LevyForecaster::new(provider).with_env_gateway();
//! let report = engine.forecast_for_tax_code("1001", &ForecastOptions::default())?;
//! println!("{}", report);
//! # Ok::<(), levy_fcst_core::ForecastError>(())
//! ```

pub mod anomaly;
pub mod chart;
pub mod compliance;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod forecast;
pub mod gateway;
pub mod intervals;
pub mod metrics;
pub mod models;
pub mod regression;
mod serde_ext;
pub mod stats;

// Re-exports for convenience
pub use anomaly::{detect_anomalies, Anomaly, AnomalyDetail, AnomalyMethod, AnomalyOptions};
pub use chart::{shape_chart_data, ChartData};
pub use compliance::{check_compliance, ComplianceReport, StatutoryLimits};
pub use data::{
    project_levy, DistrictInfo, HistoricalDataProvider, HistoricalRate, InMemoryDataProvider,
    RateSeries, TaxCode,
};
pub use error::{ForecastError, Result};
pub use evaluation::{
    evaluate_models, select_best_model, AiContext, Evaluation, EvaluationResult, HoldOut,
    ModelScore,
};
pub use forecast::{ForecastOptions, ForecastReport, LevyForecaster, ModelForecast};
pub use gateway::{parse_first_float, GatewayConfig, HttpGateway, LlmGateway};
pub use intervals::{prediction_intervals, z_score};
pub use metrics::{bias, mae, mse, percent_error, rmse};
pub use models::{
    AiEnhancedForecaster, ArimaForecaster, ArimaOrder, ExponentialForecaster, FittedModel,
    GenerationSettings, LinearForecaster, ModelKind,
};
