//! Error types for the levy forecasting engine.

use thiserror::Error;

/// Result type for forecast operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Error types for levy forecasting operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("Insufficient data: need at least {needed} observations, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Invalid target year {year}: history starts at {earliest}")]
    InvalidTarget { year: i32, earliest: i32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid parameter '{param}' = '{value}': {reason}")]
    InvalidParameter {
        param: String,
        value: String,
        reason: String,
    },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Model fit failure: {0}")]
    ModelFitFailure(String),

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("LLM gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Unknown district type: {0}")]
    UnknownDistrictType(String),

    #[error("Tax code not found: {0}")]
    TaxCodeNotFound(String),
}

impl ForecastError {
    /// Convert to a stable numeric error code for report consumers.
    pub fn to_code(&self) -> i32 {
        match self {
            ForecastError::InsufficientData { .. } => 1,
            ForecastError::InvalidTarget { .. } => 2,
            ForecastError::InvalidInput(_) => 3,
            ForecastError::InvalidParameter { .. } => 4,
            ForecastError::InvalidModel(_) => 5,
            ForecastError::ModelFitFailure(_) => 6,
            ForecastError::ComputationError(_) => 7,
            ForecastError::GatewayUnavailable(_) => 8,
            ForecastError::UnknownDistrictType(_) => 9,
            ForecastError::TaxCodeNotFound(_) => 10,
        }
    }

    /// Whether the error is recorded inside a report instead of aborting it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ForecastError::ModelFitFailure(_)
                | ForecastError::ComputationError(_)
                | ForecastError::GatewayUnavailable(_)
                | ForecastError::UnknownDistrictType(_)
        )
    }
}
