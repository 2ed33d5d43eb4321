//! Plot-ready arrays over the combined historical + forecast year axis.

use crate::error::{ForecastError, Result};
use crate::forecast::ModelForecast;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parallel arrays, all `|historical_years| + |forecast_years|` long.
///
/// Per-model series are flattened into `<model>_forecast`, `<model>_lower`
/// and `<model>_upper`, each null over the historical slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub years: Vec<i32>,
    pub historical: Vec<Option<f64>>,
    #[serde(flatten)]
    pub series: BTreeMap<String, Vec<Option<f64>>>,
}

impl ChartData {
    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Series by key, e.g. `"linear_upper"`.
    pub fn series(&self, key: &str) -> Option<&[Option<f64>]> {
        self.series.get(key).map(Vec::as_slice)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ForecastError::ComputationError(format!("chart serialization: {}", e)))
    }
}

/// Shape historical values and per-model forecasts for plotting.
pub fn shape_chart_data(
    historical_years: &[i32],
    historical_values: &[f64],
    future_years: &[i32],
    forecasts: &BTreeMap<String, ModelForecast>,
) -> Result<ChartData> {
    if historical_years.len() != historical_values.len() {
        return Err(ForecastError::InvalidInput(format!(
            "historical years and values differ in length: {} vs {}",
            historical_years.len(),
            historical_values.len()
        )));
    }

    let n_hist = historical_years.len();
    let n_future = future_years.len();

    let years: Vec<i32> = historical_years
        .iter()
        .chain(future_years.iter())
        .copied()
        .collect();

    let mut historical: Vec<Option<f64>> = historical_values.iter().map(|&v| Some(v)).collect();
    historical.resize(n_hist + n_future, None);

    let mut series = BTreeMap::new();
    for (model, fc) in forecasts {
        for (suffix, values) in [
            ("forecast", &fc.forecast),
            ("lower", &fc.lower),
            ("upper", &fc.upper),
        ] {
            if values.len() != n_future {
                return Err(ForecastError::InvalidInput(format!(
                    "{}_{} has {} values for {} forecast years",
                    model,
                    suffix,
                    values.len(),
                    n_future
                )));
            }
            let padded: Vec<Option<f64>> = std::iter::repeat(None)
                .take(n_hist)
                .chain(values.iter().map(|&v| Some(v)))
                .collect();
            series.insert(format!("{}_{}", model, suffix), padded);
        }
    }

    Ok(ChartData {
        years,
        historical,
        series,
    })
}
