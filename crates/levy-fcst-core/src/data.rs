//! Historical levy data types and the inbound data-provider interface.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One observed levy year for a tax code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRate {
    /// Levy year
    pub year: i32,
    /// Levy rate per $1000 of assessed value
    pub rate: f64,
    /// Total levy amount, if known
    pub levy_amount: Option<f64>,
    /// Total assessed value, if known
    pub assessed_value: Option<f64>,
}

impl HistoricalRate {
    /// Create a record with only year and rate.
    pub fn new(year: i32, rate: f64) -> Result<Self> {
        Self::with_amounts(year, rate, None, None)
    }

    /// Create a record including levy amount and assessed value.
    pub fn with_amounts(
        year: i32,
        rate: f64,
        levy_amount: Option<f64>,
        assessed_value: Option<f64>,
    ) -> Result<Self> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(ForecastError::InvalidParameter {
                param: "rate".into(),
                value: rate.to_string(),
                reason: "must be a finite, non-negative number".into(),
            });
        }
        Ok(Self {
            year,
            rate,
            levy_amount,
            assessed_value,
        })
    }
}

/// Metadata for the taxing district behind a tax code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistrictInfo {
    pub name: String,
    pub code: String,
    /// District type tag used for statutory-limit lookup (e.g. "School")
    #[serde(rename = "type")]
    pub district_type: String,
    #[serde(default)]
    pub assessed_value_history: Vec<f64>,
}

impl DistrictInfo {
    pub fn new(
        name: impl Into<String>,
        code: impl Into<String>,
        district_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            district_type: district_type.into(),
            assessed_value_history: Vec::new(),
        }
    }
}

/// A tax code record as returned by the data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxCode {
    pub code: String,
    pub district: DistrictInfo,
}

/// Supplies tax codes and their historical levy rates.
///
/// Implementations wrap whatever store holds the levy history; the engine
/// only needs these two lookups.
pub trait HistoricalDataProvider {
    /// Look up a tax code by identifier.
    fn get_tax_code(&self, id: &str) -> Result<TaxCode>;

    /// Historical rates for a tax code, ordered by year ascending.
    fn get_historical_rates(&self, id: &str) -> Result<Vec<HistoricalRate>>;
}

impl<P: HistoricalDataProvider + ?Sized> HistoricalDataProvider for &P {
    fn get_tax_code(&self, id: &str) -> Result<TaxCode> {
        (**self).get_tax_code(id)
    }

    fn get_historical_rates(&self, id: &str) -> Result<Vec<HistoricalRate>> {
        (**self).get_historical_rates(id)
    }
}

/// Provider backed by an in-process map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataProvider {
    entries: HashMap<String, (TaxCode, Vec<HistoricalRate>)>,
}

impl InMemoryDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tax code with its history. Records are sorted by year;
    /// duplicate years are rejected.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        tax_code: TaxCode,
        mut history: Vec<HistoricalRate>,
    ) -> Result<()> {
        history.sort_by_key(|r| r.year);
        if let Some(pair) = history.windows(2).find(|w| w[0].year == w[1].year) {
            return Err(ForecastError::InvalidInput(format!(
                "Duplicate levy year {} for tax code {}",
                pair[0].year, tax_code.code
            )));
        }
        self.entries.insert(id.into(), (tax_code, history));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HistoricalDataProvider for InMemoryDataProvider {
    fn get_tax_code(&self, id: &str) -> Result<TaxCode> {
        self.entries
            .get(id)
            .map(|(code, _)| code.clone())
            .ok_or_else(|| ForecastError::TaxCodeNotFound(id.to_string()))
    }

    fn get_historical_rates(&self, id: &str) -> Result<Vec<HistoricalRate>> {
        self.entries
            .get(id)
            .map(|(_, history)| history.clone())
            .ok_or_else(|| ForecastError::TaxCodeNotFound(id.to_string()))
    }
}

/// Parallel year/rate arrays extracted from a history.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSeries {
    pub years: Vec<i32>,
    pub rates: Vec<f64>,
    /// Assessed values present in the history, in year order
    pub assessed_values: Vec<f64>,
}

impl RateSeries {
    /// Extract arrays from provider records, enforcing strictly increasing years.
    pub fn from_history(history: &[HistoricalRate]) -> Result<Self> {
        if let Some(pair) = history.windows(2).find(|w| w[1].year <= w[0].year) {
            return Err(ForecastError::InvalidInput(format!(
                "Historical rates must be strictly ordered by year: {} followed by {}",
                pair[0].year, pair[1].year
            )));
        }
        Ok(Self {
            years: history.iter().map(|r| r.year).collect(),
            rates: history.iter().map(|r| r.rate).collect(),
            assessed_values: history.iter().filter_map(|r| r.assessed_value).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn first_year(&self) -> Option<i32> {
        self.years.first().copied()
    }

    pub fn last_year(&self) -> Option<i32> {
        self.years.last().copied()
    }

    pub fn latest_rate(&self) -> Option<f64> {
        self.rates.last().copied()
    }
}

/// Levy amount implied by a rate per $1000 of assessed value.
pub fn project_levy(rate: f64, assessed_value: f64) -> f64 {
    rate * assessed_value / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn school_code() -> TaxCode {
        TaxCode {
            code: "TC-100".into(),
            district: DistrictInfo::new("Central School", "SD-1", "School"),
        }
    }

    #[test]
    fn test_rejects_negative_rate() {
        assert!(HistoricalRate::new(2020, -0.1).is_err());
        assert!(HistoricalRate::new(2020, f64::NAN).is_err());
        assert!(HistoricalRate::new(2020, 0.0).is_ok());
    }

    #[test]
    fn test_in_memory_provider_sorts_history() {
        let mut provider = InMemoryDataProvider::new();
        let history = vec![
            HistoricalRate::new(2022, 1.2).unwrap(),
            HistoricalRate::new(2020, 1.0).unwrap(),
            HistoricalRate::new(2021, 1.1).unwrap(),
        ];
        provider.insert("100", school_code(), history).unwrap();

        let rates = provider.get_historical_rates("100").unwrap();
        let years: Vec<i32> = rates.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2020, 2021, 2022]);
        assert_eq!(provider.get_tax_code("100").unwrap().code, "TC-100");
    }

    #[test]
    fn test_in_memory_provider_rejects_duplicate_years() {
        let mut provider = InMemoryDataProvider::new();
        let history = vec![
            HistoricalRate::new(2020, 1.0).unwrap(),
            HistoricalRate::new(2020, 1.1).unwrap(),
        ];
        assert!(provider.insert("100", school_code(), history).is_err());
        assert!(provider.is_empty());
    }

    #[test]
    fn test_missing_tax_code() {
        let provider = InMemoryDataProvider::new();
        assert_eq!(
            provider.get_tax_code("nope").unwrap_err(),
            ForecastError::TaxCodeNotFound("nope".into())
        );
    }

    #[test]
    fn test_rate_series_extraction() {
        let history = vec![
            HistoricalRate::with_amounts(2020, 1.0, Some(1000.0), Some(1_000_000.0)).unwrap(),
            HistoricalRate::new(2021, 1.1).unwrap(),
            HistoricalRate::with_amounts(2022, 1.2, None, Some(1_100_000.0)).unwrap(),
        ];
        let series = RateSeries::from_history(&history).unwrap();
        assert_eq!(series.years, vec![2020, 2021, 2022]);
        assert_eq!(series.assessed_values, vec![1_000_000.0, 1_100_000.0]);
        assert_eq!(series.latest_rate(), Some(1.2));

        let unordered = vec![
            HistoricalRate::new(2021, 1.0).unwrap(),
            HistoricalRate::new(2020, 1.1).unwrap(),
        ];
        assert!(RateSeries::from_history(&unordered).is_err());
    }

    #[test]
    fn test_district_type_serializes_as_type() {
        let district = DistrictInfo::new("Fire 3", "FD-3", "Fire");
        let json = serde_json::to_value(&district).unwrap();
        assert_eq!(json["type"], "Fire");
    }

    #[test]
    fn test_project_levy() {
        assert_relative_eq!(project_levy(2.5, 2_000_000.0), 5_000.0);
    }
}
