//! Statutory-limit compliance checks.

use crate::data::DistrictInfo;
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Years-until-limit below which a district is approaching its ceiling.
pub const APPROACHING_YEARS: f64 = 3.0;

/// Reference ceilings, per $1000 of assessed value.
const DEFAULT_LIMITS: [(&str, f64); 9] = [
    ("School", 2.5),
    ("County", 1.8),
    ("City", 3.0),
    ("Fire", 1.5),
    ("Library", 0.5),
    ("Port", 0.45),
    ("Hospital", 0.75),
    ("Parks", 0.6),
    ("EMS", 0.5),
];

/// Rate ceiling per district type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatutoryLimits {
    limits: BTreeMap<String, f64>,
}

impl Default for StatutoryLimits {
    fn default() -> Self {
        Self {
            limits: DEFAULT_LIMITS
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }
}

impl StatutoryLimits {
    /// Table with no limits.
    pub fn empty() -> Self {
        Self {
            limits: BTreeMap::new(),
        }
    }

    /// Table built from `(district_type, limit)` pairs.
    pub fn from_map<I, K>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        entries
            .into_iter()
            .try_fold(Self::empty(), |table, (k, v)| table.with_limit(k, v))
    }

    /// Add or replace one limit.
    pub fn with_limit(mut self, district_type: impl Into<String>, limit: f64) -> Result<Self> {
        let district_type = district_type.into();
        if !(limit.is_finite() && limit > 0.0) {
            return Err(ForecastError::InvalidParameter {
                param: format!("limit[{}]", district_type),
                value: limit.to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        self.limits.insert(district_type, limit);
        Ok(self)
    }

    /// Exact match first, then case-insensitive.
    pub fn get(&self, district_type: &str) -> Option<f64> {
        self.limits.get(district_type).copied().or_else(|| {
            let wanted = district_type.trim().to_lowercase();
            self.limits
                .iter()
                .find(|(k, _)| k.to_lowercase() == wanted)
                .map(|(_, v)| *v)
        })
    }

    pub fn lookup(&self, district_type: &str) -> Result<f64> {
        self.get(district_type)
            .ok_or_else(|| ForecastError::UnknownDistrictType(district_type.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.limits.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

/// Compliance status of a district against its statutory limit.
///
/// When the district type has no limit, `error` is set, both flags are
/// false and `years_until_limit` is `+∞`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub district: String,
    #[serde(rename = "type")]
    pub district_type: String,
    pub current_rate: f64,
    pub statutory_limit: Option<f64>,
    /// Rate change per year
    pub trend: f64,
    pub approaching_limit: bool,
    pub exceeds_limit: bool,
    #[serde(with = "crate::serde_ext::infinite_as_null")]
    pub years_until_limit: f64,
    pub percent_of_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComplianceReport {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Years until `current_rate` reaches `limit` at `trend` per year.
///
/// Zero when already over the limit. `+∞` when sitting exactly at the
/// limit or when the trend is not rising.
pub fn years_until_limit(current_rate: f64, limit: f64, trend: f64) -> f64 {
    if current_rate > limit {
        0.0
    } else if current_rate < limit && trend > 0.0 {
        (limit - current_rate) / trend
    } else {
        f64::INFINITY
    }
}

/// Check `current_rate` against the limit for the district's type.
pub fn check_compliance(
    district: &DistrictInfo,
    current_rate: f64,
    trend: f64,
    limits: &StatutoryLimits,
) -> ComplianceReport {
    let limit = match limits.lookup(&district.district_type) {
        Ok(limit) => limit,
        Err(e) => {
            warn!(district = %district.name, district_type = %district.district_type, "no statutory limit for district type");
            return ComplianceReport {
                district: district.name.clone(),
                district_type: district.district_type.clone(),
                current_rate,
                statutory_limit: None,
                trend,
                approaching_limit: false,
                exceeds_limit: false,
                years_until_limit: f64::INFINITY,
                percent_of_limit: None,
                error: Some(e.to_string()),
            };
        }
    };

    let exceeds_limit = current_rate > limit;
    let years = years_until_limit(current_rate, limit, trend);
    ComplianceReport {
        district: district.name.clone(),
        district_type: district.district_type.clone(),
        current_rate,
        statutory_limit: Some(limit),
        trend,
        approaching_limit: !exceeds_limit && years < APPROACHING_YEARS,
        exceeds_limit,
        years_until_limit: years,
        percent_of_limit: Some(current_rate / limit * 100.0),
        error: None,
    }
}
