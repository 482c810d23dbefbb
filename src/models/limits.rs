//! Rate limit models (`GET /limits`)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsResponse {
    #[serde(default)]
    pub rate_limit: RateLimits,
    /// Only present for authenticated requests
    #[serde(default)]
    pub credits: CreditLimits,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default)]
    pub measurements: MeasurementsLimits,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementsLimits {
    #[serde(default)]
    pub create: CreateLimits,
}

/// Whether the limit applies to the caller's IP or to their account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateLimitType {
    #[default]
    Ip,
    User,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateLimits {
    #[serde(rename = "type", default)]
    pub limit_type: CreateLimitType,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub remaining: i64,
    /// Seconds until the window resets
    #[serde(default)]
    pub reset: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditLimits {
    #[serde(default)]
    pub remaining: i64,
}
