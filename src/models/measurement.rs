//! Measurement models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Location selector; `magic` accepts free text like "Europe" or "AS13335".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub magic: String,
}

/// Body of `POST /measurements`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementCreate {
    #[serde(rename = "type")]
    pub measurement_type: String,
    pub target: String,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub in_progress_updates: bool,
    /// Type-specific options, passed through as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementCreateResponse {
    pub id: String,
    #[serde(default)]
    pub probes_count: u32,
}

/// `{"error": {...}}` envelope returned on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasurementErrorResponse {
    #[serde(default)]
    pub error: MeasurementErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasurementErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasurementStatus {
    InProgress,
    Failed,
    Offline,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeDetails {
    pub continent: String,
    pub region: String,
    pub country: String,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub asn: u32,
    pub network: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub status: MeasurementStatus,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_hostname: Option<String>,
    /// Type-specific payload (`stats`, `timings`, `hops`, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeMeasurement {
    pub probe: ProbeDetails,
    pub result: ProbeResult,
}

/// Body of `GET /measurements/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub id: String,
    #[serde(rename = "type")]
    pub measurement_type: String,
    pub status: MeasurementStatus,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    pub target: String,
    #[serde(default)]
    pub probes_count: u32,
    #[serde(default)]
    pub results: Vec<ProbeMeasurement>,
}
