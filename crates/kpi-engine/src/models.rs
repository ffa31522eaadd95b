use chrono::{DateTime, Utc};
use metrics_core::MetricValue;
use serde::{Deserialize, Serialize};

/// A stored user-defined KPI. `formula` is the normalized string;
/// `inputs` the lower-cased metric dependencies extracted from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomKpi {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub formula: String,
    pub description: Option<String>,
    pub frequency: Option<String>,
    pub unit: Option<String>,
    pub inputs: Vec<String>,
    pub source_tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-supplied definition for create/upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KpiInput {
    pub name: String,
    pub formula: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub source_tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Immutable audit-trail snapshot, appended on every create/update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiVersion {
    pub kpi_id: i64,
    pub version_number: i64,
    pub formula: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Last-write-wins record of a past calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiUsageRecord {
    pub kpi_id: i64,
    pub ticker: String,
    pub period: String,
    pub value: Option<f64>,
    pub calculated_at: DateTime<Utc>,
}

/// One step of a calculation, kept for audit/citation display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationStep {
    pub description: String,
    pub metric: Option<String>,
    pub value: Option<f64>,
}

/// Outcome of `calculate_kpi`. Failures land in `error` with a null
/// value; this type never needs unwrapping at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiCalculationResult {
    pub kpi_id: i64,
    pub kpi_name: String,
    pub ticker: String,
    pub period: Option<String>,
    pub value: Option<f64>,
    pub formatted_value: Option<String>,
    pub unit: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<CalculationStep>,
    pub provenance: Vec<MetricValue>,
    pub calculated_at: DateTime<Utc>,
}

impl KpiCalculationResult {
    pub fn failed(
        kpi_id: i64,
        kpi_name: &str,
        ticker: &str,
        period: Option<String>,
        error: String,
        steps: Vec<CalculationStep>,
    ) -> Self {
        Self {
            kpi_id,
            kpi_name: kpi_name.to_string(),
            ticker: ticker.to_string(),
            period,
            value: None,
            formatted_value: None,
            unit: None,
            error: Some(error),
            steps,
            provenance: Vec::new(),
            calculated_at: Utc::now(),
        }
    }
}
