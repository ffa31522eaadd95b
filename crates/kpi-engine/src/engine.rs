//! KPI lifecycle: create/upsert with versioning, and calculation with
//! dependency resolution, sandboxed evaluation and provenance capture.
//!
//! Calculation never raises to the caller: every failure path comes back
//! as a result object with `error` set and `value` null.

use chrono::Utc;
use metrics_core::{MetricValue, MetricsError};
use metrics_store::{MetricsDb, SnapshotStore, SqliteFactStore};
use std::collections::HashMap;

use crate::ast;
use crate::eval;
use crate::format::format_value;
use crate::formula;
use crate::models::{
    CalculationStep, CustomKpi, KpiCalculationResult, KpiInput, KpiUsageRecord,
};
use crate::store::KpiStore;

/// Extract the fiscal year from a plain "FY2024"-style period label.
fn period_year(period: &str) -> Option<i32> {
    let digits = period.strip_prefix("FY")?;
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

pub struct KpiEngine {
    store: KpiStore,
    snapshots: SnapshotStore,
    facts: SqliteFactStore,
}

impl KpiEngine {
    pub fn new(db: MetricsDb) -> Self {
        Self {
            store: KpiStore::new(db.clone()),
            snapshots: SnapshotStore::new(db.clone()),
            facts: SqliteFactStore::new(db),
        }
    }

    pub fn store(&self) -> &KpiStore {
        &self.store
    }

    /// Validate and persist a new KPI (definition + dependencies +
    /// version 1).
    pub async fn create_kpi(
        &self,
        user_id: &str,
        input: KpiInput,
    ) -> Result<CustomKpi, MetricsError> {
        formula::validate(&input.formula)?;
        let (normalized, dependencies) = formula::parse(&input.formula);

        self.store
            .create(user_id, &input, &normalized, &dependencies)
            .await
            .map_err(|e| MetricsError::Database(e.to_string()))
    }

    /// Create the KPI if `(user_id, name)` is unknown (case-insensitive),
    /// otherwise replace its definition and append the next version.
    pub async fn upsert_kpi(
        &self,
        user_id: &str,
        input: KpiInput,
    ) -> Result<CustomKpi, MetricsError> {
        let existing = self
            .store
            .get_by_name(user_id, &input.name)
            .await
            .map_err(|e| MetricsError::Database(e.to_string()))?;

        match existing {
            None => self.create_kpi(user_id, input).await,
            Some(kpi) => {
                formula::validate(&input.formula)?;
                let (normalized, dependencies) = formula::parse(&input.formula);
                self.store
                    .update(kpi.id, user_id, &input, &normalized, &dependencies)
                    .await
                    .map_err(|e| MetricsError::Database(e.to_string()))
            }
        }
    }

    pub async fn get_kpi(&self, kpi_id: i64) -> Result<Option<CustomKpi>, MetricsError> {
        self.store
            .get(kpi_id)
            .await
            .map_err(|e| MetricsError::Database(e.to_string()))
    }

    pub async fn get_kpi_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<CustomKpi>, MetricsError> {
        self.store
            .get_by_name(user_id, name)
            .await
            .map_err(|e| MetricsError::Database(e.to_string()))
    }

    /// Resolve one dependency: computed snapshots first (newest
    /// `updated_at` wins), then the raw fact table.
    async fn resolve_dependency(
        &self,
        ticker: &str,
        metric: &str,
        period: Option<&str>,
        fiscal_year: Option<i32>,
    ) -> Result<Option<MetricValue>, MetricsError> {
        let snapshot = self
            .snapshots
            .find_value(ticker, metric, period, fiscal_year)
            .await
            .map_err(|e| MetricsError::Database(e.to_string()))?;

        if let Some(snapshot) = snapshot {
            return Ok(Some(MetricValue {
                metric: metric.to_string(),
                value: snapshot.value,
                period: Some(snapshot.period),
                fiscal_year: Some(snapshot.end_year),
                source: snapshot.source.to_string(),
                source_ref: None,
                cik: None,
                filing_date: None,
                url: None,
            }));
        }

        let fact = self
            .facts
            .latest_fact(ticker, metric, fiscal_year)
            .await
            .map_err(|e| MetricsError::Database(e.to_string()))?;

        Ok(fact.and_then(|f| {
            let value = f.value?;
            Some(MetricValue {
                metric: metric.to_string(),
                value,
                period: Some(format!("FY{}", f.fiscal_year)),
                fiscal_year: Some(f.fiscal_year),
                source: f.source,
                source_ref: f.source_ref,
                cik: f.cik,
                filing_date: f.filing_date,
                url: f.url,
            })
        }))
    }

    /// Evaluate a KPI for a ticker. Missing KPI, unresolvable
    /// dependencies and arithmetic faults all come back in the result's
    /// `error` field — this method does not fail.
    pub async fn calculate_kpi(
        &self,
        kpi_id: i64,
        ticker: &str,
        period: Option<&str>,
        fiscal_year: Option<i32>,
    ) -> KpiCalculationResult {
        let period_owned = period.map(str::to_string);

        let kpi = match self.store.get(kpi_id).await {
            Ok(Some(kpi)) => kpi,
            Ok(None) => {
                return KpiCalculationResult::failed(
                    kpi_id,
                    "",
                    ticker,
                    period_owned,
                    MetricsError::KpiNotFound(kpi_id.to_string()).to_string(),
                    Vec::new(),
                );
            }
            Err(e) => {
                return KpiCalculationResult::failed(
                    kpi_id,
                    "",
                    ticker,
                    period_owned,
                    MetricsError::Database(e.to_string()).to_string(),
                    Vec::new(),
                );
            }
        };

        let fiscal_year = fiscal_year.or_else(|| period.and_then(period_year));

        let mut vars: HashMap<String, f64> = HashMap::new();
        let mut steps: Vec<CalculationStep> = Vec::new();
        let mut provenance: Vec<MetricValue> = Vec::new();

        for metric in &kpi.inputs {
            match self
                .resolve_dependency(ticker, metric, period, fiscal_year)
                .await
            {
                Ok(Some(resolved)) => {
                    steps.push(CalculationStep {
                        description: format!(
                            "Resolved {} = {} from {}",
                            metric, resolved.value, resolved.source
                        ),
                        metric: Some(metric.clone()),
                        value: Some(resolved.value),
                    });
                    vars.insert(metric.clone(), resolved.value);
                    provenance.push(resolved);
                }
                Ok(None) => {
                    return KpiCalculationResult::failed(
                        kpi_id,
                        &kpi.name,
                        ticker,
                        period_owned,
                        MetricsError::MissingMetric(metric.clone()).to_string(),
                        steps,
                    );
                }
                Err(e) => {
                    return KpiCalculationResult::failed(
                        kpi_id,
                        &kpi.name,
                        ticker,
                        period_owned,
                        e.to_string(),
                        steps,
                    );
                }
            }
        }

        let value = match ast::parse_expression(&kpi.formula)
            .and_then(|expr| eval::evaluate(&expr, &vars))
        {
            Ok(value) => value,
            Err(e) => {
                return KpiCalculationResult::failed(
                    kpi_id,
                    &kpi.name,
                    ticker,
                    period_owned,
                    e.to_string(),
                    steps,
                );
            }
        };

        steps.push(CalculationStep {
            description: format!("Evaluated {} = {}", kpi.formula, value),
            metric: None,
            value: Some(value),
        });

        let usage_period = period_owned
            .clone()
            .or_else(|| fiscal_year.map(|y| format!("FY{y}")))
            .unwrap_or_else(|| "latest".to_string());
        let usage = KpiUsageRecord {
            kpi_id,
            ticker: ticker.to_string(),
            period: usage_period,
            value: Some(value),
            calculated_at: Utc::now(),
        };
        if let Err(e) = self.store.record_usage(&usage).await {
            tracing::warn!(kpi_id, ticker, error = %e, "failed to record KPI usage");
        }

        KpiCalculationResult {
            kpi_id,
            kpi_name: kpi.name.clone(),
            ticker: ticker.to_string(),
            period: period_owned,
            value: Some(value),
            formatted_value: Some(format_value(value, kpi.unit.as_deref())),
            unit: kpi.unit.clone(),
            error: None,
            steps,
            provenance,
            calculated_at: Utc::now(),
        }
    }
}
