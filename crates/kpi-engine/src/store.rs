//! Relational persistence for KPI definitions, dependencies, versions
//! and usage. Every logical unit (definition + dependency rows + version
//! row) commits in a single transaction.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use metrics_store::MetricsDb;

use crate::models::{CustomKpi, KpiInput, KpiUsageRecord, KpiVersion};

#[derive(Debug, Clone, sqlx::FromRow)]
struct KpiRow {
    id: i64,
    user_id: String,
    name: String,
    formula: String,
    description: Option<String>,
    frequency: Option<String>,
    unit: Option<String>,
    source_tags: Option<String>,
    metadata: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl KpiRow {
    fn into_kpi(self, inputs: Vec<String>) -> CustomKpi {
        CustomKpi {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            formula: self.formula,
            description: self.description,
            frequency: self.frequency,
            unit: self.unit,
            inputs,
            source_tags: self
                .source_tags
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default(),
            metadata: self
                .metadata
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct VersionRow {
    kpi_id: i64,
    version_number: i64,
    formula: String,
    metadata: Option<String>,
    created_at: DateTime<Utc>,
    created_by: String,
}

const KPI_COLUMNS: &str = "id, user_id, name, formula, description, frequency, unit, \
                           source_tags, metadata, created_at, updated_at";

#[derive(Clone)]
pub struct KpiStore {
    db: MetricsDb,
}

impl KpiStore {
    pub fn new(db: MetricsDb) -> Self {
        Self { db }
    }

    async fn inputs_for(&self, kpi_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT metric FROM kpi_dependencies WHERE kpi_id = ? ORDER BY metric")
                .bind(kpi_id)
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    /// Persist a brand-new KPI: definition, dependency rows and version 1
    /// in one transaction.
    pub async fn create(
        &self,
        user_id: &str,
        input: &KpiInput,
        normalized_formula: &str,
        dependencies: &[String],
    ) -> Result<CustomKpi> {
        let metadata = input
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let source_tags = serde_json::to_string(&input.source_tags)?;

        let mut tx = self.db.pool().begin().await?;

        let (kpi_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO custom_kpis (user_id, name, formula, description, frequency, unit, source_tags, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(&input.name)
        .bind(normalized_formula)
        .bind(&input.description)
        .bind(&input.frequency)
        .bind(&input.unit)
        .bind(&source_tags)
        .bind(&metadata)
        .fetch_one(&mut *tx)
        .await?;

        for metric in dependencies {
            sqlx::query("INSERT INTO kpi_dependencies (kpi_id, metric) VALUES (?, ?)")
                .bind(kpi_id)
                .bind(metric)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO custom_kpi_versions (kpi_id, version_number, formula, metadata, created_by)
            VALUES (?, 1, ?, ?, ?)
            "#,
        )
        .bind(kpi_id)
        .bind(normalized_formula)
        .bind(&metadata)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get(kpi_id)
            .await?
            .ok_or_else(|| anyhow!("KPI {kpi_id} vanished after insert"))
    }

    /// Re-point an existing KPI at a new definition: update the row,
    /// replace the dependency rows, append the next version — one
    /// transaction.
    pub async fn update(
        &self,
        kpi_id: i64,
        user_id: &str,
        input: &KpiInput,
        normalized_formula: &str,
        dependencies: &[String],
    ) -> Result<CustomKpi> {
        let metadata = input
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let source_tags = serde_json::to_string(&input.source_tags)?;

        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            UPDATE custom_kpis
            SET formula = ?, description = ?, frequency = ?, unit = ?,
                source_tags = ?, metadata = ?,
                updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?
            "#,
        )
        .bind(normalized_formula)
        .bind(&input.description)
        .bind(&input.frequency)
        .bind(&input.unit)
        .bind(&source_tags)
        .bind(&metadata)
        .bind(kpi_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM kpi_dependencies WHERE kpi_id = ?")
            .bind(kpi_id)
            .execute(&mut *tx)
            .await?;
        for metric in dependencies {
            sqlx::query("INSERT INTO kpi_dependencies (kpi_id, metric) VALUES (?, ?)")
                .bind(kpi_id)
                .bind(metric)
                .execute(&mut *tx)
                .await?;
        }

        let (next_version,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version_number), 0) + 1 FROM custom_kpi_versions WHERE kpi_id = ?",
        )
        .bind(kpi_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO custom_kpi_versions (kpi_id, version_number, formula, metadata, created_by)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(kpi_id)
        .bind(next_version)
        .bind(normalized_formula)
        .bind(&metadata)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get(kpi_id)
            .await?
            .ok_or_else(|| anyhow!("KPI {kpi_id} vanished after update"))
    }

    pub async fn get(&self, kpi_id: i64) -> Result<Option<CustomKpi>> {
        let row: Option<KpiRow> =
            sqlx::query_as(&format!("SELECT {KPI_COLUMNS} FROM custom_kpis WHERE id = ?"))
                .bind(kpi_id)
                .fetch_optional(self.db.pool())
                .await?;

        match row {
            Some(row) => {
                let inputs = self.inputs_for(row.id).await?;
                Ok(Some(row.into_kpi(inputs)))
            }
            None => Ok(None),
        }
    }

    /// Case-insensitive lookup by `(user_id, name)`.
    pub async fn get_by_name(&self, user_id: &str, name: &str) -> Result<Option<CustomKpi>> {
        let row: Option<KpiRow> = sqlx::query_as(&format!(
            "SELECT {KPI_COLUMNS} FROM custom_kpis WHERE user_id = ? AND LOWER(name) = LOWER(?)"
        ))
        .bind(user_id)
        .bind(name)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => {
                let inputs = self.inputs_for(row.id).await?;
                Ok(Some(row.into_kpi(inputs)))
            }
            None => Ok(None),
        }
    }

    /// Full version trail, oldest first.
    pub async fn versions(&self, kpi_id: i64) -> Result<Vec<KpiVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(
            "SELECT kpi_id, version_number, formula, metadata, created_at, created_by \
             FROM custom_kpi_versions WHERE kpi_id = ? ORDER BY version_number",
        )
        .bind(kpi_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| KpiVersion {
                kpi_id: r.kpi_id,
                version_number: r.version_number,
                formula: r.formula,
                metadata: r
                    .metadata
                    .as_deref()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(serde_json::Value::Null),
                created_at: r.created_at,
                created_by: r.created_by,
            })
            .collect())
    }

    /// Upsert the usage record for `(kpi_id, ticker, period)`.
    pub async fn record_usage(&self, record: &KpiUsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO custom_kpi_usage (kpi_id, ticker, period, value, calculated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (kpi_id, ticker, period) DO UPDATE SET
                value = excluded.value,
                calculated_at = excluded.calculated_at
            "#,
        )
        .bind(record.kpi_id)
        .bind(&record.ticker)
        .bind(&record.period)
        .bind(record.value)
        .bind(record.calculated_at)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn usage(&self, kpi_id: i64) -> Result<Vec<KpiUsageRecord>> {
        let rows: Vec<(i64, String, String, Option<f64>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT kpi_id, ticker, period, value, calculated_at \
             FROM custom_kpi_usage WHERE kpi_id = ? ORDER BY ticker, period",
        )
        .bind(kpi_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(kpi_id, ticker, period, value, calculated_at)| KpiUsageRecord {
                kpi_id,
                ticker,
                period,
                value,
                calculated_at,
            })
            .collect())
    }
}
