use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics_core::{MetricSnapshot, SnapshotSource};
use std::collections::BTreeSet;

use crate::db::MetricsDb;

#[derive(Debug, Clone, sqlx::FromRow)]
struct SnapshotRow {
    ticker: String,
    metric: String,
    period: String,
    value: f64,
    source: String,
    start_year: i64,
    end_year: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for MetricSnapshot {
    type Error = anyhow::Error;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        Ok(MetricSnapshot {
            source: row.source.parse::<SnapshotSource>()?,
            ticker: row.ticker,
            metric: row.metric,
            period: row.period,
            value: row.value,
            start_year: row.start_year as i32,
            end_year: row.end_year as i32,
            updated_at: row.updated_at,
        })
    }
}

const SNAPSHOT_COLUMNS: &str =
    "ticker, metric, period, value, source, start_year, end_year, updated_at";

/// Computed-metric snapshot table. One logical row per
/// `(ticker, metric, period)`, replaced wholesale by each refresh run —
/// readers keep seeing the previous generation until the replace commits.
#[derive(Clone)]
pub struct SnapshotStore {
    db: MetricsDb,
}

impl SnapshotStore {
    pub fn new(db: MetricsDb) -> Self {
        Self { db }
    }

    /// Replace the snapshot contents for every ticker present in
    /// `records`, in one transaction.
    pub async fn replace_all(&self, records: &[MetricSnapshot]) -> Result<()> {
        let tickers: BTreeSet<&str> = records.iter().map(|r| r.ticker.as_str()).collect();

        let mut tx = self.db.pool().begin().await?;

        for ticker in &tickers {
            sqlx::query("DELETE FROM metric_snapshots WHERE ticker = ?")
                .bind(ticker)
                .execute(&mut *tx)
                .await?;
        }

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO metric_snapshots
                    (ticker, metric, period, value, source, start_year, end_year, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.ticker)
            .bind(&record.metric)
            .bind(&record.period)
            .bind(record.value)
            .bind(record.source.as_str())
            .bind(record.start_year)
            .bind(record.end_year)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            records = records.len(),
            tickers = tickers.len(),
            "replaced snapshot generation"
        );
        Ok(())
    }

    /// All snapshots for a ticker, optionally narrowed to a source class
    /// and/or a set of period labels.
    pub async fn get_metrics(
        &self,
        ticker: &str,
        source: Option<SnapshotSource>,
        periods: Option<&[String]>,
    ) -> Result<Vec<MetricSnapshot>> {
        let periods = periods.filter(|p| !p.is_empty());

        let mut sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM metric_snapshots WHERE ticker = ?"
        );
        if source.is_some() {
            sql.push_str(" AND source = ?");
        }
        if let Some(periods) = periods {
            sql.push_str(&format!(
                " AND period IN ({})",
                vec!["?"; periods.len()].join(", ")
            ));
        }
        sql.push_str(" ORDER BY metric, end_year, period");

        let mut query = sqlx::query_as::<_, SnapshotRow>(&sql).bind(ticker);
        if let Some(source) = source {
            query = query.bind(source.as_str());
        }
        for period in periods.unwrap_or(&[]) {
            query = query.bind(period);
        }

        let rows = query.fetch_all(self.db.pool()).await?;
        rows.into_iter().map(MetricSnapshot::try_from).collect()
    }

    /// Single most recent snapshot of a metric for a ticker: greatest
    /// `end_year`, then `start_year`, then `updated_at`.
    pub async fn latest_snapshot(
        &self,
        ticker: &str,
        metric: &str,
    ) -> Result<Option<MetricSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM metric_snapshots \
             WHERE ticker = ? AND metric = ? \
             ORDER BY end_year DESC, start_year DESC, updated_at DESC LIMIT 1"
        ))
        .bind(ticker)
        .bind(metric)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(MetricSnapshot::try_from).transpose()
    }

    /// Dependency-resolution lookup for KPI evaluation: newest matching
    /// snapshot, optionally pinned to a period label or a fiscal year
    /// (which must fall inside the snapshot's year span).
    pub async fn find_value(
        &self,
        ticker: &str,
        metric: &str,
        period: Option<&str>,
        fiscal_year: Option<i32>,
    ) -> Result<Option<MetricSnapshot>> {
        let mut sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM metric_snapshots WHERE ticker = ? AND metric = ?"
        );
        if period.is_some() {
            sql.push_str(" AND period = ?");
        }
        if fiscal_year.is_some() {
            sql.push_str(" AND start_year <= ? AND end_year >= ?");
        }
        sql.push_str(" ORDER BY updated_at DESC, end_year DESC LIMIT 1");

        let mut query = sqlx::query_as::<_, SnapshotRow>(&sql).bind(ticker).bind(metric);
        if let Some(period) = period {
            query = query.bind(period);
        }
        if let Some(year) = fiscal_year {
            query = query.bind(year).bind(year);
        }

        let row: Option<SnapshotRow> = query.fetch_optional(self.db.pool()).await?;
        row.map(MetricSnapshot::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ticker: &str, metric: &str, year: i32, value: f64) -> MetricSnapshot {
        MetricSnapshot::for_year(ticker, metric, value, year, SnapshotSource::Derived)
    }

    #[tokio::test]
    async fn replace_all_is_wholesale_per_ticker() {
        let db = MetricsDb::new("sqlite::memory:").await.unwrap();
        let store = SnapshotStore::new(db);

        store
            .replace_all(&[snap("AAPL", "roe", 2023, 0.25), snap("AAPL", "roa", 2023, 0.11)])
            .await
            .unwrap();

        // Second generation drops roa; it must not survive the replace.
        store.replace_all(&[snap("AAPL", "roe", 2024, 0.30)]).await.unwrap();

        let metrics = store.get_metrics("AAPL", None, None).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].metric, "roe");
        assert_eq!(metrics[0].period, "FY2024");
    }

    #[tokio::test]
    async fn latest_snapshot_orders_by_span_then_recency() {
        let db = MetricsDb::new("sqlite::memory:").await.unwrap();
        let store = SnapshotStore::new(db);

        store
            .replace_all(&[
                snap("AAPL", "roe", 2022, 0.20),
                snap("AAPL", "roe", 2023, 0.25),
                snap("AAPL", "roe", 2024, 0.30),
            ])
            .await
            .unwrap();

        let latest = store.latest_snapshot("AAPL", "roe").await.unwrap().unwrap();
        assert_eq!(latest.end_year, 2024);
        assert_eq!(latest.value, 0.30);
    }

    #[tokio::test]
    async fn find_value_pins_period_and_year() {
        let db = MetricsDb::new("sqlite::memory:").await.unwrap();
        let store = SnapshotStore::new(db);

        store
            .replace_all(&[
                snap("AAPL", "net_margin", 2023, 0.18),
                snap("AAPL", "net_margin", 2024, 0.20),
            ])
            .await
            .unwrap();

        let by_period = store
            .find_value("AAPL", "net_margin", Some("FY2023"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_period.value, 0.18);

        let by_year = store
            .find_value("AAPL", "net_margin", None, Some(2024))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_year.value, 0.20);

        let missing = store
            .find_value("AAPL", "net_margin", Some("FY2020"), None)
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
