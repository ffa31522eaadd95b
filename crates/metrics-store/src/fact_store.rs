use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics_core::{FactSource, FinancialFact, MetricsError};

use crate::db::MetricsDb;

#[derive(Debug, Clone, sqlx::FromRow)]
struct FactRow {
    ticker: String,
    metric: String,
    fiscal_year: i64,
    value: Option<f64>,
    source: String,
    source_ref: Option<String>,
    cik: Option<String>,
    filing_date: Option<String>,
    url: Option<String>,
    ingested_at: DateTime<Utc>,
}

impl From<FactRow> for FinancialFact {
    fn from(row: FactRow) -> Self {
        FinancialFact {
            ticker: row.ticker,
            metric: row.metric,
            fiscal_year: row.fiscal_year as i32,
            value: row.value,
            source: row.source,
            ingested_at: row.ingested_at,
            source_ref: row.source_ref,
            cik: row.cik,
            filing_date: row.filing_date,
            url: row.url,
        }
    }
}

const FACT_COLUMNS: &str = "ticker, metric, fiscal_year, value, source, source_ref, cik, \
                            filing_date, url, ingested_at";

/// SQLite-backed view over the append-only fact table.
#[derive(Clone)]
pub struct SqliteFactStore {
    db: MetricsDb,
}

impl SqliteFactStore {
    pub fn new(db: MetricsDb) -> Self {
        Self { db }
    }

    /// Append a fact row. Facts are never updated in place; re-ingesting
    /// a metric produces a newer row that wins on `ingested_at`.
    pub async fn insert_fact(&self, fact: &FinancialFact) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO financial_facts
                (ticker, metric, fiscal_year, value, source, source_ref, cik, filing_date, url, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&fact.ticker)
        .bind(&fact.metric)
        .bind(fact.fiscal_year)
        .bind(fact.value)
        .bind(&fact.source)
        .bind(&fact.source_ref)
        .bind(&fact.cik)
        .bind(&fact.filing_date)
        .bind(&fact.url)
        .bind(fact.ingested_at)
        .fetch_one(self.db.pool())
        .await?;

        Ok(id)
    }

    /// Most recently ingested fact for a ticker/metric, newest fiscal
    /// year first when no year is pinned.
    pub async fn latest_fact(
        &self,
        ticker: &str,
        metric: &str,
        fiscal_year: Option<i32>,
    ) -> Result<Option<FinancialFact>> {
        let row: Option<FactRow> = match fiscal_year {
            Some(year) => {
                sqlx::query_as(&format!(
                    "SELECT {FACT_COLUMNS} FROM financial_facts \
                     WHERE ticker = ? AND metric = ? AND fiscal_year = ? \
                     ORDER BY ingested_at DESC LIMIT 1"
                ))
                .bind(ticker)
                .bind(metric)
                .bind(year)
                .fetch_optional(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {FACT_COLUMNS} FROM financial_facts \
                     WHERE ticker = ? AND metric = ? \
                     ORDER BY fiscal_year DESC, ingested_at DESC LIMIT 1"
                ))
                .bind(ticker)
                .bind(metric)
                .fetch_optional(self.db.pool())
                .await?
            }
        };

        Ok(row.map(FinancialFact::from))
    }

    async fn fetch_scoped(
        &self,
        tickers: Option<&[String]>,
        metrics: Option<&[String]>,
    ) -> Result<Vec<FinancialFact>> {
        let tickers = tickers.filter(|t| !t.is_empty());
        let metrics = metrics.filter(|m| !m.is_empty());

        let mut sql = format!("SELECT {FACT_COLUMNS} FROM financial_facts");
        let mut clauses = Vec::new();
        if let Some(tickers) = tickers {
            clauses.push(format!(
                "ticker IN ({})",
                vec!["?"; tickers.len()].join(", ")
            ));
        }
        if let Some(metrics) = metrics {
            clauses.push(format!(
                "metric IN ({})",
                vec!["?"; metrics.len()].join(", ")
            ));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ticker, fiscal_year");

        let mut query = sqlx::query_as::<_, FactRow>(&sql);
        for ticker in tickers.unwrap_or(&[]) {
            query = query.bind(ticker);
        }
        for metric in metrics.unwrap_or(&[]) {
            query = query.bind(metric);
        }

        let rows = query.fetch_all(self.db.pool()).await?;
        Ok(rows.into_iter().map(FinancialFact::from).collect())
    }
}

#[async_trait]
impl FactSource for SqliteFactStore {
    async fn fetch(
        &self,
        tickers: Option<&[String]>,
        metrics: Option<&[String]>,
    ) -> Result<Vec<FinancialFact>, MetricsError> {
        self.fetch_scoped(tickers, metrics)
            .await
            .map_err(|e| MetricsError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(ticker: &str, metric: &str, year: i32, value: f64) -> FinancialFact {
        FinancialFact {
            ticker: ticker.to_string(),
            metric: metric.to_string(),
            fiscal_year: year,
            value: Some(value),
            source: "edgar".to_string(),
            ingested_at: Utc::now(),
            source_ref: None,
            cik: None,
            filing_date: None,
            url: None,
        }
    }

    #[tokio::test]
    async fn fetch_filters_by_ticker_and_metric() {
        let db = MetricsDb::new("sqlite::memory:").await.unwrap();
        let store = SqliteFactStore::new(db);

        store.insert_fact(&fact("AAPL", "revenue", 2024, 100.0)).await.unwrap();
        store.insert_fact(&fact("AAPL", "net_income", 2024, 20.0)).await.unwrap();
        store.insert_fact(&fact("MSFT", "revenue", 2024, 200.0)).await.unwrap();

        let all = store.fetch(None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let aapl = store
            .fetch(Some(&["AAPL".to_string()]), None)
            .await
            .unwrap();
        assert_eq!(aapl.len(), 2);

        let revenue = store
            .fetch(None, Some(&["revenue".to_string()]))
            .await
            .unwrap();
        assert_eq!(revenue.len(), 2);
    }

    #[tokio::test]
    async fn latest_fact_prefers_newest_ingestion() {
        let db = MetricsDb::new("sqlite::memory:").await.unwrap();
        let store = SqliteFactStore::new(db);

        let mut first = fact("AAPL", "revenue", 2024, 100.0);
        first.ingested_at = Utc::now() - chrono::Duration::hours(1);
        store.insert_fact(&first).await.unwrap();
        store.insert_fact(&fact("AAPL", "revenue", 2024, 105.0)).await.unwrap();

        let latest = store
            .latest_fact("AAPL", "revenue", Some(2024))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.value, Some(105.0));
    }
}
