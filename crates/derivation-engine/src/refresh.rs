//! Batch refresh: the single-writer full recomputation pass.
//!
//! Reads the fact scope, derives every ticker/year, aggregates every
//! ticker, and replaces the snapshot generation in one transaction.
//! Readers keep the previous generation until the replace commits.
//! Quote fetches are best-effort enrichment: a failure drops the
//! price-based metrics for that ticker, nothing else.

use anyhow::Result;
use chrono::{Duration, Utc};
use metrics_core::{FactSource, MetricSnapshot, Quote, QuoteSource, SnapshotSource};
use metrics_store::SnapshotStore;
use std::collections::BTreeMap;

use crate::aggregates::{aggregate_ticker, YearData};
use crate::context::DerivationContext;
use crate::derive::{bucket_facts, derive_year};

#[derive(Debug, Clone, Copy)]
pub struct RefreshOutcome {
    pub tickers: usize,
    pub snapshots: usize,
}

async fn fetch_quotes(
    quotes: Option<&dyn QuoteSource>,
    ticker: &str,
) -> (Option<Quote>, Option<Quote>) {
    let Some(quotes) = quotes else {
        return (None, None);
    };

    let latest = match quotes.latest(ticker).await {
        Ok(q) => q,
        Err(e) => {
            tracing::warn!(ticker, error = %e, "quote fetch failed, skipping price metrics");
            None
        }
    };

    // Only bother with the year-ago quote when we have a current one.
    let year_ago = if latest.is_some() {
        let cutoff = Utc::now().date_naive() - Duration::days(365);
        match quotes.as_of(ticker, cutoff).await {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(ticker, error = %e, "year-ago quote fetch failed, TSR falls back to proxy");
                None
            }
        }
    } else {
        None
    };

    (latest, year_ago)
}

/// Recompute all derived and aggregate snapshots for the given ticker
/// scope (or every known ticker) and replace the stored generation.
/// Identical input facts produce identical snapshot sets.
pub async fn refresh_metrics(
    ctx: &DerivationContext,
    facts: &dyn FactSource,
    quotes: Option<&dyn QuoteSource>,
    snapshots: &SnapshotStore,
    tickers: Option<&[String]>,
) -> Result<RefreshOutcome> {
    let raw = facts.fetch(tickers, None).await?;
    let buckets = bucket_facts(&raw);

    // Regroup per ticker, years ascending (BTreeMap key order).
    let mut by_ticker: BTreeMap<String, Vec<(i32, crate::derive::FactBucket)>> = BTreeMap::new();
    for ((ticker, year), bucket) in buckets {
        by_ticker.entry(ticker).or_default().push((year, bucket));
    }

    let mut records: Vec<MetricSnapshot> = Vec::new();

    for (ticker, year_buckets) in &by_ticker {
        let (latest_quote, year_ago_quote) = fetch_quotes(quotes, ticker).await;
        let last_year = year_buckets.last().map(|(y, _)| *y);

        let mut years: Vec<YearData> = Vec::with_capacity(year_buckets.len());
        for (year, bucket) in year_buckets {
            // Price-based ratios are point-in-time: quote only for the
            // most recent year.
            let quote = if Some(*year) == last_year {
                latest_quote.as_ref()
            } else {
                None
            };
            let derived = derive_year(ctx, bucket, quote);

            for (metric, value) in &derived {
                records.push(MetricSnapshot::for_year(
                    ticker,
                    metric,
                    *value,
                    *year,
                    SnapshotSource::Derived,
                ));
            }

            years.push(YearData {
                year: *year,
                bucket: bucket.clone(),
                derived,
            });
        }

        records.extend(aggregate_ticker(
            ctx,
            ticker,
            &years,
            latest_quote.as_ref(),
            year_ago_quote.as_ref(),
        ));
    }

    // Deterministic generation ordering regardless of input fact order.
    records.sort_by(|a, b| {
        (&a.ticker, &a.metric, &a.period).cmp(&(&b.ticker, &b.metric, &b.period))
    });

    snapshots.replace_all(&records).await?;

    let outcome = RefreshOutcome {
        tickers: by_ticker.len(),
        snapshots: records.len(),
    };
    tracing::info!(
        tickers = outcome.tickers,
        snapshots = outcome.snapshots,
        "metrics refresh complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use metrics_core::{FinancialFact, MetricsError};
    use metrics_store::{MetricsDb, SqliteFactStore};

    struct FixedQuotes {
        latest: Option<Quote>,
        year_ago: Option<Quote>,
    }

    #[async_trait]
    impl QuoteSource for FixedQuotes {
        async fn latest(&self, _ticker: &str) -> Result<Option<Quote>, MetricsError> {
            Ok(self.latest)
        }

        async fn as_of(
            &self,
            _ticker: &str,
            _before: NaiveDate,
        ) -> Result<Option<Quote>, MetricsError> {
            Ok(self.year_ago)
        }
    }

    struct FailingQuotes;

    #[async_trait]
    impl QuoteSource for FailingQuotes {
        async fn latest(&self, ticker: &str) -> Result<Option<Quote>, MetricsError> {
            Err(MetricsError::QuoteFetch(format!("boom for {ticker}")))
        }

        async fn as_of(
            &self,
            ticker: &str,
            _before: NaiveDate,
        ) -> Result<Option<Quote>, MetricsError> {
            Err(MetricsError::QuoteFetch(format!("boom for {ticker}")))
        }
    }

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

    async fn seeded_stores() -> (SqliteFactStore, SnapshotStore) {
        let db = MetricsDb::new("sqlite::memory:").await.unwrap();
        let facts = SqliteFactStore::new(db.clone());
        let snapshots = SnapshotStore::new(db);

        for (year, revenue, ni) in [(2022, 100.0, 18.0), (2023, 110.0, 20.0), (2024, 121.0, 24.0)] {
            facts.insert_fact(&fact("AAPL", "revenue", year, revenue)).await.unwrap();
            facts.insert_fact(&fact("AAPL", "net_income", year, ni)).await.unwrap();
        }

        (facts, snapshots)
    }

    fn shape(records: &[MetricSnapshot]) -> Vec<(String, String, String, f64, i32, i32)> {
        records
            .iter()
            .map(|s| {
                (
                    s.ticker.clone(),
                    s.metric.clone(),
                    s.period.clone(),
                    s.value,
                    s.start_year,
                    s.end_year,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn refresh_computes_revenue_cagr() {
        let (facts, snapshots) = seeded_stores().await;
        let ctx = DerivationContext::default();

        let outcome = refresh_metrics(&ctx, &facts, None, &snapshots, None).await.unwrap();
        assert_eq!(outcome.tickers, 1);

        let cagr = snapshots
            .latest_snapshot("AAPL", "revenue_cagr")
            .await
            .unwrap()
            .unwrap();
        assert!((cagr.value - 0.10).abs() < 1e-9);
        assert_eq!(cagr.period, "FY2022-FY2024");
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        let (facts, snapshots) = seeded_stores().await;
        let ctx = DerivationContext::default();

        refresh_metrics(&ctx, &facts, None, &snapshots, None).await.unwrap();
        let first = snapshots.get_metrics("AAPL", None, None).await.unwrap();

        refresh_metrics(&ctx, &facts, None, &snapshots, None).await.unwrap();
        let second = snapshots.get_metrics("AAPL", None, None).await.unwrap();

        assert_eq!(shape(&first), shape(&second));
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn quote_failures_drop_price_metrics_only() {
        let (facts, snapshots) = seeded_stores().await;
        let ctx = DerivationContext::default();

        let quotes = FailingQuotes;
        refresh_metrics(&ctx, &facts, Some(&quotes as &dyn QuoteSource), &snapshots, None)
            .await
            .unwrap();

        let metrics = snapshots.get_metrics("AAPL", None, None).await.unwrap();
        assert!(metrics.iter().any(|s| s.metric == "revenue_cagr"));
        assert!(metrics.iter().all(|s| s.metric != "pe_ratio"));
    }

    #[tokio::test]
    async fn quotes_enable_valuation_metrics() {
        let (facts, snapshots) = seeded_stores().await;
        facts
            .insert_fact(&fact("AAPL", "eps_diluted", 2024, 6.05))
            .await
            .unwrap();
        let ctx = DerivationContext::default();

        let quotes = FixedQuotes {
            latest: Some(Quote {
                price: 121.0,
                market_cap: Some(1210.0),
                enterprise_value: None,
            }),
            year_ago: Some(Quote {
                price: 110.0,
                market_cap: None,
                enterprise_value: None,
            }),
        };

        refresh_metrics(&ctx, &facts, Some(&quotes as &dyn QuoteSource), &snapshots, None)
            .await
            .unwrap();

        let pe = snapshots.latest_snapshot("AAPL", "pe_ratio").await.unwrap().unwrap();
        assert!((pe.value - 20.0).abs() < 1e-9);

        let tsr = snapshots
            .latest_snapshot("AAPL", "total_shareholder_return")
            .await
            .unwrap()
            .unwrap();
        assert!((tsr.value - 0.1).abs() < 1e-9);

        let ps = snapshots
            .latest_snapshot("AAPL", "price_to_sales")
            .await
            .unwrap()
            .unwrap();
        assert!((ps.value - 10.0).abs() < 1e-9);
    }
}
