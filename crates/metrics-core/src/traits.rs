use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::MetricsError;
use crate::types::{FinancialFact, Quote};

/// Read-only source of raw financial facts. Owned by the ingestion layer;
/// ordering is not guaranteed, the engine re-sorts.
#[async_trait]
pub trait FactSource: Send + Sync {
    async fn fetch(
        &self,
        tickers: Option<&[String]>,
        metrics: Option<&[String]>,
    ) -> Result<Vec<FinancialFact>, MetricsError>;
}

/// Market quote lookup. `as_of` returns the last quote dated strictly
/// before the given date (used for one-year-back TSR).
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn latest(&self, ticker: &str) -> Result<Option<Quote>, MetricsError>;

    async fn as_of(&self, ticker: &str, before: NaiveDate) -> Result<Option<Quote>, MetricsError>;
}
