//! Market quote client (Polygon-style REST API).
//!
//! Best-effort enrichment for the refresh pipeline: `latest` combines the
//! previous close with reference data for market cap; `as_of` walks back
//! from the requested date to the nearest trading day. All failures
//! surface as `MetricsError::QuoteFetch` for the caller to log and skip.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use metrics_core::{MetricsError, Quote, QuoteSource};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://api.polygon.io";

/// How many calendar days `as_of` walks back looking for a trading day.
const AS_OF_LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
struct PrevCloseResponse {
    #[serde(default)]
    results: Vec<PrevCloseBar>,
}

#[derive(Debug, Deserialize)]
struct PrevCloseBar {
    c: f64,
}

#[derive(Debug, Deserialize)]
struct DailyCloseResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    #[serde(default)]
    results: Option<TickerDetails>,
}

#[derive(Debug, Deserialize)]
struct TickerDetails {
    #[serde(default)]
    market_cap: Option<f64>,
}

#[derive(Clone)]
pub struct QuoteClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl QuoteClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, BASE_URL.to_string())
    }

    /// Override the API host (tests, proxies).
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            client,
            base_url,
        }
    }

    /// GET with automatic 429 retry.
    async fn get(&self, url: &str) -> Result<reqwest::Response, MetricsError> {
        for attempt in 0..3u32 {
            let response = self
                .client
                .get(url)
                .query(&[("apiKey", self.api_key.as_str())])
                .send()
                .await
                .map_err(|e| MetricsError::QuoteFetch(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!(
                "quote API rate limited, waiting {}s before retry {}/3",
                wait_secs,
                attempt + 1
            );
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(MetricsError::QuoteFetch(
            "rate limited after 3 retries".to_string(),
        ))
    }

    async fn previous_close(&self, ticker: &str) -> Result<Option<f64>, MetricsError> {
        let url = format!("{}/v2/aggs/ticker/{}/prev", self.base_url, ticker);
        let response = self.get(&url).await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MetricsError::QuoteFetch(format!(
                "HTTP {} fetching previous close for {}",
                response.status(),
                ticker
            )));
        }

        let body: PrevCloseResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::QuoteFetch(e.to_string()))?;
        Ok(body.results.first().map(|bar| bar.c))
    }

    async fn daily_close(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, MetricsError> {
        let url = format!(
            "{}/v1/open-close/{}/{}",
            self.base_url,
            ticker,
            date.format("%Y-%m-%d")
        );
        let response = self.get(&url).await?;

        // Non-trading days come back as 404 / NOT_FOUND
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MetricsError::QuoteFetch(format!(
                "HTTP {} fetching daily close for {}",
                response.status(),
                ticker
            )));
        }

        let body: DailyCloseResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::QuoteFetch(e.to_string()))?;
        if body.status.as_deref() == Some("NOT_FOUND") {
            return Ok(None);
        }
        Ok(body.close)
    }

    /// Market cap from reference data; best-effort, a miss is not an
    /// error (plans without reference access simply get no multiples
    /// that need it).
    async fn market_cap(&self, ticker: &str) -> Option<f64> {
        let url = format!("{}/v3/reference/tickers/{}", self.base_url, ticker);
        let response = match self.get(&url).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(ticker, error = %e, "market cap lookup failed");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        response
            .json::<TickerDetailsResponse>()
            .await
            .ok()
            .and_then(|body| body.results)
            .and_then(|details| details.market_cap)
    }
}

#[async_trait]
impl QuoteSource for QuoteClient {
    async fn latest(&self, ticker: &str) -> Result<Option<Quote>, MetricsError> {
        let Some(price) = self.previous_close(ticker).await? else {
            return Ok(None);
        };

        Ok(Some(Quote {
            price,
            market_cap: self.market_cap(ticker).await,
            enterprise_value: None,
        }))
    }

    async fn as_of(&self, ticker: &str, before: NaiveDate) -> Result<Option<Quote>, MetricsError> {
        let mut date = before;
        for _ in 0..AS_OF_LOOKBACK_DAYS {
            if let Some(price) = self.daily_close(ticker, date).await? {
                return Ok(Some(Quote {
                    price,
                    market_cap: None,
                    enterprise_value: None,
                }));
            }
            date = date - ChronoDuration::days(1);
        }
        Ok(None)
    }
}
