use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MetricsError;

/// Raw point-in-time financial fact from the ingestion layer (SEC filings,
/// vendor feeds). Append-only; the most recently ingested value per
/// `(ticker, metric, fiscal_year)` wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialFact {
    pub ticker: String,
    pub metric: String,
    pub fiscal_year: i32,
    pub value: Option<f64>,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub filing_date: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Per-year bucket entry, keyed by canonical metric name.
#[derive(Debug, Clone, Copy)]
pub struct FactEntry {
    pub value: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Origin class of a snapshot row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Edgar,
    Derived,
    Benchmark,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Edgar => "edgar",
            SnapshotSource::Derived => "derived",
            SnapshotSource::Benchmark => "benchmark",
        }
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotSource {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edgar" => Ok(SnapshotSource::Edgar),
            "derived" => Ok(SnapshotSource::Derived),
            "benchmark" => Ok(SnapshotSource::Benchmark),
            other => Err(MetricsError::InvalidData(format!(
                "unknown snapshot source '{other}'"
            ))),
        }
    }
}

/// One logical computed-metric row per `(ticker, metric, period)`.
/// `start_year..=end_year` brackets the fiscal years the value summarizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub ticker: String,
    pub metric: String,
    pub period: String,
    pub value: f64,
    pub source: SnapshotSource,
    pub start_year: i32,
    pub end_year: i32,
    pub updated_at: DateTime<Utc>,
}

impl MetricSnapshot {
    /// Snapshot covering a single fiscal year.
    pub fn for_year(
        ticker: &str,
        metric: &str,
        value: f64,
        year: i32,
        source: SnapshotSource,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            metric: metric.to_string(),
            period: format!("FY{year}"),
            value,
            source,
            start_year: year,
            end_year: year,
            updated_at: Utc::now(),
        }
    }

    /// Snapshot covering a multi-year span.
    pub fn for_span(
        ticker: &str,
        metric: &str,
        value: f64,
        start_year: i32,
        end_year: i32,
        source: SnapshotSource,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            metric: metric.to_string(),
            period: if start_year == end_year {
                format!("FY{start_year}")
            } else {
                format!("FY{start_year}-FY{end_year}")
            },
            value,
            source,
            start_year,
            end_year,
            updated_at: Utc::now(),
        }
    }
}

/// Market quote for a ticker.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub market_cap: Option<f64>,
    pub enterprise_value: Option<f64>,
}

/// A resolved numeric value with provenance, carried through KPI
/// evaluation for audit and citation display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricValue {
    pub metric: String,
    pub value: f64,
    pub period: Option<String>,
    pub fiscal_year: Option<i32>,
    pub source: String,
    pub source_ref: Option<String>,
    pub cik: Option<String>,
    pub filing_date: Option<String>,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_period_labels() {
        let single = MetricSnapshot::for_year("AAPL", "roe", 0.3, 2024, SnapshotSource::Derived);
        assert_eq!(single.period, "FY2024");
        assert_eq!((single.start_year, single.end_year), (2024, 2024));

        let span =
            MetricSnapshot::for_span("AAPL", "revenue_cagr", 0.1, 2022, 2024, SnapshotSource::Derived);
        assert_eq!(span.period, "FY2022-FY2024");
    }

    #[test]
    fn snapshot_source_round_trip() {
        for src in [
            SnapshotSource::Edgar,
            SnapshotSource::Derived,
            SnapshotSource::Benchmark,
        ] {
            assert_eq!(src.as_str().parse::<SnapshotSource>().unwrap(), src);
        }
        assert!("quarterly".parse::<SnapshotSource>().is_err());
    }
}
