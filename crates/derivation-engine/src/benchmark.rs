//! Cross-sectional benchmark averaging.
//!
//! Averages the latest snapshot of a metric across a ticker universe into
//! one synthetic snapshot carrying the universe label instead of a ticker.

use anyhow::Result;
use chrono::Utc;
use metrics_core::{MetricSnapshot, SnapshotSource};
use metrics_store::SnapshotStore;
use std::collections::BTreeMap;

/// Pick the single latest snapshot from a ticker's candidates: greatest
/// `end_year`, then `start_year`, then most recent `updated_at`.
pub fn latest_of(snapshots: &[MetricSnapshot]) -> Option<&MetricSnapshot> {
    snapshots
        .iter()
        .max_by_key(|s| (s.end_year, s.start_year, s.updated_at))
}

/// Arithmetic-mean one latest pick per contributing ticker into a
/// benchmark snapshot. The period label is the mode among contributors,
/// ties broken by the smallest label so repeated runs agree.
pub fn average_snapshots(
    label: &str,
    metric: &str,
    picks: &[MetricSnapshot],
) -> Option<MetricSnapshot> {
    if picks.is_empty() {
        return None;
    }

    let mean = picks.iter().map(|s| s.value).sum::<f64>() / picks.len() as f64;

    let mut period_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for pick in picks {
        *period_counts.entry(pick.period.as_str()).or_default() += 1;
    }
    // BTreeMap iterates smallest label first, so ">" keeps the first of
    // any tied labels.
    let period = period_counts
        .iter()
        .fold(("", 0usize), |best, (p, count)| {
            if *count > best.1 {
                (*p, *count)
            } else {
                best
            }
        })
        .0;

    Some(MetricSnapshot {
        ticker: label.to_string(),
        metric: metric.to_string(),
        period: period.to_string(),
        value: mean,
        source: SnapshotSource::Benchmark,
        start_year: picks.iter().map(|s| s.start_year).min().unwrap_or_default(),
        end_year: picks.iter().map(|s| s.end_year).max().unwrap_or_default(),
        updated_at: Utc::now(),
    })
}

/// Compute benchmark snapshots for each requested metric over a named
/// ticker universe. Metrics with no contributors are absent from the map.
pub async fn compute_benchmark_metrics(
    store: &SnapshotStore,
    metric_names: &[String],
    periods: Option<&[String]>,
    universe: &[String],
    label: &str,
) -> Result<BTreeMap<String, MetricSnapshot>> {
    let mut out = BTreeMap::new();

    for metric in metric_names {
        let mut picks = Vec::new();
        for ticker in universe {
            let candidates: Vec<MetricSnapshot> = store
                .get_metrics(ticker, None, periods)
                .await?
                .into_iter()
                .filter(|s| &s.metric == metric)
                .collect();
            if let Some(pick) = latest_of(&candidates) {
                picks.push(pick.clone());
            }
        }

        if let Some(benchmark) = average_snapshots(label, metric, &picks) {
            out.insert(metric.clone(), benchmark);
        } else {
            tracing::debug!(metric, label, "no contributors for benchmark metric");
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snap(ticker: &str, year: i32, value: f64) -> MetricSnapshot {
        MetricSnapshot::for_year(ticker, "net_margin", value, year, SnapshotSource::Derived)
    }

    #[test]
    fn latest_pick_orders_by_span_then_updated_at() {
        let mut stale = snap("AAPL", 2024, 0.1);
        stale.updated_at = Utc::now() - Duration::hours(2);
        let fresh = snap("AAPL", 2024, 0.2);
        let older_year = snap("AAPL", 2023, 0.3);

        let picks = vec![older_year, stale, fresh];
        assert_eq!(latest_of(&picks).unwrap().value, 0.2);
    }

    #[test]
    fn average_uses_mode_period() {
        let picks = vec![snap("AAPL", 2024, 0.2), snap("MSFT", 2024, 0.4), snap("GOOG", 2023, 0.3)];

        let benchmark = average_snapshots("tech_large_cap", "net_margin", &picks).unwrap();
        assert!((benchmark.value - 0.3).abs() < 1e-12);
        assert_eq!(benchmark.period, "FY2024");
        assert_eq!(benchmark.ticker, "tech_large_cap");
        assert_eq!(benchmark.source, SnapshotSource::Benchmark);
        assert_eq!((benchmark.start_year, benchmark.end_year), (2023, 2024));
    }

    #[test]
    fn period_ties_break_deterministically() {
        let picks = vec![snap("AAPL", 2024, 0.2), snap("MSFT", 2023, 0.4)];
        let benchmark = average_snapshots("pair", "net_margin", &picks).unwrap();
        // One vote each: smallest label wins
        assert_eq!(benchmark.period, "FY2023");
    }

    #[test]
    fn empty_universe_yields_nothing() {
        assert!(average_snapshots("label", "net_margin", &[]).is_none());
    }
}
