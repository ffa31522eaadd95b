//! Multi-year aggregates per ticker.
//!
//! CAGR and growth series come from the full year range; valuation
//! multiples combine the latest fiscal year with a market quote. Every
//! emitted snapshot carries the actual `(start_year, end_year)` span of
//! the years that went into it.

use metrics_core::math::{cagr, finite, growth, safe_div};
use metrics_core::{MetricSnapshot, Quote, SnapshotSource};
use std::collections::BTreeMap;

use crate::context::DerivationContext;
use crate::derive::{self, FactBucket};

/// One fiscal year of input: the fact bucket plus the ratios already
/// derived from it.
#[derive(Debug, Clone)]
pub struct YearData {
    pub year: i32,
    pub bucket: FactBucket,
    pub derived: BTreeMap<String, f64>,
}

impl YearData {
    fn derived_value(&self, metric: &str) -> Option<f64> {
        self.derived.get(metric).copied()
    }
}

/// Endpoints of a metric series: first and last year with a value.
fn series_endpoints(
    years: &[YearData],
    get: impl Fn(&YearData) -> Option<f64>,
) -> Option<(i32, f64, i32, f64)> {
    let first = years.iter().find_map(|y| get(y).map(|v| (y.year, v)))?;
    let last = years.iter().rev().find_map(|y| get(y).map(|v| (y.year, v)))?;
    if last.0 > first.0 {
        Some((first.0, first.1, last.0, last.1))
    } else {
        None
    }
}

fn cagr_snapshot(
    ticker: &str,
    metric: &str,
    years: &[YearData],
    get: impl Fn(&YearData) -> Option<f64>,
) -> Option<MetricSnapshot> {
    let (start_year, start, end_year, end) = series_endpoints(years, get)?;
    let rate = cagr(Some(start), Some(end), end_year - start_year)?;
    Some(MetricSnapshot::for_span(
        ticker,
        metric,
        rate,
        start_year,
        end_year,
        SnapshotSource::Derived,
    ))
}

/// Aggregate a ticker's sorted-ascending year series into multi-year
/// snapshots. Returns nothing for fewer than two years of history.
pub fn aggregate_ticker(
    ctx: &DerivationContext,
    ticker: &str,
    years: &[YearData],
    latest_quote: Option<&Quote>,
    year_ago_quote: Option<&Quote>,
) -> Vec<MetricSnapshot> {
    let mut out = Vec::new();
    if years.len() < 2 {
        return out;
    }
    debug_assert!(years.windows(2).all(|w| w[0].year < w[1].year));

    let latest = years.last().expect("checked non-empty");
    let prev = &years[years.len() - 2];

    let revenue = |y: &YearData| derive::value(&y.bucket, "revenue");
    let eps = |y: &YearData| derive::eps(&y.bucket);

    // Full-range CAGRs
    let revenue_cagr = cagr_snapshot(ticker, "revenue_cagr", years, revenue);
    let eps_cagr = cagr_snapshot(ticker, "eps_cagr", years, eps);
    let revenue_cagr_value = revenue_cagr.as_ref().map(|s| s.value);
    let eps_cagr_value = eps_cagr.as_ref().map(|s| s.value);
    out.extend(revenue_cagr);
    out.extend(eps_cagr);

    // Trailing 3-year CAGR over at most the last 4 years of history
    let window_start = years.len().saturating_sub(4);
    out.extend(cagr_snapshot(
        ticker,
        "revenue_cagr_3y",
        &years[window_start..],
        revenue,
    ));

    // Single-period growth over the most recent two years
    for (metric, growth_metric) in [
        ("ebitda", "ebitda_growth"),
        ("working_capital", "working_capital_growth"),
    ] {
        if let Some(g) = growth(prev.derived_value(metric), latest.derived_value(metric)) {
            out.push(MetricSnapshot::for_span(
                ticker,
                growth_metric,
                g,
                prev.year,
                latest.year,
                SnapshotSource::Derived,
            ));
        }
    }

    // Dividends per share: reported, else rebuilt from total dividends
    // paid. A ticker with price/share data but no dividend facts pays
    // zero dividends — that is a value, not missing data.
    let eps_latest = eps(latest);
    let shares = derive::first_of(
        &latest.bucket,
        &["shares_outstanding", "weighted_avg_diluted_shares"],
    );
    let dividends_per_share = derive::value(&latest.bucket, "dividends_per_share")
        .or_else(|| {
            safe_div(
                derive::value(&latest.bucket, "dividends_paid").map(f64::abs),
                shares,
            )
        })
        .unwrap_or(0.0);
    out.push(MetricSnapshot::for_year(
        ticker,
        "dividends_per_share",
        dividends_per_share,
        latest.year,
        SnapshotSource::Derived,
    ));

    let mut dividend_yield = None;
    if let Some(quote) = latest_quote {
        let price = finite(quote.price).filter(|p| *p > 0.0);

        dividend_yield = safe_div(Some(dividends_per_share), price);
        if let Some(dy) = dividend_yield {
            out.push(MetricSnapshot::for_year(
                ticker,
                "dividend_yield",
                dy,
                latest.year,
                SnapshotSource::Derived,
            ));
        }

        // Valuation multiples: latest fiscal year + market quote
        let mut point = |metric: &str, v: Option<f64>| {
            if let Some(v) = v.and_then(finite) {
                out.push(MetricSnapshot::for_year(
                    ticker,
                    metric,
                    v,
                    latest.year,
                    SnapshotSource::Derived,
                ));
            }
        };

        let pe = safe_div(price, eps_latest.filter(|e| *e > 0.0));
        point("pe_ratio", pe);

        let book = derive::book_value(&latest.bucket).filter(|b| *b > 0.0);
        point("pb_ratio", safe_div(quote.market_cap, book));

        let enterprise_value = quote.enterprise_value.or_else(|| {
            match (
                quote.market_cap,
                derive::value(&latest.bucket, "total_debt"),
                derive::value(&latest.bucket, "cash_and_cash_equivalents"),
            ) {
                (Some(mc), Some(debt), Some(cash)) => finite(mc + debt - cash),
                _ => None,
            }
        });
        point(
            "ev_to_ebitda",
            safe_div(enterprise_value, latest.derived_value("ebitda")),
        );

        // PEG wants an EPS CAGR; if the series endpoints gave none,
        // retry from the raw first/last years before giving up.
        let eps_growth_pct = eps_cagr_value
            .or_else(|| {
                let first = years.first().expect("checked non-empty");
                cagr(eps(first), eps_latest, latest.year - first.year)
            })
            .filter(|g| *g > 0.0)
            .map(|g| g * 100.0);
        point("peg_ratio", safe_div(pe, eps_growth_pct));
    }

    // Total shareholder return. Quote-based when a year-old quote
    // exists; otherwise a clamped heuristic proxy under its own metric
    // name so the two are never conflated.
    let tsr = match (latest_quote, year_ago_quote) {
        (Some(now), Some(then)) if then.price > 0.0 => {
            finite((now.price - then.price + dividends_per_share) / then.price).map(|v| {
                MetricSnapshot::for_span(
                    ticker,
                    "total_shareholder_return",
                    v,
                    latest.year - 1,
                    latest.year,
                    SnapshotSource::Derived,
                )
            })
        }
        _ => latest.derived_value("roe").map(|roe| {
            let proxy = roe
                + dividend_yield.unwrap_or(0.0)
                + ctx.tsr_proxy_revenue_weight * revenue_cagr_value.unwrap_or(0.0);
            MetricSnapshot::for_span(
                ticker,
                "total_shareholder_return_proxy",
                proxy.clamp(ctx.tsr_proxy_min, ctx.tsr_proxy_max),
                years.first().expect("checked non-empty").year,
                latest.year,
                SnapshotSource::Derived,
            )
        }),
    };
    out.extend(tsr);

    out
}
