//! Per-year ratio derivation.
//!
//! Input is the latest fact per `(ticker, fiscal_year, canonical metric)`;
//! output is a map of derived metric name to value, restricted to a fixed
//! allow-list. A ratio whose inputs are missing (or whose denominator is
//! zero) is simply absent — missing data is never an error here.

use metrics_core::math::{finite, safe_div};
use metrics_core::{canonical_name, FactEntry, FinancialFact, Quote};
use std::collections::{BTreeMap, HashMap};

use crate::context::DerivationContext;

/// Derived metrics this engine is allowed to emit.
pub const DERIVED_METRICS: &[&str] = &[
    "gross_margin",
    "operating_margin",
    "net_margin",
    "ebitda_margin",
    "roa",
    "roe",
    "roic",
    "current_ratio",
    "quick_ratio",
    "debt_to_equity",
    "ebitda",
    "free_cash_flow",
    "working_capital",
    "interest_coverage",
    "asset_turnover",
    "price_to_sales",
];

/// Latest fact entry per canonical metric name for one ticker/year.
pub type FactBucket = HashMap<String, FactEntry>;

/// Group raw facts into per-(ticker, year) buckets, canonicalizing metric
/// names and keeping only the most recently ingested value per metric.
pub fn bucket_facts(facts: &[FinancialFact]) -> BTreeMap<(String, i32), FactBucket> {
    let mut buckets: BTreeMap<(String, i32), FactBucket> = BTreeMap::new();

    for fact in facts {
        let key = (fact.ticker.clone(), fact.fiscal_year);
        let metric = canonical_name(&fact.metric);
        let entry = FactEntry {
            value: fact.value,
            recorded_at: fact.ingested_at,
        };

        let bucket = buckets.entry(key).or_default();
        match bucket.get(&metric) {
            Some(existing) if existing.recorded_at >= entry.recorded_at => {}
            _ => {
                bucket.insert(metric, entry);
            }
        }
    }

    buckets
}

/// Finite value of a canonical metric in the bucket, if present.
pub fn value(bucket: &FactBucket, metric: &str) -> Option<f64> {
    bucket.get(metric).and_then(|e| e.value).and_then(finite)
}

/// First non-null value among an ordered list of acceptable source metrics.
pub fn first_of(bucket: &FactBucket, metrics: &[&str]) -> Option<f64> {
    metrics.iter().find_map(|m| value(bucket, m))
}

/// Net income, preferring the adjusted figure when reported.
pub fn net_income(bucket: &FactBucket) -> Option<f64> {
    first_of(bucket, &["net_income_adjusted", "net_income"])
}

/// EBITDA: reported (plain, then adjusted), else rebuilt from operating
/// income plus depreciation and amortization.
pub fn ebitda(bucket: &FactBucket) -> Option<f64> {
    first_of(bucket, &["ebitda", "ebitda_adjusted"]).or_else(|| {
        match (
            value(bucket, "operating_income"),
            value(bucket, "depreciation_and_amortization"),
        ) {
            (Some(op), Some(da)) => finite(op + da),
            _ => None,
        }
    })
}

/// Earnings per share: diluted, else basic, else net income over
/// weighted average diluted shares.
pub fn eps(bucket: &FactBucket) -> Option<f64> {
    first_of(bucket, &["eps_diluted", "eps_basic"]).or_else(|| {
        safe_div(net_income(bucket), value(bucket, "weighted_avg_diluted_shares"))
    })
}

/// Free cash flow: reported, else operating cash flow plus capex
/// (capex is signed negative in the fact feed).
pub fn free_cash_flow(bucket: &FactBucket) -> Option<f64> {
    value(bucket, "free_cash_flow").or_else(|| {
        match (
            value(bucket, "cash_from_operations"),
            value(bucket, "capital_expenditures"),
        ) {
            (Some(cfo), Some(capex)) => finite(cfo + capex),
            _ => None,
        }
    })
}

/// Working capital: reported, else current assets minus current liabilities.
pub fn working_capital(bucket: &FactBucket) -> Option<f64> {
    value(bucket, "working_capital").or_else(|| {
        match (
            value(bucket, "current_assets"),
            value(bucket, "current_liabilities"),
        ) {
            (Some(ca), Some(cl)) => finite(ca - cl),
            _ => None,
        }
    })
}

/// Book value of equity: shareholders' equity, else assets minus liabilities.
pub fn book_value(bucket: &FactBucket) -> Option<f64> {
    value(bucket, "shareholders_equity").or_else(|| {
        match (
            value(bucket, "total_assets"),
            value(bucket, "total_liabilities"),
        ) {
            (Some(a), Some(l)) => finite(a - l),
            _ => None,
        }
    })
}

/// Compute all derivable ratios for one ticker/year bucket. `quote` is
/// only supplied for the most recent year (price-based ratios are
/// point-in-time, not historical).
pub fn derive_year(
    ctx: &DerivationContext,
    bucket: &FactBucket,
    quote: Option<&Quote>,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let mut emit = |name: &'static str, v: Option<f64>| {
        debug_assert!(DERIVED_METRICS.contains(&name));
        if let Some(v) = v.and_then(finite) {
            out.insert(name.to_string(), v);
        }
    };

    let revenue = value(bucket, "revenue");
    let ni = net_income(bucket);
    let ebit = first_of(bucket, &["ebit", "operating_income"]);
    let ebitda_v = ebitda(bucket);
    let total_assets = value(bucket, "total_assets");

    let gross_profit = value(bucket, "gross_profit").or_else(|| {
        match (revenue, value(bucket, "cost_of_goods_sold")) {
            (Some(r), Some(c)) => finite(r - c),
            _ => None,
        }
    });

    emit("gross_margin", safe_div(gross_profit, revenue));
    emit("operating_margin", safe_div(value(bucket, "operating_income"), revenue));
    emit("net_margin", safe_div(ni, revenue));
    emit("ebitda_margin", safe_div(ebitda_v, revenue));

    emit("roa", safe_div(ni, total_assets));
    emit("roe", safe_div(ni, value(bucket, "shareholders_equity")));

    // ROIC = NOPAT / invested capital, invested capital being total
    // assets net of cash and current liabilities.
    let invested_capital = match (
        total_assets,
        value(bucket, "cash_and_cash_equivalents"),
        value(bucket, "current_liabilities"),
    ) {
        (Some(a), Some(cash), Some(cl)) => finite(a - cash - cl),
        _ => None,
    };
    let nopat = ebit.map(|e| e * (1.0 - ctx.tax_rate));
    emit("roic", safe_div(nopat, invested_capital));

    let current_liabilities = value(bucket, "current_liabilities");
    emit(
        "current_ratio",
        safe_div(value(bucket, "current_assets"), current_liabilities),
    );
    let quick_assets = match (value(bucket, "current_assets"), value(bucket, "inventory")) {
        (Some(ca), Some(inv)) => finite(ca - inv),
        (Some(ca), None) => Some(ca),
        _ => None,
    };
    emit("quick_ratio", safe_div(quick_assets, current_liabilities));
    emit(
        "debt_to_equity",
        safe_div(
            value(bucket, "total_liabilities"),
            value(bucket, "shareholders_equity"),
        ),
    );

    emit("ebitda", ebitda_v);
    emit("free_cash_flow", free_cash_flow(bucket));
    emit("working_capital", working_capital(bucket));

    emit(
        "interest_coverage",
        safe_div(ebit, value(bucket, "interest_expense").map(f64::abs)),
    );
    emit("asset_turnover", safe_div(revenue, total_assets));

    if let Some(quote) = quote {
        emit("price_to_sales", safe_div(quote.market_cap, revenue));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use metrics_core::FinancialFact;

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

    fn bucket_from(pairs: &[(&str, f64)]) -> FactBucket {
        pairs
            .iter()
            .map(|(metric, v)| {
                (
                    metric.to_string(),
                    FactEntry {
                        value: Some(*v),
                        recorded_at: Utc::now(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn bucketing_keeps_latest_ingested_fact() {
        let mut older = fact("AAPL", "revenue", 2024, 90.0);
        older.ingested_at = Utc::now() - Duration::days(1);
        let newer = fact("AAPL", "revenue", 2024, 100.0);
        // Alias resolves to the same canonical key as "revenue"
        let mut alias = fact("AAPL", "total_revenue", 2024, 80.0);
        alias.ingested_at = Utc::now() - Duration::days(2);

        let buckets = bucket_facts(&[older, newer, alias]);
        let bucket = &buckets[&("AAPL".to_string(), 2024)];
        assert_eq!(bucket["revenue"].value, Some(100.0));
    }

    #[test]
    fn margins_use_fallback_chains() {
        let ctx = DerivationContext::default();
        let bucket = bucket_from(&[
            ("revenue", 100.0),
            ("cost_of_goods_sold", 40.0),
            ("operating_income", 25.0),
            ("net_income", 20.0),
            ("net_income_adjusted", 22.0),
            ("depreciation_and_amortization", 5.0),
        ]);

        let derived = derive_year(&ctx, &bucket, None);
        assert_eq!(derived["gross_margin"], 0.6);
        assert_eq!(derived["operating_margin"], 0.25);
        // Adjusted net income wins over reported
        assert_eq!(derived["net_margin"], 0.22);
        // EBITDA rebuilt from operating income + D&A
        assert_eq!(derived["ebitda"], 30.0);
        assert_eq!(derived["ebitda_margin"], 0.3);
    }

    #[test]
    fn roic_uses_fixed_tax_rate_and_invested_capital() {
        let ctx = DerivationContext::default();
        let bucket = bucket_from(&[
            ("operating_income", 100.0),
            ("total_assets", 500.0),
            ("cash_and_cash_equivalents", 50.0),
            ("current_liabilities", 50.0),
        ]);

        let derived = derive_year(&ctx, &bucket, None);
        // 100 * 0.79 / (500 - 50 - 50)
        assert!((derived["roic"] - 0.1975).abs() < 1e-12);
    }

    #[test]
    fn free_cash_flow_treats_capex_as_signed() {
        let ctx = DerivationContext::default();
        let bucket = bucket_from(&[
            ("cash_from_operations", 80.0),
            ("capital_expenditures", -30.0),
        ]);
        let derived = derive_year(&ctx, &bucket, None);
        assert_eq!(derived["free_cash_flow"], 50.0);
    }

    #[test]
    fn zero_denominator_is_missing_not_error() {
        let ctx = DerivationContext::default();
        let bucket = bucket_from(&[("net_income", 20.0), ("revenue", 0.0)]);
        let derived = derive_year(&ctx, &bucket, None);
        assert!(!derived.contains_key("net_margin"));
    }

    #[test]
    fn price_to_sales_needs_a_quote() {
        let ctx = DerivationContext::default();
        let bucket = bucket_from(&[("revenue", 100.0)]);

        let without = derive_year(&ctx, &bucket, None);
        assert!(!without.contains_key("price_to_sales"));

        let quote = Quote {
            price: 10.0,
            market_cap: Some(400.0),
            enterprise_value: None,
        };
        let with = derive_year(&ctx, &bucket, Some(&quote));
        assert_eq!(with["price_to_sales"], 4.0);
    }

    #[test]
    fn working_capital_prefers_reported_value() {
        let ctx = DerivationContext::default();
        let bucket = bucket_from(&[
            ("working_capital", 42.0),
            ("current_assets", 100.0),
            ("current_liabilities", 30.0),
        ]);
        let derived = derive_year(&ctx, &bucket, None);
        assert_eq!(derived["working_capital"], 42.0);
    }
}
