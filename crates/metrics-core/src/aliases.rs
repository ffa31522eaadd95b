//! Metric name canonicalization.
//!
//! Ingestion feeds report the same concept under different tags (EDGAR
//! us-gaap names, vendor spellings, shorthand from user uploads). All
//! computation happens on canonical names, so this runs before anything
//! else touches a fact.

/// Map a raw metric name to its canonical form. Total function: unknown
/// names pass through lower-cased.
pub fn canonical_name(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "operating_cash_flow"
        | "net_cash_provided_by_operating_activities"
        | "cash_flow_from_operations" => "cash_from_operations",
        "capex" | "payments_to_acquire_property_plant_and_equipment" => "capital_expenditures",
        "sales" | "revenues" | "total_revenue" | "net_sales" => "revenue",
        "net_profit" | "profit_after_tax" => "net_income",
        "adjusted_net_income" => "net_income_adjusted",
        "adjusted_ebitda" => "ebitda_adjusted",
        "stockholders_equity" | "total_equity" | "total_stockholders_equity" => {
            "shareholders_equity"
        }
        "cogs" | "cost_of_revenue" | "cost_of_sales" => "cost_of_goods_sold",
        "dep_and_amort" | "depreciation_amortization" => "depreciation_and_amortization",
        "diluted_eps" | "earnings_per_share_diluted" => "eps_diluted",
        "basic_eps" | "earnings_per_share_basic" => "eps_basic",
        "cash" | "cash_and_equivalents" => "cash_and_cash_equivalents",
        "interest" | "interest_paid" => "interest_expense",
        "dividends" | "payments_of_dividends" => "dividends_paid",
        "dividend_per_share" => "dividends_per_share",
        "shares_diluted" | "weighted_average_diluted_shares" => "weighted_avg_diluted_shares",
        "shares" | "common_shares_outstanding" => "shares_outstanding",
        "ppe" | "property_plant_and_equipment" => "net_ppe",
        other => other,
    };
    canonical.to_string()
}
