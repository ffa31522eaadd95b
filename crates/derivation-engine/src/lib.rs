//! FinSight derivation engine
//!
//! Turns raw point-in-time financial facts into derived per-year ratios,
//! multi-year aggregates (CAGR, growth, valuation multiples, TSR) and
//! cross-sectional benchmark averages, then replaces the snapshot
//! generation wholesale.

pub mod aggregates;
pub mod benchmark;
pub mod context;
pub mod derive;
pub mod refresh;

pub use aggregates::{aggregate_ticker, YearData};
pub use benchmark::{average_snapshots, compute_benchmark_metrics, latest_of};
pub use context::DerivationContext;
pub use derive::{bucket_facts, derive_year, FactBucket, DERIVED_METRICS};
pub use refresh::{refresh_metrics, RefreshOutcome};
