//! FinSight custom KPI engine
//!
//! User-defined formula KPIs: validation, dependency extraction, CRUD
//! with an immutable version trail, and sandboxed evaluation over a
//! small arithmetic AST with full provenance on every calculation.

pub mod ast;
pub mod engine;
pub mod eval;
pub mod format;
pub mod formula;
pub mod models;
pub mod store;

pub use engine::KpiEngine;
pub use format::format_value;
pub use formula::{normalize, parse, validate};
pub use models::{
    CalculationStep, CustomKpi, KpiCalculationResult, KpiInput, KpiUsageRecord, KpiVersion,
};
pub use store::KpiStore;
