use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid formula: {0}")]
    InvalidFormula(String),

    #[error("Missing metric: {0}")]
    MissingMetric(String),

    #[error("Formula evaluation failed: {0}")]
    FormulaEvaluation(String),

    #[error("KPI not found: {0}")]
    KpiNotFound(String),

    #[error("Quote fetch failed: {0}")]
    QuoteFetch(String),

    #[error("Database error: {0}")]
    Database(String),
}
