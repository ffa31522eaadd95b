/// Tunables shared by the derivation and aggregation passes. Passed by
/// reference into every computation; there is no process-wide state.
#[derive(Debug, Clone)]
pub struct DerivationContext {
    /// Effective tax rate applied to EBIT when computing NOPAT for ROIC.
    pub tax_rate: f64,
    /// Weight of revenue CAGR in the proxy TSR heuristic.
    pub tsr_proxy_revenue_weight: f64,
    /// Lower clamp bound for the proxy TSR.
    pub tsr_proxy_min: f64,
    /// Upper clamp bound for the proxy TSR.
    pub tsr_proxy_max: f64,
}

impl Default for DerivationContext {
    fn default() -> Self {
        Self {
            tax_rate: 0.21,
            tsr_proxy_revenue_weight: 0.3,
            tsr_proxy_min: -0.5,
            tsr_proxy_max: 1.0,
        }
    }
}
