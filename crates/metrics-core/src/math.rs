//! Guarded numeric primitives.
//!
//! Division by zero and non-finite intermediates are missing-data
//! conditions here, never errors: a ratio that cannot be computed is
//! simply absent from the output.

/// Keep a value only if it is a real number.
pub fn finite(v: f64) -> Option<f64> {
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

/// `a / b`, or `None` when either side is missing, the denominator is
/// zero, or the result is not finite.
pub fn safe_div(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if b != 0.0 => finite(a / b),
        _ => None,
    }
}

/// Compound annual growth rate `(end/start)^(1/periods) - 1`. Defined
/// only for strictly positive endpoints and `periods > 0`.
pub fn cagr(start: Option<f64>, end: Option<f64>, periods: i32) -> Option<f64> {
    match (start, end) {
        (Some(s), Some(e)) if s > 0.0 && e > 0.0 && periods > 0 => {
            finite((e / s).powf(1.0 / periods as f64) - 1.0)
        }
        _ => None,
    }
}

/// Single-period growth `(curr - prev) / |prev|`, `None` when the prior
/// value is missing or zero.
pub fn growth(prev: Option<f64>, curr: Option<f64>) -> Option<f64> {
    match (prev, curr) {
        (Some(p), Some(c)) if p != 0.0 => finite((c - p) / p.abs()),
        _ => None,
    }
}
