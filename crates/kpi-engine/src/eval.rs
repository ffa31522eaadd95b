//! Sandboxed AST evaluation.
//!
//! Walks the parsed tree with a variable map and the fixed function
//! table; nothing outside the map is reachable. Arithmetic faults
//! (division by zero, non-finite intermediates) surface as
//! `FormulaEvaluation` errors for the caller to report.

use metrics_core::MetricsError;
use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, Func};

fn fault(msg: impl Into<String>) -> MetricsError {
    MetricsError::FormulaEvaluation(msg.into())
}

fn apply(func: Func, args: &[f64]) -> Result<f64, MetricsError> {
    if args.is_empty() {
        return Err(fault(format!("{}() requires at least one argument", func.name())));
    }
    match func {
        Func::Sum => Ok(args.iter().sum()),
        Func::Avg => Ok(args.iter().sum::<f64>() / args.len() as f64),
        Func::Max => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Func::Min => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        Func::Abs => {
            if args.len() != 1 {
                return Err(fault("abs() takes exactly one argument"));
            }
            Ok(args[0].abs())
        }
        Func::Round => match args {
            [value] => Ok(value.round()),
            [value, digits] => {
                let factor = 10f64.powi(*digits as i32);
                Ok((value * factor).round() / factor)
            }
            _ => Err(fault("round() takes one or two arguments")),
        },
    }
}

/// Evaluate an expression against resolved variable values. Variable
/// lookup is case-insensitive (the map is keyed lower-case).
pub fn evaluate(expr: &Expr, vars: &HashMap<String, f64>) -> Result<f64, MetricsError> {
    let value = match expr {
        Expr::Literal(n) => *n,
        Expr::Variable(name) => *vars
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| fault(format!("Unknown variable '{name}'")))?,
        Expr::Neg(inner) => -evaluate(inner, vars)?,
        Expr::Binary { op, left, right } => {
            let l = evaluate(left, vars)?;
            let r = evaluate(right, vars)?;
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => {
                    if r == 0.0 {
                        return Err(fault("Division by zero"));
                    }
                    l / r
                }
            }
        }
        Expr::Call { func, args } => {
            let values = args
                .iter()
                .map(|a| evaluate(a, vars))
                .collect::<Result<Vec<_>, _>>()?;
            apply(*func, &values)?
        }
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(fault("Result is not a finite number"))
    }
}
