//! Formula validation, normalization and dependency extraction.

use metrics_core::MetricsError;
use std::collections::BTreeSet;

use crate::ast;

/// Function names excluded from dependency extraction (case-insensitive).
pub const FUNCTION_NAMES: &[&str] = &["sum", "avg", "max", "min", "abs", "round"];

const ALLOWED_PUNCT: &str = "_+-*/().,[] ";

/// Collapse runs of whitespace; the stored formula is always normalized.
pub fn normalize(formula: &str) -> String {
    formula.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identifier tokens (`[A-Za-z_][A-Za-z0-9_]*`) that are not function
/// names: lower-cased, de-duplicated, sorted.
pub fn extract_dependencies(formula: &str) -> Vec<String> {
    let mut deps = BTreeSet::new();
    let chars: Vec<char> = formula.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let token: String = chars[start..i].iter().collect::<String>().to_ascii_lowercase();
            if !FUNCTION_NAMES.contains(&token.as_str()) {
                deps.insert(token);
            }
        } else {
            i += 1;
        }
    }

    deps.into_iter().collect()
}

/// Validate a formula: character set, balanced parentheses, then a
/// syntax dry-run (parsed, never executed). Parser errors are reported
/// verbatim.
pub fn validate(formula: &str) -> Result<(), MetricsError> {
    if normalize(formula).is_empty() {
        return Err(MetricsError::InvalidFormula("Empty formula".to_string()));
    }

    for c in formula.chars() {
        if !c.is_ascii_alphanumeric() && !ALLOWED_PUNCT.contains(c) {
            return Err(MetricsError::InvalidFormula(format!(
                "Invalid character '{c}' in formula"
            )));
        }
    }

    let mut depth = 0i32;
    for c in formula.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(MetricsError::InvalidFormula(
                "Unbalanced parentheses".to_string(),
            ));
        }
    }
    if depth != 0 {
        return Err(MetricsError::InvalidFormula(
            "Unbalanced parentheses".to_string(),
        ));
    }

    ast::parse_expression(&normalize(formula))?;
    Ok(())
}

/// Normalize and extract dependencies in one pass (the shape persisted
/// on every KPI create/update).
pub fn parse(formula: &str) -> (String, Vec<String>) {
    let normalized = normalize(formula);
    let dependencies = extract_dependencies(&normalized);
    (normalized, dependencies)
}
