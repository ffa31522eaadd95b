//! Unit-aware result formatting.

/// Group an unsigned integer string with thousands separators.
fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn format_currency(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let abs = value.abs();
    let whole = abs.trunc() as u64;
    let cents = ((abs - abs.trunc()) * 100.0).round() as u64;
    // Rounding cents can carry into the whole part (e.g. 1.999 -> 2.00)
    let (whole, cents) = if cents == 100 { (whole + 1, 0) } else { (whole, cents) };
    format!("{sign}${}.{cents:02}", group_thousands(&whole.to_string()))
}

/// Render a KPI value per its configured unit: `pct` scales to percent,
/// `bps` to basis points, `usd*` to currency; anything else is plain
/// two-decimal.
pub fn format_value(value: f64, unit: Option<&str>) -> String {
    match unit.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("pct") => format!("{:.2}%", value * 100.0),
        Some("bps") => format!("{:.0} bps", value * 10000.0),
        Some(u) if u.starts_with("usd") => format_currency(value),
        _ => format!("{value:.2}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_scales_by_one_hundred() {
        assert_eq!(format_value(0.2, Some("pct")), "20.00%");
        assert_eq!(format_value(-0.055, Some("pct")), "-5.50%");
    }

    #[test]
    fn basis_points_scale_by_ten_thousand() {
        assert_eq!(format_value(0.0025, Some("bps")), "25 bps");
    }

    #[test]
    fn currency_groups_thousands() {
        assert_eq!(format_value(1234567.891, Some("usd")), "$1,234,567.89");
        assert_eq!(format_value(-42.5, Some("usd_m")), "-$42.50");
        assert_eq!(format_value(999.999, Some("usd")), "$1,000.00");
    }

    #[test]
    fn default_is_plain_two_decimal() {
        assert_eq!(format_value(3.14159, None), "3.14");
        assert_eq!(format_value(2.0, Some("ratio")), "2.00");
    }
}
