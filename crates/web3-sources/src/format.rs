//! Formatting and Input Helpers
//!
//! Money goes through `Decimal`; percentages and scores stay `f64`.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde_json::Value;

/// Numeric field as `f64`; accepts JSON numbers and numeric strings, else 0
pub fn num(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Numeric field as `Decimal`; big integers in strings (wei) stay exact
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).unwrap_or(Decimal::ZERO),
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64))
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

/// Whether the field holds a usable positive number
pub fn is_positive(value: &Value) -> bool {
    value.as_f64().is_some_and(|v| v > 0.0)
}

/// String field, or `fallback`
pub fn text<'a>(value: &'a Value, fallback: &'a str) -> &'a str {
    value.as_str().unwrap_or(fallback)
}

/// `1234567.891` with `dp = 2` becomes `1,234,567.89`
pub fn grouped(value: Decimal, dp: u32) -> String {
    let rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    let digits = format!("{:.*}", dp as usize, rounded.abs());
    let (int, frac) = digits.split_once('.').map_or((digits.as_str(), None), |(i, f)| (i, Some(f)));

    let mut out = String::with_capacity(digits.len() + int.len() / 3 + 1);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        out.push('-');
    }
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if let Some(frac) = frac {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// Whole-dollar amount: `$1,234,568`
pub fn usd(value: Decimal) -> String {
    format!("${}", grouped(value, 0))
}

/// Signed percentage with `dp` decimals: `+1.5%`
pub fn pct(value: f64, dp: usize) -> String {
    format!("{value:+.dp$}%")
}

/// Share of `part` in `total` as a percentage, 0 when the total is 0
pub fn share(part: Decimal, total: Decimal) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    (part / total * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}

/// `0x1234567890...12345678` style shortening
pub fn short_address(address: &str) -> String {
    if address.len() <= 20 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}...{}", &address[..10], &address[address.len() - 8..])
}

/// An all-digit argument is a limit; anything else means `default`
pub fn limit_arg(input: &str, default: usize) -> usize {
    let input = input.trim();
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        input.parse().unwrap_or(default)
    } else {
        default
    }
}

/// A decimal number argument; anything else means `default`
pub fn float_arg(input: &str, default: f64) -> f64 {
    let input = input.trim().trim_end_matches('%');
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit() || c == '.') {
        input.parse().unwrap_or(default)
    } else {
        default
    }
}

/// Empty or `all` means "no filter"
pub fn optional_arg(input: &str) -> Option<&str> {
    let input = input.trim();
    if input.is_empty() || input.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(input)
    }
}

/// First `max_chars` characters, with an ellipsis when cut
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_grouped() {
        assert_eq!(grouped(dec!(1234567.891), 2), "1,234,567.89");
        assert_eq!(grouped(dec!(999), 0), "999");
        assert_eq!(grouped(dec!(-1000), 0), "-1,000");
        assert_eq!(usd(dec!(20500000000.4)), "$20,500,000,000");
    }

    #[test]
    fn test_numeric_fields() {
        assert_eq!(decimal(&json!("120000000000000000000000000")), dec!(120000000000000000000000000));
        assert_eq!(decimal(&json!(12)), dec!(12));
        assert!((num(&json!("3.5")) - 3.5).abs() < f64::EPSILON);
        assert_eq!(num(&Value::Null), 0.0);
        assert!(!is_positive(&Value::Null));
    }

    #[test]
    fn test_argument_parsing() {
        assert_eq!(limit_arg("5", 20), 5);
        assert_eq!(limit_arg("top five", 20), 20);
        assert_eq!(limit_arg("", 20), 20);
        assert!((float_arg("7.5", 5.0) - 7.5).abs() < f64::EPSILON);
        assert!((float_arg("high", 5.0) - 5.0).abs() < f64::EPSILON);
        assert_eq!(optional_arg("ALL"), None);
        assert_eq!(optional_arg(" Arbitrum "), Some("Arbitrum"));
    }

    #[test]
    fn test_short_address() {
        assert_eq!(
            short_address("0xbe0eb53f46cd790cd13851d5eff43d12404d33e8"),
            "0xbe0eb53f...404d33e8"
        );
        assert_eq!(pct(-1.26, 1), "-1.3%");
        assert_eq!(pct(3.0, 2), "+3.00%");
    }
}
