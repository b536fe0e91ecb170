use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

/// Reads a JSON number or numeric string as a decimal. Null and blank strings
/// read as `None`.
pub fn decimal_from_value(value: &Value) -> Result<Option<Decimal>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => parse_decimal(&number.to_string()).map(Some),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_decimal(s.trim()).map(Some),
        other => Err(format!("Expected a number, got {}", other)),
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, String> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|e| format!("Invalid decimal {:?}: {}", s, e))
}

pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(8).normalize())
}

/// `(current / previous - 1) * 100`, `None` when previous is not positive.
pub fn pct_change(current: Decimal, previous: Decimal) -> Option<Decimal> {
    if previous <= dec!(0) {
        return None;
    }
    Some((current / previous - dec!(1)) * dec!(100))
}

/// Whole-unit amount with thousands separators, e.g. `-12,346`.
pub fn format_money(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let digits = rounded.abs().trunc().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if rounded < dec!(0) {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

pub fn format_price(value: Option<Decimal>) -> String {
    value.map_or("-".to_string(), |v| format!("{:.4}", v))
}

pub fn format_pct(value: Option<Decimal>) -> String {
    value.map_or("-".to_string(), |v| format!("{:.2}%", v))
}
