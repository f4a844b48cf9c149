//! Display formatting for interrupt values.

use serde_json::{Map, Number, Value};

use crate::events::{FieldType, Interrupt};

const GROUP_SEPARATOR: char = ',';
const MAX_FRACTION_DIGITS: usize = 3;

/// Inserts a separator every three digits of an unsigned digit string.
pub fn group_digits(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (idx, ch) in digits.chars().enumerate() {
        if idx != 0 && (idx + 3 - offset) % 3 == 0 {
            out.push(GROUP_SEPARATOR);
        }
        out.push(ch);
    }
    out
}

fn group_decimal(text: &str) -> Option<String> {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.strip_prefix('+').unwrap_or(text)),
    };
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut out = format!("{sign}{}", group_digits(whole));
    if let Some(fraction) = fraction {
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let fraction = fraction.trim_end_matches('0');
        if !fraction.is_empty() {
            out.push('.');
            out.push_str(fraction);
        }
    }
    Some(out)
}

/// Formats a JSON number with digit grouping.
///
/// Integers are grouped exactly; floats are rounded to three fraction digits.
pub fn format_number(number: &Number) -> String {
    if let Some(n) = number.as_i64() {
        return group_decimal(&n.to_string()).unwrap_or_else(|| n.to_string());
    }
    if let Some(n) = number.as_u64() {
        return group_digits(&n.to_string());
    }
    match number.as_f64() {
        Some(n) if n.is_finite() => {
            let text = format!("{:.*}", MAX_FRACTION_DIGITS, n);
            group_decimal(&text).unwrap_or(text)
        }
        _ => number.to_string(),
    }
}

/// Formats a currency-like amount with digit grouping.
pub fn format_amount(amount: f64) -> String {
    Number::from_f64(amount)
        .map(|number| format_number(&number))
        .unwrap_or_else(|| amount.to_string())
}

/// Formats one field value for display according to its declared type.
///
/// Null and empty values render as an empty string.
pub fn format_field_value(field_type: FieldType, value: &Value) -> String {
    match (field_type, value) {
        (_, Value::Null) => String::new(),
        (FieldType::Number, Value::Number(number)) => format_number(number),
        (FieldType::Number, Value::String(text)) => {
            let trimmed = text.trim();
            let plain: String = trimmed.chars().filter(|c| *c != GROUP_SEPARATOR).collect();
            group_decimal(&plain).unwrap_or_else(|| trimmed.to_string())
        }
        (_, Value::String(text)) => text.clone(),
        (_, Value::Number(number)) => number.to_string(),
        (_, Value::Bool(flag)) => flag.to_string(),
        (_, other) => other.to_string(),
    }
}

/// The editable text form of a proposed value.
pub fn input_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Parses a user's answer for a field of `field_type`.
///
/// Numeric answers may carry group separators; anything that does not parse
/// as a number is kept as text.  A blank numeric answer becomes null.
pub fn parse_field_input(field_type: FieldType, input: &str) -> Value {
    let input = input.trim();
    if field_type != FieldType::Number {
        return Value::String(input.to_string());
    }
    if input.is_empty() {
        return Value::Null;
    }
    let plain: String = input.chars().filter(|c| *c != GROUP_SEPARATOR).collect();
    if let Ok(n) = plain.parse::<i64>() {
        return Value::from(n);
    }
    plain
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(input.to_string()))
}

/// Builds the confirmation text that replaces a resolved interrupt: one
/// `label: value` line per declared field.
pub fn confirmation_text(interrupt: &Interrupt, values: &Map<String, Value>) -> String {
    interrupt
        .fields
        .iter()
        .map(|field| {
            let value = values
                .get(&field.name)
                .map(|value| format_field_value(field.field_type, value))
                .unwrap_or_default();
            format!("{}: {}", field.display_label(), value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
