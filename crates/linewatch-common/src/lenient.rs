//! Tolerant field decoders for backend payloads.
//!
//! The backend mirrors spreadsheet cells, so a numeric column occasionally
//! arrives as a string ("1.234", "95%") and a text column as a number.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Leading numeric prefix of `text` once everything but digits, `.` and
/// `-` is dropped: `"95%"` is `95`, `"12.5.1"` is `12.5`, `"12-3"` is `12`.
/// `None` when no digit leads the cleaned text.
pub fn number_prefix(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;
    for (i, ch) in cleaned.char_indices() {
        match ch {
            '-' if i == 0 => {}
            '.' if !seen_dot => seen_dot = true,
            c if c.is_ascii_digit() => seen_digit = true,
            _ => break,
        }
        end = i + ch.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    cleaned[..end]
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Parse a loosely typed JSON value as a number. Strings go through
/// [`number_prefix`]. Returns `None` for null, booleans, containers and
/// text without a leading number.
pub fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => number_prefix(s),
        _ => None,
    }
}

pub fn text_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn opt_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

pub fn opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(text_from_value(&value))
}

pub fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_number(deserializer)?.unwrap_or(0.0))
}

pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_text(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_pass_through() {
        assert_eq!(number_from_value(&json!(12.5)), Some(12.5));
        assert_eq!(number_from_value(&json!(-3)), Some(-3.0));
    }

    #[test]
    fn test_numeric_strings_are_cleaned() {
        assert_eq!(number_from_value(&json!("95%")), Some(95.0));
        assert_eq!(number_from_value(&json!(" 1234 ")), Some(1234.0));
    }

    #[test]
    fn test_malformed_strings_keep_the_leading_number() {
        assert_eq!(number_from_value(&json!("12.5.1")), Some(12.5));
        assert_eq!(number_from_value(&json!("12-3")), Some(12.0));
        assert_eq!(number_from_value(&json!("-4.5kg")), Some(-4.5));
        assert_eq!(number_prefix("-"), None);
        assert_eq!(number_prefix("."), None);
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(number_from_value(&json!("n/a")), None);
        assert_eq!(number_from_value(&json!(null)), None);
        assert_eq!(number_from_value(&json!([1])), None);
    }

    #[test]
    fn test_text_accepts_numbers() {
        assert_eq!(text_from_value(&json!(7)), Some("7".to_string()));
        assert_eq!(text_from_value(&json!("T2")), Some("T2".to_string()));
        assert_eq!(text_from_value(&json!(null)), None);
    }
}
