//! Field formatting and colour classification.
//!
//! Every function here is total: bad input (NaN, infinities, garbage text)
//! degrades to a neutral bucket or a `"0"` string, never an error.
//!
//! | Classifier            | Scale                                                        |
//! |-----------------------|--------------------------------------------------------------|
//! | [`classify`]          | ≥100.5 excellent, ≥95 good, ≥90 warning, ≥85 alert, else critical |
//! | [`classify_rft`]      | ≥92 good, ≥85 warning, else critical                         |
//! | [`classify_error_rate`] | ≤2 good, ≤3.75 warning, else critical                      |
//! | [`classify_qc_defect`] | critical defects ≤1.5 good, other defects ≤2.5 good        |
//! | [`classify_target_met`] | ≥100 good, else critical                                  |
//!
//! The percentage and RFT scales are deliberately separate functions; they
//! are not interchangeable.

use console::Color;

use linewatch_common::lenient;

/// Ordered severity bucket plus a neutral fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Excellent,
    Good,
    Warning,
    Alert,
    Critical,
    /// Absent or out-of-range input. Not a severity.
    Neutral,
}

/// Terminal colours for a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub fg: Color,
    pub bg: Color,
}

impl Bucket {
    pub fn palette(&self) -> Palette {
        match self {
            Self::Excellent => Palette {
                fg: Color::White,
                bg: Color::Magenta,
            },
            Self::Good => Palette {
                fg: Color::White,
                bg: Color::Green,
            },
            Self::Warning => Palette {
                fg: Color::Black,
                bg: Color::Yellow,
            },
            Self::Alert => Palette {
                fg: Color::White,
                bg: Color::Color256(208),
            },
            Self::Critical => Palette {
                fg: Color::White,
                bg: Color::Red,
            },
            Self::Neutral => Palette {
                fg: Color::White,
                bg: Color::Black,
            },
        }
    }

    pub fn is_severity(&self) -> bool {
        !matches!(self, Self::Neutral)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Warning => "warning",
            Self::Alert => "alert",
            Self::Critical => "critical",
            Self::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn usable(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Completion-style percentage (output vs target, PPH attainment).
pub fn classify(percentage: f64) -> Bucket {
    if !usable(percentage) {
        return Bucket::Neutral;
    }
    if percentage >= 100.5 {
        Bucket::Excellent
    } else if percentage >= 95.0 {
        Bucket::Good
    } else if percentage >= 90.0 {
        Bucket::Warning
    } else if percentage >= 85.0 {
        Bucket::Alert
    } else {
        Bucket::Critical
    }
}

/// Right-first-time rate.
pub fn classify_rft(percentage: f64) -> Bucket {
    if !usable(percentage) {
        return Bucket::Neutral;
    }
    if percentage >= 92.0 {
        Bucket::Good
    } else if percentage >= 85.0 {
        Bucket::Warning
    } else {
        Bucket::Critical
    }
}

/// QC defect rate; lower is better.
pub fn classify_error_rate(percentage: f64) -> Bucket {
    if !usable(percentage) {
        return Bucket::Neutral;
    }
    if percentage <= 2.0 {
        Bucket::Good
    } else if percentage <= 3.75 {
        Bucket::Warning
    } else {
        Bucket::Critical
    }
}

/// Share of a single defect category. Critical categories have a tighter limit.
pub fn classify_qc_defect(percentage: f64, critical: bool) -> Bucket {
    if !usable(percentage) {
        return Bucket::Neutral;
    }
    let limit = if critical { 1.5 } else { 2.5 };
    if percentage <= limit {
        Bucket::Good
    } else {
        Bucket::Critical
    }
}

/// Pass/fail against a 100% target.
pub fn classify_target_met(percentage: f64) -> Bucket {
    if !usable(percentage) {
        return Bucket::Neutral;
    }
    if percentage >= 100.0 {
        Bucket::Good
    } else {
        Bucket::Critical
    }
}

fn group_digits(digits: &str, separator: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 * separator.len());
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push_str(separator);
        }
        out.push(ch);
    }
    out
}

/// Thousands-grouped count, e.g. `1.234.567` with `"."`. Up to three
/// fraction digits are kept, written with the other separator (`,` when
/// grouping with `.`). Absent or non-finite input is `"0"`.
pub fn format_count(value: Option<f64>, separator: &str) -> String {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return "0".to_string();
    };
    // Beyond 1e15 an f64 has no fraction digits left and `* 1000` can overflow.
    let rounded = if value.abs() > 1e15 {
        value.round()
    } else {
        (value * 1000.0).round() / 1000.0
    };
    if rounded == 0.0 {
        return "0".to_string();
    }
    let decimal = if separator == "," { "." } else { "," };
    let text = format!("{:.3}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((&text, ""));
    let frac = frac_part.trim_end_matches('0');

    let mut out = String::new();
    if rounded < 0.0 {
        out.push('-');
    }
    out.push_str(&group_digits(int_part, separator));
    if !frac.is_empty() {
        out.push_str(decimal);
        out.push_str(frac);
    }
    out
}

/// Signed delta: `+12`, `-3`, `0`. Non-finite input is `"0"`.
pub fn format_signed_delta(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let text = trim_fixed(value.abs(), 2);
    if text == "0" {
        "0".to_string()
    } else if value > 0.0 {
        format!("+{text}")
    } else {
        format!("-{text}")
    }
}

/// Percentage rounded to `decimals` places with trailing zeros trimmed:
/// `95.50` → `"95.5"`. No `%` sign; non-finite input is `"0"`.
pub fn format_percentage(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    trim_fixed(value, decimals)
}

fn trim_fixed(value: f64, decimals: usize) -> String {
    let text = format!("{value:.decimals$}");
    let text = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    };
    if text == "-0" { "0".to_string() } else { text }
}

/// Leading numeric prefix of `text` after dropping everything but digits,
/// `.` and `-`. Unparseable input is `0`. Backend fields are decoded with
/// the same rule.
pub fn safe_parse_number(text: &str) -> f64 {
    lenient::number_prefix(text).unwrap_or(0.0)
}

/// Parse a percentage that may be written as a fraction (`0.95`) or as a
/// percent (`95`, `"95%"`). Fractions up to 1 are scaled by 100 unless the
/// text carries an explicit `%`.
pub fn safe_parse_percentage(text: &str) -> f64 {
    let value = safe_parse_number(text);
    if text.contains('%') || value > 1.0 {
        value
    } else {
        value * 100.0
    }
}
