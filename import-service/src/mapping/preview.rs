//! Display formatting of sample values next to each mapped field.
//!
//! Previews are presentation only: anything that does not parse yields no
//! preview instead of an error.

use crate::models::MappableField;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use heck::ToTitleCase;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Canonical display format of dates.
pub const DISPLAY_DATE_FORMAT: &str = "%Y-%m-%d";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y%m%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

/// Render `sample` the way the mapping form previews `field`.
pub fn format_preview(
    field: MappableField,
    sample: Option<&str>,
    currency: Option<&str>,
) -> Option<String> {
    let sample = sample.map(str::trim).filter(|s| !s.is_empty())?;

    match field {
        MappableField::Date => {
            parse_date(sample).map(|date| date.format(DISPLAY_DATE_FORMAT).to_string())
        }
        MappableField::Amount | MappableField::Balance => {
            let amount = parse_amount(sample)?;
            Some(match currency.map(str::trim).filter(|c| !c.is_empty()) {
                Some(currency) => format_currency(amount, currency),
                None => amount.normalize().to_string(),
            })
        }
        MappableField::Description => Some(sample.to_title_case()),
        MappableField::Currency | MappableField::Account => Some(sample.to_string()),
    }
}

/// Parse a date in any of the common export formats.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Parse a locale-formatted amount such as `1,234.56`, `1.234,56`,
/// `$ -12.00`, `(45.10)` or `12.50-`.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    let mut negative = false;

    let mut body = raw;
    if let Some(inner) = body.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        body = inner;
    }

    let mut digits = String::with_capacity(body.len());
    for ch in body.chars() {
        match ch {
            '0'..='9' | '.' | ',' => digits.push(ch),
            '-' | '\u{2212}' => negative = true,
            _ => {}
        }
    }
    if !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = normalize_separators(&digits)?;
    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

/// Rewrite `digits` (digits, dots and commas) with `.` as the only decimal
/// separator and no grouping.
fn normalize_separators(digits: &str) -> Option<String> {
    let last_dot = digits.rfind('.');
    let last_comma = digits.rfind(',');

    let decimal = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => Some(dot.max(comma)),
        (Some(dot), None) => (digits.matches('.').count() == 1).then_some(dot),
        (None, Some(comma)) => {
            let decimals = digits.len() - comma - 1;
            (digits.matches(',').count() == 1 && decimals != 3).then_some(comma)
        }
        (None, None) => None,
    };

    let mut out = String::with_capacity(digits.len());
    for (i, ch) in digits.char_indices() {
        match ch {
            '.' | ',' if Some(i) == decimal => out.push('.'),
            '.' | ',' => {}
            _ => out.push(ch),
        }
    }

    if out.starts_with('.') {
        out.insert(0, '0');
    }
    if out.ends_with('.') {
        out.pop();
    }
    (!out.is_empty()).then_some(out)
}

/// Render `amount` in `currency` with en-US grouping, e.g. `$1,234.56`,
/// `-€12.00` or `SEK 1,234.56`.
pub fn format_currency(amount: Decimal, currency: &str) -> String {
    let code = currency.trim().to_uppercase();
    let (prefix, decimals) = match code.as_str() {
        "USD" => ("$".to_string(), 2),
        "EUR" => ("€".to_string(), 2),
        "GBP" => ("£".to_string(), 2),
        "INR" => ("₹".to_string(), 2),
        "JPY" => ("¥".to_string(), 0),
        "CAD" => ("CA$".to_string(), 2),
        "AUD" => ("A$".to_string(), 2),
        _ => (format!("{} ", code), 2),
    };

    let rounded = amount.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };

    let mut fixed = rounded.abs();
    fixed.rescale(decimals);
    let text = fixed.to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(frac) => format!("{}{}{}.{}", sign, prefix, grouped, frac),
        None => format!("{}{}{}", sign, prefix, grouped),
    }
}
