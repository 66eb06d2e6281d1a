use chrono::NaiveDate;
use serde_json::Value;

/// Heading date layout on the homepage: "05 DEC 2025".
pub const HEADING_DATE_FORMAT: &str = "%d %b %Y";

const PLACEHOLDERS: &[&str] = &["", "-", "--", "—", "–", "N/A", "NA", "n/a", "null"];
const DOWN_GLYPHS: &[char] = &['▼', '↓', '⬇', '▾'];

fn is_placeholder(s: &str) -> bool {
    PLACEHOLDERS.contains(&s)
}

// ── Numbers ───────────────────────────────────────────────────────────────────

/// Parse a displayed number: strip thousands separators, currency text,
/// percent signs and arrow glyphs. Placeholders come back as `None`, never 0.
///
/// "1,234.56" → 1234.56 | "-2.5%" → -2.5 | "▼ 1.10" → -1.1 | "N/A" → None
pub fn clean_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if is_placeholder(s) {
        return None;
    }

    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();

    if cleaned.is_empty() || cleaned == "-" || cleaned == "+" {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    // A down arrow without an explicit sign still means a fall.
    if s.contains(DOWN_GLYPHS) && !cleaned.starts_with('-') {
        return Some(-value);
    }
    Some(value)
}

/// Integer counts, accepting K/M/B shorthand.
/// "1,200" → 1200 | "1.2M" → 1,200,000 | "345K" → 345,000
pub fn clean_count(raw: &str) -> Option<i64> {
    let s = raw.trim().to_uppercase().replace(',', "");
    if is_placeholder(&s) {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('B') {
        (n, 1_000_000_000.0)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1_000_000.0)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1_000.0)
    } else {
        (s.as_str(), 1.0)
    };

    let value = clean_number(num_str)? * multiplier;
    Some(value.round() as i64)
}

/// Scraped values arrive either as JSON numbers or display strings.
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => clean_number(s),
        _ => None,
    }
}

pub fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => clean_count(s),
        _ => None,
    }
}

pub fn opt_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(value_to_f64)
}

pub fn opt_i64(value: Option<&Value>) -> Option<i64> {
    value.and_then(value_to_i64)
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Strip the exchange suffix and upper-case: "delta.zw" → "DELTA".
pub fn normalise_symbol(s: &str) -> Option<String> {
    let base = s.trim().split('.').next()?.trim();
    if base.is_empty() {
        None
    } else {
        Some(base.to_uppercase())
    }
}

pub fn normalise_text(s: Option<&str>) -> Option<String> {
    let s = s?.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.is_empty() || is_placeholder(&s) {
        None
    } else {
        Some(s)
    }
}

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Parse the heading date: "05 DEC 2025" → 2025-12-05.
pub fn parse_heading_date(s: &str) -> Option<NaiveDate> {
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDate::parse_from_str(&s, HEADING_DATE_FORMAT).ok()
}

/// Operator-supplied dates may also be ISO.
pub fn parse_override_date(s: &str) -> Option<NaiveDate> {
    parse_heading_date(s).or_else(|| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
