// src/extractors/normalize.rs
//! Converts raw matched strings into canonical typed values.

use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::extractors::fields::ValueKind;
use crate::utils::error::NormalizationError;

// --- Regex Patterns (Lazy Static) ---
static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<neg>[-−])?\s*(?:US)?\$?\s*(?P<neg2>[-−])?\s*(?P<num>\d[\d,]*(?:\.\d+)?|\.\d+)\s*(?P<suffix>thousands?|millions?|billions?|trillions?|mn|bn|[kmbt])?$",
    )
    .expect("Failed to compile CURRENCY_RE")
});

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<sign>[-+−])?\s*(?P<num>\d+(?:\.\d+)?|\.\d+)\s*(?:%|percent|pct)?$")
        .expect("Failed to compile PERCENT_RE")
});

static COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:approximately|about|over|nearly|more\s+than)?\s*(?P<neg>[-−])?\s*(?P<num>\d[\d,]*)$")
        .expect("Failed to compile COUNT_RE")
});

static TICKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{1,5}$").expect("Failed to compile TICKER_RE"));

static LIST_SPLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:,|;|\band\b)\s*").expect("Failed to compile LIST_SPLIT_RE")
});

static LEADING_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("Failed to compile LEADING_NUMBER_RE"));

static TRAILING_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\d\s](?P<suffix>thousands?|millions?|billions?|trillions?|mn|bn|[kmbt])\.?\)?$")
        .expect("Failed to compile TRAILING_SUFFIX_RE")
});

static LEADING_ARTICLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^the\s+").expect("Failed to compile LEADING_ARTICLE_RE"));

const MONTH_GROUP: &str = r"(?P<month>jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

/// Accepted date shapes, most specific first.
static DATE_SHAPES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // September 30, 2023 / Sept. 30 2023
        r"(?i)\b{MONTH}\.?\s+(?P<day>\d{1,2})(?:st|nd|rd|th)?,?\s+(?P<year>\d{4})\b",
        // 30 September 2023
        r"(?i)\b(?P<day>\d{1,2})(?:st|nd|rd|th)?\s+{MONTH}\.?,?\s+(?P<year>\d{4})\b",
        // 2023-09-30
        r"\b(?P<year>\d{4})-(?P<mnum>\d{1,2})-(?P<day>\d{1,2})\b",
        // 09/30/2023
        r"\b(?P<mnum>\d{1,2})/(?P<day>\d{1,2})/(?P<year>\d{4})\b",
        // September 2023
        r"(?i)\b{MONTH}\.?,?\s+(?P<year>\d{4})\b",
        // fiscal 2023 / FY2023 / 2023
        r"(?i)\b(?:fiscal\s+(?:year\s+)?|fy\s*'?)?(?P<year>(?:19|20)\d{2})\b",
    ]
    .iter()
    .map(|pat| Regex::new(&pat.replace("{MONTH}", MONTH_GROUP)).expect("Failed to compile date shape"))
    .collect()
});

/// Magnitude implied by a suffix letter or a statement header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Thousands,
    Millions,
    Billions,
    Trillions,
}

impl Scale {
    pub fn multiplier(self) -> f64 {
        match self {
            Scale::Thousands => 1e3,
            Scale::Millions => 1e6,
            Scale::Billions => 1e9,
            Scale::Trillions => 1e12,
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Scale> {
        match suffix.to_ascii_lowercase().as_str() {
            "k" | "thousand" | "thousands" => Some(Scale::Thousands),
            "m" | "mn" | "million" | "millions" => Some(Scale::Millions),
            "b" | "bn" | "billion" | "billions" => Some(Scale::Billions),
            "t" | "trillion" | "trillions" => Some(Scale::Trillions),
            _ => None,
        }
    }
}

/// Years a fiscal date may plausibly fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiscalWindow {
    pub earliest: i32,
    pub latest: i32,
}

impl FiscalWindow {
    pub const YEARS_BACK: i32 = 20;
    pub const YEARS_AHEAD: i32 = 1;
    pub const UNBOUNDED: FiscalWindow = FiscalWindow {
        earliest: i32::MIN,
        latest: i32::MAX,
    };

    pub fn around(year: i32) -> Self {
        Self {
            earliest: year - Self::YEARS_BACK,
            latest: year + Self::YEARS_AHEAD,
        }
    }

    /// Window relative to today's date (UTC).
    pub fn current() -> Self {
        Self::around(Utc::now().year())
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.earliest..=self.latest).contains(&year)
    }
}

impl Default for FiscalWindow {
    fn default() -> Self {
        Self::current()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiscalDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl FiscalDate {
    pub fn display(&self) -> String {
        match (self.month, self.day) {
            (Some(month), Some(day)) => NaiveDate::from_ymd_opt(self.year, month, day)
                .map(|d| d.format("%B %-d, %Y").to_string())
                .unwrap_or_else(|| format!("{}-{:02}-{:02}", self.year, month, day)),
            (Some(month), None) => format!("{} {}", month_name(month), self.year),
            _ => self.year.to_string(),
        }
    }

    /// Full calendar dates outrank month-year, which outranks a bare year.
    pub fn specificity(&self) -> f64 {
        match (self.month, self.day) {
            (Some(_), Some(_)) => 1.0,
            (Some(_), None) => 0.8,
            _ => 0.6,
        }
    }
}

/// A canonical, typed reading of one raw value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NormalizedValue {
    Currency { amount: f64, display: String },
    Percentage { percent: f64 },
    Date(FiscalDate),
    Ticker(String),
    Text(String),
    List(Vec<String>),
    Count(i64),
}

impl NormalizedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            NormalizedValue::Currency { .. } => ValueKind::Currency,
            NormalizedValue::Percentage { .. } => ValueKind::Percentage,
            NormalizedValue::Date(_) => ValueKind::Date,
            NormalizedValue::Ticker(_) => ValueKind::Ticker,
            NormalizedValue::Text(_) => ValueKind::Text,
            NormalizedValue::List(_) => ValueKind::List,
            NormalizedValue::Count(_) => ValueKind::Count,
        }
    }

    pub fn display(&self) -> String {
        match self {
            NormalizedValue::Currency { display, .. } => display.clone(),
            NormalizedValue::Percentage { percent } => format!("{:.2}%", percent),
            NormalizedValue::Date(date) => date.display(),
            NormalizedValue::Ticker(symbol) => symbol.clone(),
            NormalizedValue::Text(text) => text.clone(),
            NormalizedValue::List(items) => items.join(", "),
            NormalizedValue::Count(n) => format_count(*n),
        }
    }

    /// Two candidates agree when their keys are equal.
    ///
    /// Numeric keys use the exact value (cents, hundredths of a percent), never
    /// the abbreviated display.
    pub fn equivalence_key(&self) -> String {
        match self {
            NormalizedValue::Currency { amount, .. } => format!("{:.2}", amount),
            NormalizedValue::Percentage { percent } => format!("{:.4}", percent),
            NormalizedValue::Count(n) => n.to_string(),
            NormalizedValue::Text(_) | NormalizedValue::List(_) => self.display().to_lowercase(),
            NormalizedValue::Date(_) | NormalizedValue::Ticker(_) => self.display(),
        }
    }

    pub fn specificity(&self) -> f64 {
        match self {
            NormalizedValue::Date(date) => date.specificity(),
            _ => 1.0,
        }
    }

    /// Numeric magnitude for currency, percentage and count values.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            NormalizedValue::Currency { amount, .. } => Some(*amount),
            NormalizedValue::Percentage { percent } => Some(*percent),
            NormalizedValue::Count(n) => Some(*n as f64),
            _ => None,
        }
    }
}

/// Canonical display form of a dollar amount, e.g. `$66.59M`.
pub fn format_currency(amount: f64) -> String {
    let sign = if amount < 0.0 { "-" } else { "" };
    let abs = amount.abs();
    let (scaled, suffix) = if abs >= 1e12 {
        (abs / 1e12, "T")
    } else if abs >= 1e9 {
        (abs / 1e9, "B")
    } else if abs >= 1e6 {
        (abs / 1e6, "M")
    } else if abs >= 1e3 {
        (abs / 1e3, "K")
    } else {
        (abs, "")
    };
    format!("{}${:.2}{}", sign, scaled, suffix)
}

fn format_count(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn month_name(month: u32) -> &'static str {
    MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("Unknown")
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_ascii_lowercase();
    MONTH_NAMES
        .iter()
        .position(|m| m[..3].eq_ignore_ascii_case(&prefix))
        .map(|i| i as u32 + 1)
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn trim_trailing_punctuation(text: &str) -> &str {
    text.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':'))
        .trim_end()
}

/// Parses a currency string into a dollar amount.
///
/// Returns the amount and whether the raw value carried its own magnitude suffix.
pub fn parse_currency(raw: &str) -> Result<(f64, bool), NormalizationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NormalizationError::Empty);
    }

    let (inner, parenthesized) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (inner.trim(), true),
        None => (trimmed, false),
    };

    let caps = CURRENCY_RE
        .captures(inner)
        .ok_or_else(|| NormalizationError::NotNumeric(raw.to_string()))?;

    let number: f64 = caps["num"]
        .replace(',', "")
        .parse()
        .map_err(|_| NormalizationError::NotNumeric(raw.to_string()))?;

    let scale = caps.name("suffix").and_then(|s| Scale::from_suffix(s.as_str()));
    let negative = parenthesized || caps.name("neg").is_some() || caps.name("neg2").is_some();

    let mut amount = number * scale.map(Scale::multiplier).unwrap_or(1.0);
    if negative {
        amount = -amount;
    }
    Ok((amount, scale.is_some()))
}

/// Stateless apart from the fiscal window it checks dates against.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldNormalizer {
    window: FiscalWindow,
}

impl FieldNormalizer {
    pub fn new(window: FiscalWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> FiscalWindow {
        self.window
    }

    pub fn normalize(&self, raw: &str, kind: ValueKind) -> Result<NormalizedValue, NormalizationError> {
        self.normalize_scaled(raw, kind, None)
    }

    /// Like [`normalize`](Self::normalize), but a currency value without its own
    /// suffix is multiplied by `statement_scale` (e.g. a page headed "in thousands").
    pub fn normalize_scaled(
        &self,
        raw: &str,
        kind: ValueKind,
        statement_scale: Option<Scale>,
    ) -> Result<NormalizedValue, NormalizationError> {
        match kind {
            ValueKind::Currency => {
                let (mut amount, has_suffix) = parse_currency(raw)?;
                if !has_suffix {
                    if let Some(scale) = statement_scale {
                        amount *= scale.multiplier();
                    }
                }
                Ok(NormalizedValue::Currency {
                    amount,
                    display: format_currency(amount),
                })
            }
            ValueKind::Percentage => normalize_percentage(raw),
            ValueKind::Date => self.normalize_date(raw).map(NormalizedValue::Date),
            ValueKind::Ticker => normalize_ticker(raw),
            ValueKind::Count => normalize_count(raw),
            ValueKind::Text => {
                let text = collapse_whitespace(raw);
                let text = trim_trailing_punctuation(&text);
                if text.is_empty() {
                    return Err(NormalizationError::Empty);
                }
                Ok(NormalizedValue::Text(text.to_string()))
            }
            ValueKind::List => {
                let collapsed = collapse_whitespace(raw);
                let items: Vec<String> = LIST_SPLIT_RE
                    .split(trim_trailing_punctuation(&collapsed))
                    .map(|item| LEADING_ARTICLE_RE.replace(item.trim(), "").to_string())
                    .map(|item| trim_trailing_punctuation(&item).to_string())
                    .filter(|item| !item.is_empty())
                    .collect();
                if items.is_empty() {
                    return Err(NormalizationError::Empty);
                }
                Ok(NormalizedValue::List(items))
            }
        }
    }

    /// Best partial reading of a raw value that `normalize_scaled` refused.
    ///
    /// Numbers fall back to their leading numeric run and dates are read without
    /// the fiscal window, so the validator can still apply its rules. Tickers and
    /// text have no partial reading.
    pub fn fallback(&self, raw: &str, kind: ValueKind, statement_scale: Option<Scale>) -> Option<NormalizedValue> {
        let trimmed = raw.trim();
        match kind {
            ValueKind::Currency => {
                let number = leading_number(trimmed)?;
                let scale = TRAILING_SUFFIX_RE
                    .captures(trimmed)
                    .and_then(|c| Scale::from_suffix(&c["suffix"]))
                    .or(statement_scale);
                let mut amount = number * scale.map(Scale::multiplier).unwrap_or(1.0);
                if starts_negative(trimmed) {
                    amount = -amount;
                }
                Some(NormalizedValue::Currency {
                    amount,
                    display: format_currency(amount),
                })
            }
            ValueKind::Percentage => {
                let number = leading_number(trimmed)?;
                let percent = if starts_negative(trimmed) { -number } else { number };
                Some(NormalizedValue::Percentage { percent })
            }
            ValueKind::Count => {
                let number = leading_number(trimmed)?;
                let n = number.trunc() as i64;
                Some(NormalizedValue::Count(if starts_negative(trimmed) { -n } else { n }))
            }
            ValueKind::Date => FieldNormalizer::new(FiscalWindow::UNBOUNDED)
                .normalize_date(trimmed)
                .ok()
                .map(NormalizedValue::Date),
            ValueKind::Ticker | ValueKind::Text | ValueKind::List => None,
        }
    }

    fn normalize_date(&self, raw: &str) -> Result<FiscalDate, NormalizationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NormalizationError::Empty);
        }

        for shape in DATE_SHAPES.iter() {
            let Some(caps) = shape.captures(trimmed) else {
                continue;
            };
            let Some(year) = caps.name("year").and_then(|y| y.as_str().parse::<i32>().ok()) else {
                continue;
            };
            let month = caps
                .name("month")
                .and_then(|m| month_from_name(m.as_str()))
                .or_else(|| caps.name("mnum").and_then(|m| m.as_str().parse().ok()));
            let day = caps.name("day").and_then(|d| d.as_str().parse::<u32>().ok());

            // An impossible calendar date falls through to a less specific shape
            if let (Some(m), Some(d)) = (month, day) {
                if NaiveDate::from_ymd_opt(year, m, d).is_none() {
                    continue;
                }
            }

            if !self.window.contains(year) {
                return Err(NormalizationError::YearOutOfRange {
                    year,
                    earliest: self.window.earliest,
                    latest: self.window.latest,
                });
            }
            return Ok(FiscalDate { year, month, day: month.and(day) });
        }

        Err(NormalizationError::UnrecognizedDate(raw.to_string()))
    }
}

fn leading_number(raw: &str) -> Option<f64> {
    LEADING_NUMBER_RE
        .find(raw)
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

fn starts_negative(raw: &str) -> bool {
    raw.starts_with(|c: char| matches!(c, '(' | '-' | '−'))
}

fn normalize_percentage(raw: &str) -> Result<NormalizedValue, NormalizationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NormalizationError::Empty);
    }
    let caps = PERCENT_RE
        .captures(trimmed)
        .ok_or_else(|| NormalizationError::NotNumeric(raw.to_string()))?;
    let mut percent: f64 = caps["num"]
        .parse()
        .map_err(|_| NormalizationError::NotNumeric(raw.to_string()))?;
    if matches!(caps.name("sign").map(|s| s.as_str()), Some("-") | Some("−")) {
        percent = -percent;
    }
    if !(-100.0..=1000.0).contains(&percent) {
        return Err(NormalizationError::PercentageOutOfRange(percent));
    }
    Ok(NormalizedValue::Percentage { percent })
}

fn normalize_ticker(raw: &str) -> Result<NormalizedValue, NormalizationError> {
    let symbol = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '(' | ')'));
    if symbol.is_empty() {
        return Err(NormalizationError::Empty);
    }
    if !TICKER_RE.is_match(symbol) {
        return Err(NormalizationError::InvalidTicker(raw.to_string()));
    }
    Ok(NormalizedValue::Ticker(symbol.to_ascii_uppercase()))
}

fn normalize_count(raw: &str) -> Result<NormalizedValue, NormalizationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NormalizationError::Empty);
    }
    let caps = COUNT_RE
        .captures(trimmed)
        .ok_or_else(|| NormalizationError::NotNumeric(raw.to_string()))?;
    let mut n: i64 = caps["num"]
        .replace(',', "")
        .parse()
        .map_err(|_| NormalizationError::NotNumeric(raw.to_string()))?;
    if caps.name("neg").is_some() {
        n = -n;
    }
    Ok(NormalizedValue::Count(n))
}
