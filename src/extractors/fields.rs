// src/extractors/fields.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// The canonical value shape a field normalizes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Currency,
    Percentage,
    Date,
    Ticker,
    Text,
    List,
    Count,
}

/// The fixed set of semantic fields the pipeline extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CompanyName,
    CompanyAddress,
    StockSymbol,
    FiscalYear,
    Revenue,
    NetIncome,
    TotalAssets,
    TotalLiabilities,
    NetMargin,
    OperatingMargin,
    PrimaryBusiness,
    GeographicMarkets,
    Industry,
    KeyProducts,
    MarketCap,
    ShareholdersEquity,
    OperatingCashFlow,
    Eps,
    GrossMargin,
    Employees,
}

/// Static description of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDefinition {
    pub field: Field,
    pub value_kind: ValueKind,
    /// Required fields are the tracked core set used for completeness.
    pub required: bool,
}

/// Per-field acceptance and weighting rules, read by the Validator and Consolidator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    /// Extra weight per additional distinct document agreeing on a value.
    pub corroboration_bonus: f64,
    /// Minimum whitespace token count for text and list values.
    pub min_tokens: usize,
    pub allow_negative: bool,
    /// Upper bound on the absolute numeric value.
    pub max_magnitude: Option<f64>,
    /// Text must read like "City, State".
    pub requires_locality: bool,
    /// Text must contain at least one of these (case-insensitive); empty means no requirement.
    pub required_keywords: &'static [&'static str],
    /// Unsuffixed amounts take the page's "(in thousands)" style scale.
    pub statement_scaled: bool,
}

const BUSINESS_KEYWORDS: &[&str] = &[
    "platform", "software", "technology", "digital", "advertising", "measurement",
    "analytics", "verification", "designer", "manufacturer", "manufactures", "provider",
    "provides", "operates", "develops", "offers", "services", "independent", "leader",
    "leading", "school bus", "buses", "products",
];

const GEOGRAPHIC_KEYWORDS: &[&str] = &[
    "united states", "u.s.", "canada", "mexico", "north america", "south america",
    "latin america", "europe", "asia", "pacific", "middle east", "africa", "international",
    "global", "worldwide", "countries", "markets", "regions",
];

const BALANCE_SHEET_MAX: f64 = 1.0e13;

impl FieldRule {
    const fn money(allow_negative: bool) -> Self {
        Self {
            corroboration_bonus: 0.35,
            min_tokens: 0,
            allow_negative,
            max_magnitude: Some(BALANCE_SHEET_MAX),
            requires_locality: false,
            required_keywords: &[],
            statement_scaled: true,
        }
    }

    const fn ratio() -> Self {
        Self {
            corroboration_bonus: 0.35,
            min_tokens: 0,
            allow_negative: true,
            max_magnitude: None,
            requires_locality: false,
            required_keywords: &[],
            statement_scaled: false,
        }
    }

    const fn text(min_tokens: usize, required_keywords: &'static [&'static str]) -> Self {
        Self {
            corroboration_bonus: 0.5,
            min_tokens,
            allow_negative: false,
            max_magnitude: None,
            requires_locality: false,
            required_keywords,
            statement_scaled: false,
        }
    }
}

impl Field {
    pub const ALL: [Field; 20] = [
        Field::CompanyName,
        Field::CompanyAddress,
        Field::StockSymbol,
        Field::FiscalYear,
        Field::Revenue,
        Field::NetIncome,
        Field::TotalAssets,
        Field::TotalLiabilities,
        Field::NetMargin,
        Field::OperatingMargin,
        Field::PrimaryBusiness,
        Field::GeographicMarkets,
        Field::Industry,
        Field::KeyProducts,
        Field::MarketCap,
        Field::ShareholdersEquity,
        Field::OperatingCashFlow,
        Field::Eps,
        Field::GrossMargin,
        Field::Employees,
    ];

    /// The tracked core fields, in declaration order.
    pub fn tracked() -> impl Iterator<Item = Field> {
        Self::ALL.into_iter().filter(|f| f.definition().required)
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::CompanyName => "company_name",
            Field::CompanyAddress => "company_address",
            Field::StockSymbol => "stock_symbol",
            Field::FiscalYear => "fiscal_year",
            Field::Revenue => "revenue",
            Field::NetIncome => "net_income",
            Field::TotalAssets => "total_assets",
            Field::TotalLiabilities => "total_liabilities",
            Field::NetMargin => "net_margin",
            Field::OperatingMargin => "operating_margin",
            Field::PrimaryBusiness => "primary_business",
            Field::GeographicMarkets => "geographic_markets",
            Field::Industry => "industry",
            Field::KeyProducts => "key_products",
            Field::MarketCap => "market_cap",
            Field::ShareholdersEquity => "shareholders_equity",
            Field::OperatingCashFlow => "operating_cash_flow",
            Field::Eps => "eps",
            Field::GrossMargin => "gross_margin",
            Field::Employees => "employees",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn definition(self) -> FieldDefinition {
        use ValueKind::*;
        let (value_kind, required) = match self {
            Field::CompanyName => (Text, true),
            Field::CompanyAddress => (Text, true),
            Field::StockSymbol => (Ticker, true),
            Field::FiscalYear => (Date, true),
            Field::Revenue => (Currency, true),
            Field::NetIncome => (Currency, true),
            Field::TotalAssets => (Currency, true),
            Field::TotalLiabilities => (Currency, true),
            Field::NetMargin => (Percentage, true),
            Field::OperatingMargin => (Percentage, true),
            Field::PrimaryBusiness => (Text, true),
            Field::GeographicMarkets => (List, true),
            Field::Industry => (Text, false),
            Field::KeyProducts => (List, false),
            Field::MarketCap => (Currency, false),
            Field::ShareholdersEquity => (Currency, false),
            Field::OperatingCashFlow => (Currency, false),
            Field::Eps => (Currency, false),
            Field::GrossMargin => (Percentage, false),
            Field::Employees => (Count, false),
        };
        FieldDefinition { field: self, value_kind, required }
    }

    pub fn kind(self) -> ValueKind {
        self.definition().value_kind
    }

    pub fn rule(self) -> FieldRule {
        match self {
            Field::CompanyName => FieldRule::text(2, &[]),
            Field::CompanyAddress => FieldRule {
                requires_locality: true,
                ..FieldRule::text(2, &[])
            },
            Field::StockSymbol => FieldRule {
                corroboration_bonus: 0.4,
                ..FieldRule::text(0, &[])
            },
            Field::FiscalYear => FieldRule {
                corroboration_bonus: 0.4,
                ..FieldRule::text(0, &[])
            },
            Field::PrimaryBusiness => FieldRule::text(4, BUSINESS_KEYWORDS),
            Field::Industry => FieldRule::text(2, &[]),
            Field::GeographicMarkets => FieldRule::text(1, GEOGRAPHIC_KEYWORDS),
            Field::KeyProducts => FieldRule::text(2, &[]),
            Field::Revenue | Field::TotalAssets | Field::TotalLiabilities | Field::MarketCap => {
                FieldRule::money(false)
            }
            Field::NetIncome | Field::ShareholdersEquity | Field::OperatingCashFlow => {
                FieldRule::money(true)
            }
            // Per-share amounts are never in thousands
            Field::Eps => FieldRule {
                max_magnitude: Some(10_000.0),
                statement_scaled: false,
                ..FieldRule::money(true)
            },
            Field::NetMargin | Field::OperatingMargin | Field::GrossMargin => FieldRule::ratio(),
            Field::Employees => FieldRule {
                max_magnitude: Some(5_000_000.0),
                statement_scaled: false,
                ..FieldRule::money(false)
            },
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_twelve_core_fields() {
        let tracked: Vec<Field> = Field::tracked().collect();
        assert_eq!(tracked.len(), 12);
        assert_eq!(tracked.first(), Some(&Field::CompanyName));
        assert_eq!(tracked.last(), Some(&Field::GeographicMarkets));
        assert!(!tracked.contains(&Field::Employees));
    }

    #[test]
    fn names_round_trip_through_serde() {
        for field in Field::ALL {
            assert_eq!(Field::from_name(field.name()), Some(field));
            let json = serde_json::to_string(&field).unwrap();
            assert_eq!(json, format!("\"{}\"", field.name()));
        }
    }

    #[test]
    fn rule_table_encodes_sign_policy() {
        assert!(!Field::TotalLiabilities.rule().allow_negative);
        assert!(Field::NetIncome.rule().allow_negative);
        assert!(!Field::Employees.rule().allow_negative);
        assert!(Field::CompanyAddress.rule().requires_locality);
        assert!(Field::TotalAssets.rule().statement_scaled);
        assert!(!Field::Eps.rule().statement_scaled);
    }
}
