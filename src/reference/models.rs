// src/reference/models.rs
use serde::{Deserialize, Serialize};

/// Authoritative figures for one listed company.
///
/// Example: `{"symbol": "BLBD", "marketCap": 1.1e9, "revenue": 1.13e9}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceQuote {
    pub symbol: String,
    #[serde(default, alias = "marketCap")]
    pub market_cap: Option<f64>,
    #[serde(default, alias = "totalRevenue")]
    pub revenue: Option<f64>,
    #[serde(default, alias = "netIncome")]
    pub net_income: Option<f64>,
    #[serde(default, alias = "totalAssets")]
    pub total_assets: Option<f64>,
    #[serde(default, alias = "fullTimeEmployees")]
    pub employees: Option<f64>,
}

impl ReferenceQuote {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            market_cap: None,
            revenue: None,
            net_income: None,
            total_assets: None,
            employees: None,
        }
    }
}
