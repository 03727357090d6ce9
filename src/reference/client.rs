// src/reference/client.rs
use std::time::Duration;

use reqwest::header;

use crate::reference::models::ReferenceQuote;
use crate::reference::ReferenceDataAdapter;
use crate::utils::error::ReferenceError;

const REFERENCE_USER_AGENT: &str = "fact_extractor/0.1 (financial fact reconciliation)";

/// Creates a reqwest client configured for quote lookups.
fn build_reference_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(REFERENCE_USER_AGENT)
        .timeout(timeout)
        .build()
}

/// JSON quote endpoint: `GET {base_url}/quote/{SYMBOL}`.
#[derive(Debug, Clone)]
pub struct HttpReferenceAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReferenceAdapter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ReferenceError> {
        let client = build_reference_client(timeout)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn quote_url(&self, symbol: &str) -> String {
        format!("{}/quote/{}", self.base_url, symbol.to_uppercase())
    }
}

impl ReferenceDataAdapter for HttpReferenceAdapter {
    async fn lookup(&self, symbol: &str) -> Result<ReferenceQuote, ReferenceError> {
        let url = self.quote_url(symbol);
        tracing::info!("Fetching reference quote from: {}", url);

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("HTTP error status: {} for URL: {}", status, url);
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ReferenceError::NotFound(symbol.to_uppercase()));
            }
            return Err(ReferenceError::Http(status));
        }

        let body = response.text().await?;
        tracing::debug!("Received {} bytes from {}", body.len(), url);
        serde_json::from_str(&body).map_err(|e| ReferenceError::Parse(e.to_string()))
    }
}
