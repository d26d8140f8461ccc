use std::time::Duration;

use grantline_core::error::AppError;
use grantline_core::models::ScrapedGrant;
use grantline_core::traits::{Enricher, EnrichmentRequest};
use reqwest::Client;
use serde::Deserialize;

const DEFAULT_DATA_SERVICE_URL: &str = "http://localhost:8000";
const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the enrichment service lives and how to authenticate with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentConfig {
    pub base_url: String,
    pub service_token: Option<String>,
    pub timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DATA_SERVICE_URL.to_string(),
            service_token: None,
            timeout: DEFAULT_ENRICH_TIMEOUT,
        }
    }
}

impl EnrichmentConfig {
    /// Reads `DATA_SERVICE_URL` and `SERVICE_TOKEN` through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            base_url: non_empty("DATA_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_DATA_SERVICE_URL.to_string()),
            service_token: non_empty("SERVICE_TOKEN"),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Client for the data service's AI extraction endpoint.
#[derive(Clone)]
pub struct DataServiceEnricher {
    client: Client,
    endpoint: String,
    service_token: Option<String>,
    timeout_ms: u64,
}

impl DataServiceEnricher {
    pub fn new(config: EnrichmentConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/ia/extract", config.base_url.trim_end_matches('/')),
            service_token: config.service_token,
            timeout_ms: config.timeout.as_millis() as u64,
        })
    }
}

// ---- Data service API types ----

#[derive(Deserialize)]
struct ExtractResponse {
    data: Option<ExtractedGrant>,
}

#[derive(Deserialize)]
struct ExtractedGrant {
    title: Option<String>,
    description: Option<String>,
    amount: Option<f64>,
    deadline: Option<String>,
    url: Option<String>,
}

impl Enricher for DataServiceEnricher {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<Option<ScrapedGrant>, AppError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.service_token {
            builder = builder.header("X-Service-Token", token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_ms)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::EnrichmentError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EnrichmentError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let payload: ExtractResponse = response
            .json()
            .await
            .map_err(|e| AppError::EnrichmentError(format!("Failed to parse response: {e}")))?;

        let Some(data) = payload.data else {
            return Ok(None);
        };
        let (Some(title), Some(description)) = (data.title, data.description) else {
            return Ok(None);
        };

        let grant = ScrapedGrant {
            amount: data.amount,
            deadline: data.deadline,
            url: data.url.or_else(|| Some(request.url.clone())),
            ..ScrapedGrant::new(title, description)
        };
        Ok(grant.is_valid().then_some(grant))
    }
}
