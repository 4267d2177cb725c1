//! HTTP evidence gateway client.
//!
//! Each instance fronts one provider kind. The gateway is queried with
//! `GET <endpoint>?q=<query>&count=<n>` and answers with a JSON array of
//! tagged `EvidenceRecord`s.

use super::EvidenceProvider;
use crate::config::EndpointConfig;
use crate::error::ProviderError;
use crate::research::sources::{EvidenceRecord, ProviderKind};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpEvidenceProvider {
    kind: ProviderKind,
    client: Client,
    endpoint: url::Url,
    api_key: Option<String>,
}

impl HttpEvidenceProvider {
    /// Create a client for `kind` from its endpoint configuration.
    ///
    /// The HTTP client timeout is set slightly above the fetcher's own
    /// per-provider timeout so the fetcher's deadline always fires first.
    pub fn new(
        kind: ProviderKind,
        config: &EndpointConfig,
        timeout_ms: u64,
    ) -> Result<Self, ProviderError> {
        let endpoint = url::Url::parse(&config.endpoint).map_err(|e| ProviderError::Request {
            provider: kind,
            message: format!("invalid endpoint '{}': {e}", config.endpoint),
        })?;
        let api_key = config
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok());

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms + 1_000))
            .build()
            .map_err(|e| ProviderError::Request {
                provider: kind,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            kind,
            client,
            endpoint,
            api_key,
        })
    }

    fn request_url(&self, query: &str, count: usize) -> url::Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("count", &count.to_string());
        url
    }
}

#[async_trait]
impl EvidenceProvider for HttpEvidenceProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch(&self, query: &str, count: usize) -> Result<Vec<EvidenceRecord>, ProviderError> {
        let url = self.request_url(query, count);
        debug!(provider = %self.kind, url = %url, "Fetching evidence");

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| ProviderError::Request {
            provider: self.kind,
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request {
                provider: self.kind,
                message: format!("HTTP {status}: {body}"),
            });
        }

        let records: Vec<EvidenceRecord> =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: self.kind,
                    message: e.to_string(),
                })?;

        let total = records.len();
        let mut matching: Vec<EvidenceRecord> =
            records.into_iter().filter(|r| r.kind() == self.kind).collect();
        if matching.len() < total {
            warn!(
                provider = %self.kind,
                dropped = total - matching.len(),
                "Gateway returned records of a different provider shape"
            );
        }
        matching.truncate(count);
        Ok(matching)
    }
}
