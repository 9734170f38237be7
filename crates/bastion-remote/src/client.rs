//! HTTP client for the filter metadata service.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bastion_core::{FilterId, FilterMetadata, Metadata, RemoteMetadataClient};
use tracing::{debug, info};

use crate::error::{RemoteError, Result};

/// Default metadata document location.
pub const DEFAULT_METADATA_URL: &str = "https://filters.bastion.dev/filters.json";

/// Default rules location; `{filter_id}` is substituted per request.
pub const DEFAULT_RULES_URL: &str = "https://filters.bastion.dev/filters/{filter_id}.txt";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Endpoints and local paths used by [`HttpMetadataClient`].
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub metadata_url: String,
    /// Template containing `{filter_id}`.
    pub rules_url: String,
    /// Metadata snapshot written by the lifecycle manager.
    pub local_metadata_path: PathBuf,
    pub request_timeout: Duration,
}

impl RemoteConfig {
    /// Default endpoints with the given snapshot path.
    pub fn new(local_metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            rules_url: DEFAULT_RULES_URL.to_string(),
            local_metadata_path: local_metadata_path.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Rules url for one filter.
    pub fn rules_url_for(&self, filter_id: FilterId) -> String {
        self.rules_url.replace("{filter_id}", &filter_id.to_string())
    }
}

/// Builds the shared HTTP client.
pub(crate) fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(format!("Bastion/{}", env!("CARGO_PKG_VERSION")))
        .timeout(request_timeout)
        .build()?;
    Ok(client)
}

/// GETs `url` and returns the body as text.
pub(crate) async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    debug!("Fetching {}", url);
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(RemoteError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    Ok(response.text().await?)
}

/// Splits a rule body into lines, dropping trailing blank lines.
pub fn split_rules(body: &str) -> Vec<String> {
    let mut rules: Vec<String> = body.lines().map(str::to_string).collect();
    while rules.last().is_some_and(|line| line.trim().is_empty()) {
        rules.pop();
    }
    rules
}

/// [`RemoteMetadataClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetadataClient {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpMetadataClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = build_http_client(config.request_timeout)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    async fn fetch_metadata(&self) -> Result<Metadata> {
        let body = fetch_text(&self.client, &self.config.metadata_url).await?;
        if body.trim().is_empty() {
            return Err(RemoteError::EmptyBody(self.config.metadata_url.clone()));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_rules(&self, filter_id: FilterId) -> Result<Vec<String>> {
        let url = self.config.rules_url_for(filter_id);
        let body = fetch_text(&self.client, &url).await?;

        let rules = split_rules(&body);
        if rules.is_empty() {
            return Err(RemoteError::EmptyBody(url));
        }
        Ok(rules)
    }

    async fn read_local_metadata(&self) -> Result<Metadata> {
        let path = &self.config.local_metadata_path;
        match tokio::fs::read_to_string(path).await {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No local metadata at {:?}, starting empty", path);
                Ok(Metadata::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RemoteMetadataClient for HttpMetadataClient {
    async fn load_filters_metadata(
        &self,
        filter_ids: &[FilterId],
    ) -> bastion_core::Result<Vec<FilterMetadata>> {
        let metadata = self.fetch_metadata().await?;
        Ok(metadata
            .filters
            .into_iter()
            .filter(|f| filter_ids.contains(&f.filter_id))
            .collect())
    }

    async fn load_filter_rules(&self, filter_id: FilterId) -> bastion_core::Result<Vec<String>> {
        Ok(self.fetch_rules(filter_id).await?)
    }

    async fn load_local_metadata(&self) -> bastion_core::Result<Metadata> {
        Ok(self.read_local_metadata().await?)
    }

    async fn load_remote_metadata(&self) -> bastion_core::Result<Metadata> {
        Ok(self.fetch_metadata().await?)
    }
}
