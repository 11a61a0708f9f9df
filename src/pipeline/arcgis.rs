//! ArcGIS feature service integration
//!
//! Downloads county features from a feature layer and sums population per state.
//!
//! ## API Reference
//!
//! Endpoint: `{layer_url}/query`
//!
//! Parameters sent on every page:
//! - `where=1=1`, `outFields=<configured>`, `returnGeometry=false`, `f=json`
//! - `resultOffset` / `resultRecordCount` for pagination
//!
//! Returns: `{ "features": [{ "attributes": {...} }], "exceededTransferLimit": bool? }`
//!
//! ## Pagination
//!
//! The offset advances by the number of features received. Paging stops on an
//! empty page, or on a short page that does not carry `exceededTransferLimit`.
//! Some services under-fill pages while more data remains and only say so via
//! the flag, so both conditions are needed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use statepop::pipeline::arcgis::{ArcGisCountiesClient, ArcGisSettings};
//!
//! let client = ArcGisCountiesClient::new(settings)?;
//! let totals = client.fetch_aggregated_totals(&cancel).await?;
//! ```

use super::aggregate::StateTotals;
use super::error::RefreshError;
use super::retry::ExponentialBackoff;
use super::types::ExternalPage;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_OUT_FIELDS: &str = "STATE_NAME,POPULATION";
pub const DEFAULT_STATE_FIELD: &str = "STATE_NAME";
pub const DEFAULT_POPULATION_FIELD: &str = "POPULATION";
pub const DEFAULT_PAGE_SIZE: u32 = 2000;

/// Upper bound for a single backoff wait
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// In-body error codes the service uses for missing or invalid tokens
const AUTH_ERROR_CODES: [i64; 4] = [401, 403, 498, 499];

/// Source of aggregated per-state population totals
#[async_trait]
pub trait PopulationSource: Send + Sync {
    /// Fetch every page and return totals keyed by state name, ordered by name
    async fn fetch_aggregated_totals(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, i64>, RefreshError>;
}

/// Feature layer connection settings
#[derive(Debug, Clone)]
pub struct ArcGisSettings {
    /// Feature layer URL, without the trailing `/query`
    pub layer_url: String,
    pub out_fields: String,
    pub state_field: String,
    pub population_field: String,
    /// Page size (`resultRecordCount`)
    pub max_record_count: u32,
    /// Per-request timeout covering connect, headers and body
    pub request_timeout: Duration,
    /// Retries after the first attempt for transport-class failures
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub user_agent: String,
}

impl Default for ArcGisSettings {
    fn default() -> Self {
        Self {
            layer_url: String::new(),
            out_fields: DEFAULT_OUT_FIELDS.to_string(),
            state_field: DEFAULT_STATE_FIELD.to_string(),
            population_field: DEFAULT_POPULATION_FIELD.to_string(),
            max_record_count: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            user_agent: format!("statepop/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Outcome of one failed request attempt
enum AttemptError {
    Retryable(RefreshError),
    Fatal(RefreshError),
}

/// Paginated county query client
pub struct ArcGisCountiesClient {
    http: reqwest::Client,
    settings: ArcGisSettings,
}

impl ArcGisCountiesClient {
    pub fn new(settings: ArcGisSettings) -> Result<Self, RefreshError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| RefreshError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { http, settings })
    }

    fn page_size(&self) -> u32 {
        if self.settings.max_record_count == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.settings.max_record_count
        }
    }

    fn out_fields(&self) -> &str {
        let fields = self.settings.out_fields.trim();
        if fields.is_empty() {
            DEFAULT_OUT_FIELDS
        } else {
            fields
        }
    }

    /// `{layer_url}/query`
    pub fn query_url(&self) -> Result<Url, RefreshError> {
        let layer = self.settings.layer_url.trim();
        if layer.is_empty() {
            return Err(RefreshError::Configuration(
                "feature layer URL is missing".to_string(),
            ));
        }

        let mut url = Url::parse(layer)
            .map_err(|e| RefreshError::Configuration(format!("invalid layer URL '{}': {}", layer, e)))?;
        url.path_segments_mut()
            .map_err(|_| RefreshError::Configuration(format!("layer URL '{}' has no path", layer)))?
            .pop_if_empty()
            .push("query");
        Ok(url)
    }

    /// Query URL for the page starting at `offset`
    pub fn page_url(&self, query_url: &Url, offset: u64) -> Url {
        let mut url = query_url.clone();
        url.query_pairs_mut()
            .append_pair("where", "1=1")
            .append_pair("outFields", self.out_fields())
            .append_pair("returnGeometry", "false")
            .append_pair("f", "json")
            .append_pair("resultOffset", &offset.to_string())
            .append_pair("resultRecordCount", &self.page_size().to_string());
        url
    }

    /// Fetch one page, retrying transport-class failures with backoff
    pub async fn fetch_page(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<ExternalPage, RefreshError> {
        let mut backoff = ExponentialBackoff::new(
            self.settings.retry_base_delay,
            MAX_RETRY_DELAY,
            self.settings.max_retries,
        );

        loop {
            match self.send_once(url, cancel).await {
                Ok(page) => return Ok(page),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) => {
                    if backoff.is_exhausted() {
                        log::error!(
                            "❌ Feature service request failed after {} retries: {}",
                            backoff.attempts_used(),
                            e
                        );
                        return Err(e);
                    }
                    log::warn!("⚠️  Feature service request failed: {}", e);
                    backoff.sleep(cancel).await?;
                }
            }
        }
    }

    async fn send_once(&self, url: &Url, cancel: &CancellationToken) -> Result<ExternalPage, AttemptError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AttemptError::Fatal(RefreshError::Cancelled)),
            result = self.request(url) => result,
        }
    }

    async fn request(&self, url: &Url) -> Result<ExternalPage, AttemptError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            return Err(AttemptError::Fatal(RefreshError::Auth(format!(
                "feature service returned {} (the layer may require a token)",
                status
            ))));
        }
        if is_retryable_status(status) {
            return Err(AttemptError::Retryable(RefreshError::Transport(format!(
                "feature service returned {}",
                status
            ))));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(RefreshError::Transport(format!(
                "feature service returned unexpected status {}",
                status
            ))));
        }

        let body = response.bytes().await.map_err(classify_send_error)?;
        decode_page(&body).map_err(AttemptError::Fatal)
    }
}

#[async_trait]
impl PopulationSource for ArcGisCountiesClient {
    async fn fetch_aggregated_totals(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, i64>, RefreshError> {
        let query_url = self.query_url()?;
        let page_size = self.page_size() as usize;
        let state_field = self.settings.state_field.as_str();
        let population_field = self.settings.population_field.as_str();

        let mut totals = StateTotals::new();
        let mut offset: u64 = 0;
        let mut pages = 0u32;
        let mut skipped = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(RefreshError::Cancelled);
            }

            let url = self.page_url(&query_url, offset);
            let page = self.fetch_page(&url, cancel).await?;
            pages += 1;

            let count = page.features.len();
            for feature in &page.features {
                if !totals.add_feature(feature, state_field, population_field) {
                    skipped += 1;
                }
            }

            log::debug!(
                "📄 Page {} (offset {}): {} features, exceededTransferLimit={}",
                pages,
                offset,
                count,
                page.exceeded_transfer_limit()
            );

            offset += count as u64;

            if is_last_page(count, page_size, page.exceeded_transfer_limit()) {
                break;
            }
        }

        log::info!(
            "📥 Fetched {} features in {} pages ({} states, {} skipped without state name)",
            offset,
            pages,
            totals.len(),
            skipped
        );

        Ok(totals.into_sorted())
    }
}

/// Paging stops on an empty page, or a short page without the transfer-limit flag
pub fn is_last_page(feature_count: usize, page_size: usize, exceeded_transfer_limit: bool) -> bool {
    feature_count == 0 || (feature_count < page_size && !exceeded_transfer_limit)
}

/// 5xx gateway family and 429 are worth retrying
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
    )
}

fn classify_send_error(err: reqwest::Error) -> AttemptError {
    if err.is_builder() {
        AttemptError::Fatal(RefreshError::Configuration(err.to_string()))
    } else if err.is_timeout() {
        AttemptError::Retryable(RefreshError::Transport(format!("request timed out: {}", err)))
    } else {
        AttemptError::Retryable(RefreshError::Transport(err.to_string()))
    }
}

/// Decode a response body, surfacing an embedded service error
pub fn decode_page(body: &[u8]) -> Result<ExternalPage, RefreshError> {
    let page: ExternalPage = serde_json::from_slice(body)?;

    if let Some(error) = &page.error {
        let message = error
            .message
            .clone()
            .unwrap_or_else(|| "unspecified service error".to_string());
        let detail = if error.details.is_empty() {
            message
        } else {
            format!("{} ({})", message, error.details.join("; "))
        };

        return Err(match error.code {
            Some(code) if AUTH_ERROR_CODES.contains(&code) => {
                RefreshError::Auth(format!("service error {}: {}", code, detail))
            }
            Some(code) => RefreshError::Protocol(format!("service error {}: {}", code, detail)),
            None => RefreshError::Protocol(format!("service error: {}", detail)),
        });
    }

    Ok(page)
}
