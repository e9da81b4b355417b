//! Research API client for PubMed E-utilities and ClinicalTrials.gov.
//!
//! One pooled reqwest client serves both upstreams. Transient failures are
//! retried by middleware; successful bodies are cached by request so repeated
//! lookups inside a session skip the network.
//!
//! Response bodies are returned as raw JSON; callers decide what to keep.
//! Upstream throttling happens in the governance layer.

use std::time::Duration;

use moka::future::Cache;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::Value;

use crate::config::{Config, api};
use crate::error::{ClientError, ClientResult};

/// Client for the biomedical research APIs.
#[derive(Clone)]
pub struct ResearchClient {
    /// HTTP client with middleware.
    client: ClientWithMiddleware,

    /// Response cache.
    cache: Cache<String, Value>,

    /// NCBI API key (optional).
    ncbi_api_key: Option<String>,

    /// E-utilities base URL.
    pubmed_api_url: String,

    /// ClinicalTrials.gov base URL.
    clinical_trials_api_url: String,

    /// Per-request timeout, reported in [`ClientError::Timeout`].
    request_timeout: Duration,
}

impl ResearchClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, reqwest::header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("biomed-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(api::MAX_KEEPALIVE)
            .pool_idle_timeout(api::KEEPALIVE_EXPIRY)
            .gzip(true)
            .build()?;

        // NCBI throttles per second, so short backoffs recover quickly.
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(500), Duration::from_secs(10))
            .build_with_max_retries(api::MAX_RETRIES);

        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let cache = Cache::builder()
            .max_capacity(config.cache_max_size)
            .time_to_live(config.cache_ttl)
            .build();

        Ok(Self {
            client,
            cache,
            ncbi_api_key: config.ncbi_api_key.clone(),
            pubmed_api_url: config.pubmed_api_url.trim_end_matches('/').to_string(),
            clinical_trials_api_url: config.clinical_trials_api_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    /// Check if an NCBI API key is configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.ncbi_api_key.is_some()
    }

    /// PubMed keyword search (`esearch`).
    ///
    /// # Errors
    ///
    /// Returns error on API failure.
    pub async fn pubmed_search(&self, query: &str, limit: u32, sort: Option<&str>) -> ClientResult<(Value, bool)> {
        let url = format!("{}/esearch.fcgi", self.pubmed_api_url);
        let mut params = self.eutils_params();
        params.push(("term".to_string(), query.to_string()));
        params.push(("retmax".to_string(), limit.to_string()));
        if let Some(sort) = sort {
            params.push(("sort".to_string(), sort.to_string()));
        }

        self.get_json(&url, &params).await
    }

    /// PubMed document summaries (`esummary`).
    ///
    /// # Errors
    ///
    /// Returns error on API failure.
    pub async fn pubmed_summary(&self, pmids: &[String]) -> ClientResult<(Value, bool)> {
        let url = format!("{}/esummary.fcgi", self.pubmed_api_url);
        let mut params = self.eutils_params();
        params.push(("id".to_string(), pmids.join(",")));

        self.get_json(&url, &params).await
    }

    /// ClinicalTrials.gov study search.
    ///
    /// # Errors
    ///
    /// Returns error on API failure.
    pub async fn search_trials(&self, query: &str, limit: u32, status: Option<&str>) -> ClientResult<(Value, bool)> {
        let url = format!("{}/studies", self.clinical_trials_api_url);
        let mut params = vec![
            ("query.term".to_string(), query.to_string()),
            ("pageSize".to_string(), limit.to_string()),
            ("format".to_string(), "json".to_string()),
        ];
        if let Some(status) = status {
            params.push(("filter.overallStatus".to_string(), status.to_string()));
        }

        self.get_json(&url, &params).await
    }

    /// GET `url` and return the JSON body plus whether it came from cache.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-success status or invalid JSON.
    pub async fn get_json(&self, url: &str, params: &[(String, String)]) -> ClientResult<(Value, bool)> {
        let cache_key = cache_key(url, params);
        if let Some(cached) = self.cache.get(&cache_key).await {
            tracing::trace!(url, "Cache hit");
            return Ok((cached, true));
        }

        let response = self.client.get(url).query(params).send().await.map_err(|e| match e {
            reqwest_middleware::Error::Reqwest(e) => self.transport_error(e),
            other => ClientError::Middleware(other),
        })?;
        let response = check_status(response).await?;
        let value: Value = response.json().await.map_err(|e| self.transport_error(e))?;

        self.cache.insert(cache_key, value.clone()).await;
        Ok((value, false))
    }

    /// Reqwest reports timeouts as ordinary transport errors.
    fn transport_error(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            tracing::warn!(timeout_ms = self.request_timeout.as_millis() as u64, "Upstream request timed out");
            ClientError::Timeout(self.request_timeout)
        } else {
            ClientError::Http(err)
        }
    }

    fn eutils_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("db".to_string(), "pubmed".to_string()),
            ("retmode".to_string(), "json".to_string()),
        ];
        if let Some(key) = &self.ncbi_api_key {
            params.push(("api_key".to_string(), key.clone()));
        }
        params
    }
}

/// Map a non-success upstream status onto a [`ClientError`].
async fn check_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(api::DEFAULT_RETRY_AFTER_SECS);
        return Err(ClientError::rate_limited(retry_after));
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        404 => ClientError::not_found(body),
        400 => ClientError::bad_request(body),
        code @ 500..=599 => ClientError::server(code, body),
        code => ClientError::UnexpectedStatus { status: code, message: body },
    })
}

/// MD5 of the URL and query, ignoring the API key so keyed and anonymous
/// requests share entries.
fn cache_key(url: &str, params: &[(String, String)]) -> String {
    use md5::{Digest, Md5};

    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    for (k, v) in params.iter().filter(|(k, _)| k != "api_key") {
        hasher.update(b"\0");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

impl std::fmt::Debug for ResearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchClient").field("has_api_key", &self.has_api_key()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn test_cache_key_ignores_api_key() {
        let url = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
        let anonymous = cache_key(url, &params(&[("term", "asthma")]));
        let keyed = cache_key(url, &params(&[("term", "asthma"), ("api_key", "secret")]));
        assert_eq!(anonymous, keyed);
        assert_ne!(anonymous, cache_key(url, &params(&[("term", "copd")])));
    }

    #[test]
    fn test_cache_key_separates_fields() {
        let url = "https://clinicaltrials.gov/api/v2/studies";
        let a = cache_key(url, &params(&[("query.term", "ab"), ("pageSize", "1")]));
        let b = cache_key(url, &params(&[("query.term", "a"), ("bpageSize", "1")]));
        assert_ne!(a, b);
    }
}
