//! Rate-limited JSON HTTP client shared by the PubChem, ChEMBL and
//! Cellosaurus backends.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::rate_limiter::FileBasedRateLimiter;

pub const PUBCHEM_BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";
pub const PUBCHEM_VIEW_BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug_view";
pub const CHEMBL_BASE_URL: &str = "https://www.ebi.ac.uk/chembl/api/data";
pub const CELLOSAURUS_BASE_URL: &str = "https://api.cellosaurus.org";

const TIMEOUT: Duration = Duration::from_secs(30);
const NETWORK_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Query parameters as ordered key/value pairs.
pub type Params = Vec<(String, String)>;

/// Build a [`Params`] list from string pairs.
pub fn params<K: ToString, V: ToString>(pairs: &[(K, V)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Anything that can answer a GET with a JSON document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JsonApi: Send + Sync {
    /// GET `endpoint` (relative to the base URL, or absolute) with query `params`.
    async fn get_json(&self, endpoint: &str, params: Params) -> Result<Value>;
}

/// Which statuses are retried, and how many times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_statuses: Vec<u16>,
    /// Upper bound on a server-requested `Retry-After` pause
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// One gentle retry on 429/503.
    pub fn gentle() -> Self {
        Self {
            max_retries: 1,
            retry_statuses: vec![429, 503],
            max_wait: Duration::from_secs(30),
        }
    }

    /// Up to three retries on throttling and 5xx gateway errors.
    pub fn persistent() -> Self {
        Self {
            max_retries: 3,
            retry_statuses: vec![429, 500, 502, 503, 504],
            max_wait: Duration::from_secs(60),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_statuses: Vec::new(),
            max_wait: Duration::ZERO,
        }
    }
}

/// `reqwest`-backed [`JsonApi`] with optional rate limiting and retry.
pub struct ApiClient {
    http: Client,
    base_url: String,
    rate_limiter: Option<FileBasedRateLimiter>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| Error::InvalidArgument(format!("user agent: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: None,
            retry: RetryPolicy::none(),
        })
    }

    pub fn with_rate_limiter(mut self, limiter: FileBasedRateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// PubChem PUG REST client.
    pub fn pubchem(config: &Config) -> Result<Self> {
        Self::preset(config, "pubchem", PUBCHEM_BASE_URL, "PubChem-Tools/1.0.0")
            .map(|c| c.with_retry(RetryPolicy::gentle()))
    }

    /// ChEMBL web services client.
    pub fn chembl(config: &Config) -> Result<Self> {
        Self::preset(config, "chembl", CHEMBL_BASE_URL, "ChEMBL-Tools/1.0.0")
            .map(|c| c.with_retry(RetryPolicy::gentle()))
    }

    /// Cellosaurus API client.
    pub fn cellosaurus(config: &Config) -> Result<Self> {
        Self::preset(
            config,
            "cellosaurus",
            CELLOSAURUS_BASE_URL,
            "Cellosaurus-Tools/1.0.0",
        )
        .map(|c| c.with_retry(RetryPolicy::persistent()))
    }

    fn preset(config: &Config, service: &str, base_url: &str, user_agent: &str) -> Result<Self> {
        let limiter = FileBasedRateLimiter::from_config(service, &config.rate_limit(service))?;
        Ok(Self::new(base_url, user_agent)?.with_rate_limiter(limiter))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Resolve an endpoint against the base URL; absolute URLs pass through.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.rate_limiter {
            if let Err(e) = limiter.acquire().await {
                warn!(base_url = %self.base_url, error = %e, "rate limiter failed, continuing");
            }
        }
    }
}

#[async_trait]
impl JsonApi for ApiClient {
    async fn get_json(&self, endpoint: &str, params: Params) -> Result<Value> {
        let url = self.url_for(endpoint);
        let mut attempt: u32 = 0;

        loop {
            self.throttle().await;
            debug!(url = %url, attempt, "GET");

            let response = match self.http.get(&url).query(&params).send().await {
                Ok(response) => response,
                Err(e) if attempt < self.retry.max_retries => {
                    warn!(url = %url, attempt, error = %e, "request failed, retrying");
                    tokio::time::sleep(NETWORK_RETRY_PAUSE).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if self.retry.retry_statuses.contains(&status.as_u16())
                && attempt < self.retry.max_retries
            {
                let delay = retry_after_delay(response.headers(), self.retry.max_wait);
                warn!(url = %url, status = status.as_u16(), ?delay, "retryable status");
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                continue;
            }

            let body = response.text().await?;
            if !status.is_success() {
                return Err(Error::api(status.as_u16(), &body));
            }
            return Ok(serde_json::from_str(&body)?);
        }
    }
}

/// Delay requested by a `Retry-After` header, in seconds, capped at `max_wait`.
///
/// A non-numeric value (e.g. an HTTP date) maps to a one second pause.
pub fn retry_after_delay(headers: &HeaderMap, max_wait: Duration) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().unwrap_or("").trim();
    let delay = match raw.parse::<f64>() {
        Ok(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).unwrap_or(max_wait),
        Ok(_) => return None,
        Err(_) => Duration::from_secs(1),
    };
    Some(delay.min(max_wait))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(60);

    fn headers_with(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn test_retry_after_numeric() {
        assert_eq!(
            retry_after_delay(&headers_with("2"), WAIT),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            retry_after_delay(&headers_with("0.5"), WAIT),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_retry_after_zero_or_missing() {
        assert_eq!(retry_after_delay(&headers_with("0"), WAIT), None);
        assert_eq!(retry_after_delay(&HeaderMap::new(), WAIT), None);
    }

    #[test]
    fn test_retry_after_is_capped() {
        assert_eq!(retry_after_delay(&headers_with("1e20"), WAIT), Some(WAIT));
        assert_eq!(retry_after_delay(&headers_with("inf"), WAIT), Some(WAIT));
        assert_eq!(retry_after_delay(&headers_with("3600"), WAIT), Some(WAIT));
        assert_eq!(retry_after_delay(&headers_with("NaN"), WAIT), None);
        assert_eq!(retry_after_delay(&headers_with("5"), Duration::ZERO), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_http_date() {
        assert_eq!(
            retry_after_delay(&headers_with("Wed, 21 Oct 2015 07:28:00 GMT"), WAIT),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_url_for() {
        let client = ApiClient::new("https://api.example.org/", "test/1.0").unwrap();
        assert_eq!(client.base_url(), "https://api.example.org");
        assert_eq!(
            client.url_for("/compound/name/aspirin/cids/JSON"),
            "https://api.example.org/compound/name/aspirin/cids/JSON"
        );
        assert_eq!(client.url_for("molecule.json"), "https://api.example.org/molecule.json");
        assert_eq!(
            client.url_for("https://other.example.org/x"),
            "https://other.example.org/x"
        );
    }

    #[test]
    fn test_presets() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        for service in ["pubchem", "chembl", "cellosaurus"] {
            let mut rl = config.rate_limit(service);
            rl.state_dir = Some(dir.path().to_path_buf());
            config.rate_limits.insert(service.to_string(), rl);
        }

        let pubchem = ApiClient::pubchem(&config).unwrap();
        assert_eq!(pubchem.base_url(), PUBCHEM_BASE_URL);
        assert_eq!(pubchem.retry_policy(), &RetryPolicy::gentle());

        let chembl = ApiClient::chembl(&config).unwrap();
        assert_eq!(chembl.base_url(), CHEMBL_BASE_URL);

        let cello = ApiClient::cellosaurus(&config).unwrap();
        assert_eq!(cello.retry_policy().max_retries, 3);
        assert!(cello.retry_policy().retry_statuses.contains(&502));
    }

    #[test]
    fn test_params_helper() {
        let p = params(&[("MaxRecords", "5"), ("Threshold", "90")]);
        assert_eq!(p[0], ("MaxRecords".to_string(), "5".to_string()));
        assert_eq!(p.len(), 2);
    }
}
