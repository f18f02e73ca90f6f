//! GraphKB API client.
//!
//! The matching core only needs two capabilities from the knowledge base:
//!   - `query`: run a nested filter/target query and return every record
//!   - `request`: call any other endpoint (notation parsing, statement detail)
//!
//! API docs: https://graphkb-api.bcgsc.ca/api/spec
//! Auth: `POST /token` with username/password, then `Authorization: <token>`.

use async_trait::async_trait;
use genomatch_common::{GenomatchError, Result};
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::constants::{DEFAULT_GRAPHKB_URL, DEFAULT_QUERY_LIMIT};

/// Capabilities the matching pipeline needs from the knowledge base.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Run a query, following pagination until every record is returned.
    async fn query(&self, body: &Value) -> Result<Vec<Value>>;

    /// Call an endpoint directly. POST when a body is given, GET otherwise.
    async fn request(&self, path: &str, body: Option<&Value>) -> Result<Value>;

    /// Base URL of the knowledge-base instance (reported as `kbUrl`).
    fn url(&self) -> &str;

    /// Requests issued so far.
    fn request_count(&self) -> usize;
}

// ── HTTP implementation ─────────────────────────────────────────────────────

pub struct GraphKbClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
    page_size: usize,
    max_retries: u32,
    request_count: AtomicUsize,
}

impl GraphKbClient {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(120))
            .build()?;

        let base_url = base_url
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_GRAPHKB_URL)
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url)
            .map_err(|e| GenomatchError::Config(format!("invalid GraphKB url {base_url}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: None,
            page_size: DEFAULT_QUERY_LIMIT,
            max_retries: 3,
            request_count: AtomicUsize::new(0),
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Exchange credentials for an API token.
    #[instrument(skip(self, password))]
    pub async fn login(&mut self, username: &str, password: &SecretString) -> Result<()> {
        let body = json!({
            "username": username,
            "password": password.expose_secret(),
        });
        let response = self.send(Method::POST, "/token", Some(&body)).await?;
        let token = response
            .get("kbToken")
            .and_then(Value::as_str)
            .ok_or_else(|| GenomatchError::Api {
                status: 200,
                message: "login response is missing kbToken".to_string(),
            })?;
        self.token = Some(SecretString::from(token.to_string()));
        info!(url = %self.base_url, "logged in to GraphKB");
        Ok(())
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut attempt = 0;

        loop {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            let mut builder = self.client.request(method.clone(), &url);
            if let Some(token) = &self.token {
                builder = builder.header("Authorization", token.expose_secret());
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let outcome = match builder.send().await {
                Ok(response) => check_response(response).await,
                Err(e) => Err(GenomatchError::Http(e)),
            };

            match outcome {
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    attempt += 1;
                    let wait = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(url = %url, attempt, "GraphKB request failed, retrying in {:?}: {}", wait, err);
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}

async fn check_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(GenomatchError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json().await?)
}

fn is_retryable(err: &GenomatchError) -> bool {
    match err {
        GenomatchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        GenomatchError::Api { status, .. } => {
            *status == StatusCode::SERVICE_UNAVAILABLE.as_u16()
                || *status == StatusCode::BAD_GATEWAY.as_u16()
                || *status == StatusCode::GATEWAY_TIMEOUT.as_u16()
                || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
        }
        _ => false,
    }
}

#[async_trait]
impl KnowledgeBase for GraphKbClient {
    #[instrument(skip(self, body))]
    async fn query(&self, body: &Value) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut skip = 0;

        loop {
            let mut page_body = body.clone();
            if let Value::Object(map) = &mut page_body {
                map.insert("skip".to_string(), json!(skip));
                map.insert("limit".to_string(), json!(self.page_size));
            }
            let response = self.send(Method::POST, "/query", Some(&page_body)).await?;
            let page = match response.get("result") {
                Some(Value::Array(page)) => page.clone(),
                _ => Vec::new(),
            };
            let fetched = page.len();
            records.extend(page);
            if fetched < self.page_size {
                break;
            }
            skip += fetched;
        }

        debug!(records = records.len(), "GraphKB query complete");
        Ok(records)
    }

    #[instrument(skip(self, body))]
    async fn request(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let method = if body.is_some() { Method::POST } else { Method::GET };
        self.send(method, path, body).await
    }

    fn url(&self) -> &str {
        &self.base_url
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url_and_trailing_slash() {
        let client = GraphKbClient::new(None).unwrap();
        assert_eq!(client.url(), DEFAULT_GRAPHKB_URL);

        let client = GraphKbClient::new(Some("http://localhost:8080/api/")).unwrap();
        assert_eq!(client.url(), "http://localhost:8080/api");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = GraphKbClient::new(Some("not a url")).err().unwrap();
        assert!(matches!(err, GenomatchError::Config(_)));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(&GenomatchError::Api { status: 503, message: String::new() }));
        assert!(!is_retryable(&GenomatchError::Api { status: 400, message: String::new() }));
        assert!(!is_retryable(&GenomatchError::FeatureNotFound("KRAS".into())));
    }

    #[test]
    fn test_no_requests_before_use() {
        let client = GraphKbClient::new(None).unwrap().with_page_size(0);
        assert_eq!(client.request_count(), 0);
        assert_eq!(client.page_size, 1);
    }
}
