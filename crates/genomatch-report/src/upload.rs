//! Report upload to the reporting service (IPR).

use async_trait::async_trait;
use genomatch_common::{GenomatchError, Result};
use reqwest::{Client, ClientBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_IPR_URL: &str = "https://iprstaging-api.bcgsc.ca/api";

#[async_trait]
pub trait ReportUploader: Send + Sync {
    /// Upload the final report document, returning the service acknowledgment.
    async fn upload_report(&self, document: &Value) -> Result<Value>;

    fn url(&self) -> &str;
}

pub struct IprClient {
    client: Client,
    base_url: String,
    username: String,
    password: SecretString,
}

impl IprClient {
    pub fn new(base_url: Option<&str>, username: &str, password: SecretString) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(600))
            .build()?;
        let base_url = base_url
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_IPR_URL)
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url)
            .map_err(|e| GenomatchError::Config(format!("invalid IPR url {base_url}: {e}")))?;
        Ok(Self {
            client,
            base_url,
            username: username.to_string(),
            password,
        })
    }
}

#[async_trait]
impl ReportUploader for IprClient {
    #[instrument(skip(self, document))]
    async fn upload_report(&self, document: &Value) -> Result<Value> {
        let url = format!("{}/reports", self.base_url);
        info!(url = %url, "uploading report");
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .json(document)
            .send()
            .await
            .map_err(|e| GenomatchError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenomatchError::Upload(format!("{}: {}", status.as_u16(), message)));
        }
        response
            .json()
            .await
            .map_err(|e| GenomatchError::Upload(format!("unreadable upload response: {e}")))
    }

    fn url(&self) -> &str {
        &self.base_url
    }
}

// ── Mock ────────────────────────────────────────────────────────────────────

/// Records uploaded documents; optionally fails every upload.
#[derive(Default)]
pub struct MockReportUploader {
    failure: Option<String>,
    acknowledgment: Option<Value>,
    uploads: Mutex<Vec<Value>>,
}

impl MockReportUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn with_acknowledgment(mut self, acknowledgment: Value) -> Self {
        self.acknowledgment = Some(acknowledgment);
        self
    }

    pub fn uploads(&self) -> Vec<Value> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReportUploader for MockReportUploader {
    async fn upload_report(&self, document: &Value) -> Result<Value> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(document.clone());
        match &self.failure {
            Some(message) => Err(GenomatchError::Upload(message.clone())),
            None => Ok(self
                .acknowledgment
                .clone()
                .unwrap_or_else(|| serde_json::json!({ "ident": "MOCK1" }))),
        }
    }

    fn url(&self) -> &str {
        "mock://ipr"
    }
}
