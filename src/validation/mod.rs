//! Client for the external UID validation service.
//!
//! The hub never judges tags itself: the three collected UIDs are posted
//! to the validation service, whose verdict drives the bonding session.

pub mod types;

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::config::ValidationConfig;
pub use types::{ValidationRequest, ValidationResponse};

/// Base of the canonical tap URL printed on tags.
pub const TAP_URL_BASE: &str = "https://nfc.cursive.team/tap?uid=";

const VALIDATE_PATH: &str = "/api/validate_uids";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("validation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode validation response: {0}")]
    Decode(String),
    #[error("all {attempts} validation attempts failed: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ValidationError>,
    },
}

/// Canonical tap URL for a raw tag UID.
pub fn tap_url(uid: &str) -> String {
    format!("{}{}", TAP_URL_BASE, urlencoding::encode(uid))
}

/// Seam between the orchestrator and whatever judges a set of UIDs.
///
/// `ValidationClient` implements this over HTTP; tests use mocks.
pub trait Validator: Send + Sync + 'static {
    fn validate(
        &self,
        uids: Vec<String>,
    ) -> impl Future<Output = Result<ValidationResponse, ValidationError>> + Send;
}

/// HTTP client for the validation service.
pub struct ValidationClient {
    client: Client,
    base_url: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl ValidationClient {
    pub fn new(config: &ValidationConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_count: config.retry_count,
            retry_delay: config.retry_delay,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST the UIDs, retrying up to `retry_count` extra times.
    pub async fn validate_uids(
        &self,
        uids: &[String],
    ) -> Result<ValidationResponse, ValidationError> {
        let request = ValidationRequest {
            uids: uids.to_vec(),
        };
        let attempts = self.retry_count + 1;
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.post_once(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    log::warn!(
                        "Validation attempt {}/{} failed: {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(last) if attempts > 1 => Err(ValidationError::RetriesExhausted {
                attempts,
                last: Box::new(last),
            }),
            Some(last) => Err(last),
            None => Err(ValidationError::Decode("no validation attempt made".to_string())),
        }
    }

    async fn post_once(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResponse, ValidationError> {
        let url = format!("{}{}", self.base_url, VALIDATE_PATH);
        let resp = self.client.post(&url).json(request).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ValidationError::Status { status, body });
        }

        resp.json::<ValidationResponse>()
            .await
            .map_err(|e| ValidationError::Decode(e.to_string()))
    }
}

impl Validator for ValidationClient {
    async fn validate(&self, uids: Vec<String>) -> Result<ValidationResponse, ValidationError> {
        self.validate_uids(&uids).await
    }
}
