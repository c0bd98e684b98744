//! JSON-over-HTTP client with exponential backoff
//!
//! Shared by the sentence-transformers and completion clients. Connection
//! failures, timeouts, 429 and 5xx are retried; anything else fails at once.

use crate::errors::{AppError, Result};
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Builds the service-specific error for a failed call
pub type ErrorFactory = fn(String) -> AppError;

#[derive(Clone)]
pub struct RetryingClient {
    client: reqwest::Client,
    bearer_token: Option<String>,
    max_retries: u32,
    on_error: ErrorFactory,
}

impl RetryingClient {
    pub fn new(timeout: Duration, max_retries: u32, on_error: ErrorFactory) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            bearer_token: None,
            max_retries,
            on_error,
        })
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }

    /// POST `body` as JSON and decode the JSON response
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0u32;
        let max_retries = self.max_retries;

        retry(policy, || {
            attempts += 1;
            let exhausted = attempts > max_retries;
            let attempt = attempts;
            async move {
                self.send_once(url, body).await.map_err(|err| match err {
                    backoff::Error::Transient { err, .. } if exhausted => {
                        backoff::Error::permanent(err)
                    }
                    backoff::Error::Transient { err, retry_after } => {
                        warn!(url, attempt, max_retries, error = %err, "Request failed, retrying");
                        backoff::Error::Transient { err, retry_after }
                    }
                    permanent => permanent,
                })
            }
        })
        .await
    }

    async fn send_once<B, T>(&self, url: &str, body: &B) -> std::result::Result<T, backoff::Error<AppError>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.client.post(url).json(body);
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            let err = (self.on_error)(format!("Request failed: {}", e));
            if e.is_timeout() || e.is_connect() {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = (self.on_error)(format!("API error {}: {}", status, text));
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        response.json::<T>().await.map_err(|e| {
            backoff::Error::permanent((self.on_error)(format!("Failed to parse response: {}", e)))
        })
    }
}
