//! HTTP client for the exam content service.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ApiError, RemoteSource};
use crate::models::{DataStructure, ExamKey, Question};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for the connectivity probe; a probe that hangs is as good as offline.
const PING_TIMEOUT_SECS: u64 = 5;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Client for the remote question service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn url(&self, path: &str) -> Result<String> {
        let base = self.base_url.as_deref().ok_or(ApiError::NotConfigured)?;
        Ok(format!("{}/{}", base, path))
    }

    /// Check if response is successful.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response
                        .text()
                        .await
                        .with_context(|| format!("Failed to read response body from {}", url))?;
                    return serde_json::from_str(&text)
                        .map_err(|e| ApiError::InvalidResponse(e.to_string()))
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    /// Cheap reachability check used as the connectivity probe.
    pub async fn ping(&self) -> bool {
        let Ok(url) = self.url("health") else {
            return false;
        };
        match self
            .client
            .head(&url)
            .timeout(Duration::from_secs(PING_TIMEOUT_SECS))
            .send()
            .await
        {
            // Any HTTP answer means the network path works.
            Ok(response) => {
                debug!(status = %response.status(), "Ping answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "Ping failed");
                false
            }
        }
    }
}

#[async_trait]
impl RemoteSource for ApiClient {
    async fn fetch_structure(&self) -> Result<DataStructure> {
        let url = self.url("structure")?;
        let data: DataStructure = self.get(&url, &[]).await?;
        debug!(exams = data.exam_count(), questions = data.question_count(), "Structure fetched");
        Ok(data)
    }

    async fn fetch_questions(&self, key: &ExamKey) -> Result<Vec<Question>> {
        let url = self.url("questions")?;
        let query = [
            ("domain", key.domain.clone()),
            ("subtype", key.subtype.clone()),
            ("instance", key.instance.to_string()),
        ];
        self.get(&url, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ApiClient::new(Some("https://exams.example.org/api/".into())).unwrap();
        assert_eq!(client.url("structure").unwrap(), "https://exams.example.org/api/structure");
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        let client = ApiClient::new(None).unwrap();
        let err = client.fetch_structure().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::NotConfigured)));
        assert!(!client.ping().await);
    }
}
