//! Time-series store write client.
//!
//! Speaks the line-protocol write endpoint: one POST per batch, token auth,
//! and a response classification that drives the batch writer's retry and
//! split decisions.

use std::time::Duration;

use reqwest::StatusCode;

/// Configuration for the time-series store write endpoint.
///
/// `write_url` is the complete endpoint including any bucket/org query
/// parameters, e.g. `http://influx:8086/api/v2/write?bucket=events`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub write_url: String,
    pub token: String,
    pub request_timeout: Duration,
}

impl StoreConfig {
    #[must_use]
    pub fn new(write_url: String, token: String) -> Self {
        Self {
            write_url,
            token,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for batch writes of line-protocol payloads.
#[derive(Debug, Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    write_url: String,
    token: String,
}

/// Store write failures, classified per the write contract.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("store unavailable (status {status})")]
    Unavailable { status: u16 },
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("field type conflict: {message}")]
    TypeConflict { message: String },
    #[error("store rejected credentials (status {status})")]
    Unauthorized { status: u16 },
    #[error("store rejected write (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl StoreError {
    /// Whether another attempt with the same payload may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Unavailable { .. } | Self::RateLimited { .. }
        )
    }

    /// Stable label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Unavailable { .. } => "unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::TypeConflict { .. } => "type_conflict",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Rejected { .. } => "rejected",
        }
    }
}

impl StoreClient {
    pub fn new(config: StoreConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            write_url: config.write_url,
            token: config.token,
        })
    }

    /// Writes a line-protocol payload in a single call.
    pub async fn write(&self, body: String) -> Result<(), StoreError> {
        let response = self
            .http
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(StoreError::RateLimited { retry_after })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::Unauthorized {
                status: status.as_u16(),
            }),
            s if s.is_server_error() => Err(StoreError::Unavailable {
                status: status.as_u16(),
            }),
            _ => {
                let message = response.text().await.unwrap_or_default();
                if status == StatusCode::BAD_REQUEST
                    && message.to_ascii_lowercase().contains("field type conflict")
                {
                    Err(StoreError::TypeConflict { message })
                } else {
                    Err(StoreError::Rejected {
                        status: status.as_u16(),
                        message,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> StoreClient {
        StoreClient::new(StoreConfig::new(
            format!("{}/api/v2/write?bucket=events", server.url()),
            "secret".to_owned(),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_write_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/write?bucket=events")
            .match_header("Authorization", "Token secret")
            .match_body("m,entity_id=light.bedroom state=\"on\" 1")
            .with_status(204)
            .create_async()
            .await;

        let client = client_for(&server);
        let result = client
            .write("m,entity_id=light.bedroom state=\"on\" 1".to_owned())
            .await;

        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = client_for(&server).write(String::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { status: 503 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_hint() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "7")
            .create_async()
            .await;

        let err = client_for(&server).write(String::new()).await.unwrap_err();
        match err {
            StoreError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_type_conflict_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":"invalid","message":"field type conflict: input field \"numeric_state\" is type string, already exists as type float"}"#)
            .create_async()
            .await;

        let err = client_for(&server).write(String::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::TypeConflict { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = client_for(&server).write(String::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized { status: 401 }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_plain_bad_request_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Any)
            .with_status(400)
            .with_body("unable to parse line")
            .create_async()
            .await;

        let err = client_for(&server).write(String::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
    }
}
