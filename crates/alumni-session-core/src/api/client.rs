//! HTTP client for the remote auth service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ApiError;

/// HTTP request timeout in seconds when none is configured.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path of the refresh endpoint, relative to the API base URL.
const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait RefreshService: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError>;
}

/// Auth service client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn refresh_url(&self) -> String {
        format!("{}{}", self.base_url, REFRESH_PATH)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

#[async_trait]
impl RefreshService for AuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError> {
        let url = self.refresh_url();
        debug!(url = %url, "Requesting access token refresh");

        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let response = Self::check_response(response).await?;

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("refresh body: {e}")))?;

        if body.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "refresh response carried an empty accessToken".to_string(),
            ));
        }
        Ok(body.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accept one connection, answer it with `status` and `body`, and hand back
    /// the raw request text.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (base, handle)
    }

    #[test]
    fn test_refresh_url_trims_trailing_slash() {
        let client = AuthClient::new("https://api.alumni.example/").unwrap();
        assert_eq!(client.refresh_url(), "https://api.alumni.example/auth/refresh");
    }

    #[tokio::test]
    async fn test_refresh_returns_new_access_token() {
        let (base, server) = serve_once("200 OK", r#"{"accessToken":"new-token"}"#).await;
        let client = AuthClient::new(base).unwrap();

        let token = client.refresh("r1").await.unwrap();
        assert_eq!(token, "new-token");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /auth/refresh"));
        assert!(request.contains(r#"{"refreshToken":"r1"}"#));
    }

    #[tokio::test]
    async fn test_refresh_rejected_status_is_an_error() {
        let (base, server) = serve_once("401 Unauthorized", r#"{"message":"expired"}"#).await;
        let client = AuthClient::new(base).unwrap();

        let err = client.refresh("stale").await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 401, .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_server_failure_is_transient() {
        let (base, server) = serve_once("503 Service Unavailable", "{}").await;
        let client = AuthClient::new(base).unwrap();

        let err = client.refresh("r1").await.unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable { status: 503, .. }));
        assert!(err.is_transient());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_malformed_body_is_invalid_response() {
        let (base, server) = serve_once("200 OK", r#"{"token":"wrong-field"}"#).await;
        let client = AuthClient::new(base).unwrap();

        let err = client.refresh("r1").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = AuthClient::with_timeout(base, Duration::from_secs(2)).unwrap();
        let err = client.refresh("r1").await.unwrap_err();
        assert!(matches!(err, ApiError::NetworkError(_)));
    }
}
