use thiserror::Error;

/// Failures of a call to the refresh endpoint.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The service refused the refresh token (any 4xx other than 429).
    #[error("Refresh token rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// The service could not answer right now (429 or 5xx).
    #[error("Auth service unavailable (HTTP {status}): {body}")]
    ServiceUnavailable { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Classify a non-success status from the refresh endpoint.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = Self::truncate_body(body);
        let status = status.as_u16();
        match status {
            429 | 500..=599 => ApiError::ServiceUnavailable { status, body },
            _ => ApiError::Rejected { status, body },
        }
    }

    /// Whether a later attempt with the same refresh token could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::ServiceUnavailable { .. } | ApiError::NetworkError(_)
        )
    }
}
