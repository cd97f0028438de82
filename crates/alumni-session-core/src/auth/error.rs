use thiserror::Error;

use crate::api::ApiError;

/// Failures of the session lifecycle.
///
/// None of these reach UI code: the manager logs them and falls back to the
/// logged-out state (decode failures are not even that, the cached display
/// fields are simply kept).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Access token could not be decoded: {0}")]
    TokenDecode(String),

    #[error("Refresh request failed: {0}")]
    RefreshNetwork(String),

    #[error("Refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("Session expired and no refresh token is available")]
    MissingRefreshToken,
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        if err.is_transient() {
            SessionError::RefreshNetwork(err.to_string())
        } else {
            SessionError::RefreshRejected(err.to_string())
        }
    }
}
