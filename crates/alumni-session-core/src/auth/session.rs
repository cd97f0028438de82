use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AccessClaims;

/// The authentication bundle, persisted as JSON under the auth storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch milliseconds after which the access token is treated as invalid.
    #[serde(default)]
    pub expiry: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
}

impl Session {
    /// Build a freshly accepted session expiring `validity_ms` after `now_ms`.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        now_ms: i64,
        validity_ms: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expiry: now_ms + validity_ms,
            user_name: None,
            user_email: None,
            user_type: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse stored session")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize session")
    }

    /// A session without an access token is a logged-out session.
    pub fn is_logged_in(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expiry
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }

    /// Milliseconds left before expiry, zero once expired.
    pub fn remaining_millis(&self, now_ms: i64) -> i64 {
        (self.expiry - now_ms).max(0)
    }

    /// Swap in a newly issued access token and restart the validity window.
    pub fn accept_access_token(&mut self, access_token: String, now_ms: i64, validity_ms: i64) {
        self.access_token = access_token;
        self.expiry = now_ms + validity_ms;
    }

    /// Overwrite the cached display fields the claims actually carry.
    pub fn apply_claims(&mut self, claims: &AccessClaims) {
        if let Some(ref name) = claims.name {
            self.user_name = Some(name.clone());
        }
        if let Some(ref email) = claims.email {
            self.user_email = Some(email.clone());
        }
        if let Some(ref user_type) = claims.user_type {
            self.user_type = Some(user_type.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;

    #[test]
    fn test_new_session_expiry_is_window_from_now() {
        let session = Session::new("tok", Some("r1".into()), 1_000, HOUR_MS);
        assert_eq!(session.expiry, 1_000 + HOUR_MS);
        assert!(!session.is_expired(1_000 + HOUR_MS));
        assert!(session.is_expired(1_001 + HOUR_MS));
    }

    #[test]
    fn test_blank_access_token_is_logged_out() {
        let session = Session::new("  ", None, 0, HOUR_MS);
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_has_refresh_token_ignores_blank() {
        let mut session = Session::new("tok", Some(String::new()), 0, HOUR_MS);
        assert!(!session.has_refresh_token());
        session.refresh_token = Some("r1".into());
        assert!(session.has_refresh_token());
    }

    #[test]
    fn test_json_uses_camel_case_keys() {
        let mut session = Session::new("tok", Some("r1".into()), 0, HOUR_MS);
        session.user_name = Some("Ada".into());
        let json = session.to_json().unwrap();
        assert!(json.contains("\"accessToken\":\"tok\""));
        assert!(json.contains("\"refreshToken\":\"r1\""));
        assert!(json.contains("\"userName\":\"Ada\""));
        assert!(!json.contains("userEmail"));
    }

    #[test]
    fn test_from_json_tolerates_missing_fields() {
        let session = Session::from_json(r#"{"accessToken":"tok"}"#).unwrap();
        assert_eq!(session.access_token, "tok");
        assert_eq!(session.refresh_token, None);
        assert_eq!(session.expiry, 0);
    }

    #[test]
    fn test_apply_claims_keeps_fields_the_claims_lack() {
        let mut session = Session::new("tok", None, 0, HOUR_MS);
        session.user_name = Some("Old Name".into());
        session.user_type = Some("Alumni".into());

        session.apply_claims(&AccessClaims {
            name: None,
            email: Some("new@alumni.example".into()),
            ..Default::default()
        });

        assert_eq!(session.user_name.as_deref(), Some("Old Name"));
        assert_eq!(session.user_email.as_deref(), Some("new@alumni.example"));
        assert_eq!(session.user_type.as_deref(), Some("Alumni"));
    }

    #[test]
    fn test_accept_access_token_restarts_window() {
        let mut session = Session::new("old", Some("r1".into()), 0, HOUR_MS);
        session.accept_access_token("new".into(), 5_000, HOUR_MS);
        assert_eq!(session.access_token, "new");
        assert_eq!(session.expiry, 5_000 + HOUR_MS);
        assert_eq!(session.remaining_millis(5_000), HOUR_MS);
        assert_eq!(session.remaining_millis(i64::MAX / 2), 0);
    }
}
