//! Shared fakes for the session lifecycle tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alumni_session_core::api::{ApiError, RefreshService};
use alumni_session_core::config::SessionConfig;
use alumni_session_core::store::{MemoryTokenStore, TokenStore, AUTH_KEY};
use alumni_session_core::{Clock, Session, SessionManager};
use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

/// 2024-01-01T00:00:00Z
pub const NOW_MS: i64 = 1_704_067_200_000;
pub const HOUR_MS: i64 = 3_600_000;

pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn at(ms: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(ms)))
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

enum Outcome {
    Issue(String),
    Reject,
}

/// Scripted stand-in for the remote auth service.
pub struct FakeAuth {
    outcome: Outcome,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl FakeAuth {
    pub fn issuing(token: &str) -> Arc<Self> {
        Arc::new(Self::new(Outcome::Issue(token.to_string()), None))
    }

    pub fn issuing_after(token: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::new(Outcome::Issue(token.to_string()), Some(delay)))
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self::new(Outcome::Reject, None))
    }

    fn new(outcome: Outcome, delay: Option<Duration>) -> Self {
        Self {
            outcome,
            delay,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RefreshService for FakeAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(refresh_token.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.outcome {
            Outcome::Issue(token) => Ok(token.clone()),
            Outcome::Reject => Err(ApiError::Rejected {
                status: 401,
                body: r#"{"message":"Invalid refresh token"}"#.to_string(),
            }),
        }
    }
}

/// A signed access token carrying display claims, valid for `valid_secs`.
pub fn access_token(name: &str, email: &str, user_type: &str, valid_secs: i64) -> String {
    let iat = NOW_MS / 1000;
    encode(
        &Header::default(),
        &json!({
            "name": name,
            "email": email,
            "userType": user_type,
            "iat": iat,
            "exp": iat + valid_secs,
        }),
        &EncodingKey::from_secret(b"server-only-secret"),
    )
    .unwrap()
}

pub fn store_session(store: &MemoryTokenStore, session: &Session) {
    store.set(AUTH_KEY, &session.to_json().unwrap()).unwrap();
}

pub fn stored_session(store: &MemoryTokenStore) -> Option<Session> {
    store
        .get(AUTH_KEY)
        .unwrap()
        .map(|raw| Session::from_json(&raw).unwrap())
}

pub fn session(access: &str, refresh: Option<&str>, expiry: i64) -> Session {
    Session {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expiry,
        user_name: None,
        user_email: None,
        user_type: None,
    }
}

pub fn manager(
    store: &MemoryTokenStore,
    auth: &Arc<FakeAuth>,
    clock: &Arc<FixedClock>,
) -> SessionManager {
    SessionManager::with_clock(
        Arc::new(store.clone()),
        auth.clone(),
        clock.clone(),
        SessionConfig::default(),
    )
}

/// Default refresh interval plus a little slack.
pub fn past_refresh_interval() -> Duration {
    SessionConfig::default().refresh_interval() + Duration::from_secs(1)
}
