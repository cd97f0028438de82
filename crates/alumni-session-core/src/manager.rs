//! The session state machine.
//!
//! `SessionManager` holds the one authoritative in-memory view of the
//! session, keeps it consistent with the token store, refreshes the access
//! token on a fixed schedule and converges with changes other contexts make
//! to the store.
//!
//! ```text
//! Unauthenticated --load/establish--> Authenticated
//! Authenticated   --timer / expired on load--> Refreshing
//! Refreshing      --success--> Authenticated
//! Refreshing      --failure--> Unauthenticated (store cleared, timer cancelled)
//! Authenticated   --logout--> Unauthenticated
//! ```
//!
//! Failures never escape: callers only ever observe whether a session exists.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::RefreshService;
use crate::auth::{decode_claims, Session, SessionError};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::store::{StorageEvent, StorageSubscription, TokenStore};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(Session),
    Refreshing(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Unauthenticated => None,
            SessionState::Authenticated(s) | SessionState::Refreshing(s) => Some(s),
        }
    }
}

struct Inner {
    store: Arc<dyn TokenStore>,
    auth: Arc<dyn RefreshService>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    /// Held for the whole duration of a refresh exchange.
    refresh_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in [&self.timer, &self.watcher] {
            if let Ok(mut handle) = slot.lock() {
                if let Some(handle) = handle.take() {
                    handle.abort();
                }
            }
        }
    }
}

/// Owns the session. Clone is cheap; clones share the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        auth: Arc<dyn RefreshService>,
        config: SessionConfig,
    ) -> Self {
        Self::with_clock(store, auth, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: Arc<dyn TokenStore>,
        auth: Arc<dyn RefreshService>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            inner: Arc::new(Inner {
                store,
                auth,
                clock,
                config,
                state,
                refresh_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
                watcher: Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session().cloned()
    }

    /// Receive every state transition (the hook dependent views redraw from).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether a periodic refresh task is currently armed.
    pub fn has_scheduled_refresh(&self) -> bool {
        self.inner
            .timer
            .lock()
            .map(|t| t.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    fn storage_key(&self) -> &str {
        &self.inner.config.storage_key
    }

    fn publish(&self, next: SessionState) {
        self.inner.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Refresh display fields from the token; a token that does not decode
    /// leaves the cached fields as they are.
    fn enrich(&self, session: &mut Session) {
        match decode_claims(&session.access_token) {
            Ok(claims) => session.apply_claims(&claims),
            Err(e) => debug!(error = %e, "Keeping cached profile fields"),
        }
    }

    fn persist(&self, session: &Session) {
        let result = session
            .to_json()
            .and_then(|json| self.inner.store.set(self.storage_key(), &json));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session");
        }
    }

    /// Read the persisted session and settle into the matching state.
    ///
    /// An expired session with a refresh token is renewed before this returns;
    /// without one it is discarded without touching the network. A resulting
    /// authenticated session arms the periodic refresh.
    pub async fn load(&self) -> SessionState {
        // Held across read and publish so a timer refresh finishing meanwhile
        // cannot be overwritten by the stale copy read here.
        let _guard = self.inner.refresh_lock.lock().await;

        let raw = match self.inner.store.get(self.storage_key()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                self.reset();
                return SessionState::Unauthenticated;
            }
        };

        let Some(raw) = raw else {
            debug!("No stored session");
            self.reset();
            return SessionState::Unauthenticated;
        };

        let mut session = match Session::from_json(&raw) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored session");
                self.logout();
                return SessionState::Unauthenticated;
            }
        };

        if !session.is_logged_in() {
            debug!("Stored session has no access token");
            self.logout();
            return SessionState::Unauthenticated;
        }

        self.enrich(&mut session);

        if session.is_expired(self.now()) {
            debug!(expiry = session.expiry, "Stored session expired");
            session = match self.renew_locked(session).await {
                Ok(renewed) => renewed,
                Err(e) => {
                    warn!(error = %e, "Session could not be renewed, signing out");
                    self.logout();
                    return SessionState::Unauthenticated;
                }
            };
        }

        debug!(
            user = session.user_email.as_deref().unwrap_or("unknown"),
            remaining_secs = session.remaining_millis(self.now()) / 1000,
            "Session loaded"
        );
        self.publish(SessionState::Authenticated(session.clone()));
        self.schedule_auto_refresh(&session);
        SessionState::Authenticated(session)
    }

    /// Adopt a session produced by a login flow.
    ///
    /// Must be called inside a Tokio runtime (the refresh timer is spawned).
    pub fn establish(&self, access_token: impl Into<String>, refresh_token: Option<String>) -> SessionState {
        let mut session = Session::new(
            access_token,
            refresh_token,
            self.now(),
            self.inner.config.validity_window_millis(),
        );
        if !session.is_logged_in() {
            warn!("Ignoring login without an access token");
            self.logout();
            return SessionState::Unauthenticated;
        }

        self.enrich(&mut session);
        self.persist(&session);
        self.publish(SessionState::Authenticated(session.clone()));
        self.schedule_auto_refresh(&session);
        info!(user = session.user_email.as_deref().unwrap_or("unknown"), "Signed in");
        SessionState::Authenticated(session)
    }

    /// Exchange a refresh token for a new access token. Failures are logged
    /// and reported as `None`.
    pub async fn refresh(&self, refresh_token: &str) -> Option<String> {
        match self.request_access_token(refresh_token).await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "Access token refresh failed");
                None
            }
        }
    }

    async fn request_access_token(&self, refresh_token: &str) -> Result<String, SessionError> {
        if refresh_token.trim().is_empty() {
            return Err(SessionError::MissingRefreshToken);
        }
        Ok(self.inner.auth.refresh(refresh_token).await?)
    }

    /// Renew `stale` under the single-flight guard and persist the result.
    async fn refresh_session(&self, stale: Session) -> Result<Session, SessionError> {
        let _guard = self.inner.refresh_lock.lock().await;
        self.renew_locked(stale).await
    }

    /// Body of a refresh; the caller holds `refresh_lock`.
    async fn renew_locked(&self, stale: Session) -> Result<Session, SessionError> {
        let refresh_token = match stale.refresh_token.as_deref() {
            Some(token) if stale.has_refresh_token() => token.to_string(),
            _ => return Err(SessionError::MissingRefreshToken),
        };

        // Another refresh may have renewed this session while we waited
        let renewed_elsewhere = {
            let state = self.inner.state.borrow();
            match &*state {
                SessionState::Authenticated(current)
                    if current.refresh_token == stale.refresh_token
                        && current.access_token != stale.access_token
                        && !current.is_expired(self.now()) =>
                {
                    Some(current.clone())
                }
                _ => None,
            }
        };
        if let Some(current) = renewed_elsewhere {
            debug!("Reusing access token from concurrent refresh");
            return Ok(current);
        }

        self.publish(SessionState::Refreshing(stale.clone()));

        let access_token = self.request_access_token(&refresh_token).await?;

        let mut renewed = stale;
        renewed.accept_access_token(
            access_token,
            self.now(),
            self.inner.config.validity_window_millis(),
        );
        self.enrich(&mut renewed);
        self.persist(&renewed);
        self.publish(SessionState::Authenticated(renewed.clone()));
        info!("Access token refreshed");
        Ok(renewed)
    }

    /// Replace any armed refresh task with one for `session`.
    ///
    /// Nothing is armed when the session has no refresh token. Must be called
    /// inside a Tokio runtime.
    pub fn schedule_auto_refresh(&self, session: &Session) {
        let Ok(mut timer) = self.inner.timer.lock() else {
            warn!("Refresh timer lock poisoned");
            return;
        };
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        if !session.has_refresh_token() {
            debug!("No refresh token, automatic refresh disabled");
            return;
        }

        let period = self.inner.config.refresh_interval();
        let weak = Arc::downgrade(&self.inner);
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = SessionManager::from_weak(&weak) else {
                    return;
                };
                if !manager.refresh_on_timer().await {
                    return;
                }
            }
        }));
        debug!(interval_secs = period.as_secs(), "Automatic refresh scheduled");
    }

    /// One scheduled refresh. Returns whether the schedule should continue.
    async fn refresh_on_timer(&self) -> bool {
        let Some(current) = self.session() else {
            debug!("Refresh timer fired without a session");
            return false;
        };
        match self.refresh_session(current).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Scheduled refresh failed, signing out");
                self.logout();
                false
            }
        }
    }

    /// Forget the session everywhere: store entry, memory and timer.
    pub fn logout(&self) {
        if let Err(e) = self.inner.store.remove(self.storage_key()) {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.reset();
        info!("Signed out");
    }

    /// Drop in-memory state without touching the store.
    fn reset(&self) {
        self.cancel_timer();
        self.publish(SessionState::Unauthenticated);
    }

    fn cancel_timer(&self) {
        if let Ok(mut timer) = self.inner.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
                debug!("Automatic refresh cancelled");
            }
        }
    }

    /// React to a change made to the store by someone else.
    pub async fn on_external_change(&self, event: &StorageEvent) -> SessionState {
        if event.key != self.storage_key() {
            return self.state();
        }
        debug!(removed = event.new_value.is_none(), "Stored session changed externally");
        self.load().await
    }

    /// Feed external storage changes into the manager until shutdown.
    /// Replaces a previously installed subscription.
    pub fn watch_external(&self, mut subscription: StorageSubscription) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(manager) = SessionManager::from_weak(&weak) else {
                    return;
                };
                manager.on_external_change(&event).await;
            }
            debug!("Storage change feed closed");
        });

        if let Ok(mut watcher) = self.inner.watcher.lock() {
            if let Some(previous) = watcher.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Teardown: stop the refresh timer and the external change watcher.
    /// The persisted session is left alone.
    pub fn shutdown(&self) {
        self.cancel_timer();
        if let Ok(mut watcher) = self.inner.watcher.lock() {
            if let Some(handle) = watcher.take() {
                handle.abort();
            }
        }
        debug!("Session manager shut down");
    }
}
