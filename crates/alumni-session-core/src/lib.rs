//! Core library for the alumni portal client session.
//!
//! This crate owns the authentication bundle handed out at login and keeps it
//! usable: it decodes the access token for display, refreshes it before the
//! validity window runs out, and converges with changes made to the persisted
//! session by other processes.
//!
//! - [`manager::SessionManager`]: the session state machine
//! - [`store`]: persisted key-value storage and change notification
//! - [`api`]: the remote auth service (`POST /auth/refresh`)
//! - [`handshake`]: server-side bearer token verification for realtime
//!   connections

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod handshake;
pub mod manager;
pub mod store;

pub use auth::{AccessClaims, Session, SessionError};
pub use clock::{Clock, SystemClock};
pub use config::SessionConfig;
pub use manager::{SessionManager, SessionState};
