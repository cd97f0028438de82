//! Authentication bundle and access token inspection.
//!
//! This module provides:
//! - `Session`: the persisted bundle of access token, refresh token, expiry
//!   and cached display fields
//! - `AccessClaims`: the display claims carried by an access token
//! - `SessionError`: the failure taxonomy of the session lifecycle
//!
//! Access tokens are accepted for one hour and refreshed five minutes early.

pub mod claims;
pub mod error;
pub mod session;

pub use claims::{decode_claims, AccessClaims};
pub use error::SessionError;
pub use session::Session;
