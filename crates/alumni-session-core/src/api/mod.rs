//! Client for the alumni portal's remote auth service.
//!
//! The only endpoint this crate consumes is `POST /auth/refresh`, which
//! exchanges a refresh token for a new access token. The `RefreshService`
//! trait is the seam the session manager depends on, so tests and embedders
//! can substitute their own transport.

pub mod client;
pub mod error;

pub use client::{AuthClient, RefreshService};
pub use error::ApiError;
