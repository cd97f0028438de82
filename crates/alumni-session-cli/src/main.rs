//! alumni-session - inspect and maintain the alumni portal client session.
//!
//! Usage:
//!   alumni-session status                     Show the current session
//!   alumni-session watch                      Keep the session fresh until Ctrl-C
//!   alumni-session import <access> [refresh]  Adopt tokens from a login
//!   alumni-session logout                     Forget the session
//!   alumni-session verify <token>             Check a handshake token (server secret)

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alumni_session_core::api::AuthClient;
use alumni_session_core::config::{SessionConfig, StoreBackend, ENV_JWT_SECRET};
use alumni_session_core::handshake::{Handshake, HandshakeVerifier};
use alumni_session_core::store::{
    FileTokenStore, KeychainTokenStore, PollingNotifier, StorageNotifier, TokenStore,
};
use alumni_session_core::{SessionManager, SessionState};

const USAGE: &str = "usage: alumni-session <status|watch|import <access> [refresh]|logout|verify <token>>";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = SessionConfig::load().context("Failed to load configuration")?;

    match args.first().map(String::as_str) {
        Some("status") => status(&config).await,
        Some("watch") => watch(&config).await,
        Some("import") => {
            let access = args.get(1).context(USAGE)?;
            import(&config, access, args.get(2).cloned())
        }
        Some("logout") => {
            build_manager(&config)?.0.logout();
            println!("Signed out.");
            Ok(())
        }
        Some("verify") => verify(&config, args.get(1).context(USAGE)?),
        _ => bail!(USAGE),
    }
}

fn build_store(config: &SessionConfig) -> Result<Arc<dyn TokenStore>> {
    Ok(match config.store {
        StoreBackend::File => Arc::new(FileTokenStore::new(config.storage_dir()?)),
        StoreBackend::Keychain => Arc::new(KeychainTokenStore::default()),
    })
}

fn build_manager(config: &SessionConfig) -> Result<(SessionManager, Arc<dyn TokenStore>)> {
    let store = build_store(config)?;
    let client = AuthClient::with_timeout(config.api_base_url.clone(), config.request_timeout())
        .context("Failed to build HTTP client")?;
    let manager = SessionManager::new(Arc::clone(&store), Arc::new(client), config.clone());
    Ok((manager, store))
}

fn describe(state: &SessionState) -> String {
    let Some(session) = state.session() else {
        return "Not signed in.".to_string();
    };

    let expires = Utc
        .timestamp_millis_opt(session.expiry)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| session.expiry.to_string());
    let minutes_left = session.remaining_millis(Utc::now().timestamp_millis()) / 60_000;
    let phase = if state.is_authenticated() { "Signed in" } else { "Refreshing" };

    format!(
        "{} as {} <{}> ({})\nAccess token expires {} ({}m left)\nAutomatic refresh: {}",
        phase,
        session.user_name.as_deref().unwrap_or("unknown"),
        session.user_email.as_deref().unwrap_or("no email"),
        session.user_type.as_deref().unwrap_or("no role"),
        expires,
        minutes_left,
        if session.has_refresh_token() { "on" } else { "off" },
    )
}

async fn status(config: &SessionConfig) -> Result<()> {
    let (manager, _) = build_manager(config)?;
    let state = manager.load().await;
    println!("{}", describe(&state));
    manager.shutdown();
    Ok(())
}

async fn watch(config: &SessionConfig) -> Result<()> {
    let (manager, store) = build_manager(config)?;

    let notifier = PollingNotifier::spawn(store, config.storage_key.clone(), config.poll_interval());
    manager.watch_external(notifier.subscribe());

    let mut rx = manager.subscribe();
    let state = manager.load().await;
    println!("{}", describe(&state));
    rx.borrow_and_update();

    info!("Watching session, press Ctrl-C to stop");
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                println!("{}", describe(&state));
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    manager.shutdown();
    drop(notifier);
    info!("Stopped watching session");
    Ok(())
}

fn import(config: &SessionConfig, access: &str, refresh: Option<String>) -> Result<()> {
    let (manager, _) = build_manager(config)?;
    let state = manager.establish(access, refresh);
    if !state.is_authenticated() {
        bail!("Access token is empty");
    }
    println!("{}", describe(&state));
    manager.shutdown();
    Ok(())
}

fn verify(config: &SessionConfig, token: &str) -> Result<()> {
    let secret = config
        .jwt_secret
        .as_deref()
        .with_context(|| format!("{} is not set", ENV_JWT_SECRET))?;
    let verifier = HandshakeVerifier::new(secret.as_bytes());

    let claims = verifier.verify(&Handshake::with_auth_token(token))?;
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use alumni_session_core::store::MemoryTokenStore;
    use alumni_session_core::Session;

    #[test]
    fn test_describe_logged_out() {
        assert_eq!(describe(&SessionState::Unauthenticated), "Not signed in.");
    }

    #[test]
    fn test_describe_signed_in() {
        let mut session = Session::new("tok", Some("r1".into()), Utc::now().timestamp_millis(), 3_600_000);
        session.user_name = Some("Ada Lovelace".into());
        session.user_email = Some("ada@alumni.example".into());

        let text = describe(&SessionState::Authenticated(session));
        assert!(text.starts_with("Signed in as Ada Lovelace <ada@alumni.example> (no role)"));
        assert!(text.ends_with("Automatic refresh: on"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_wiring_reports_external_removal() {
        let memory = MemoryTokenStore::new();
        memory.set("auth", "{}").unwrap();
        let store: Arc<dyn TokenStore> = Arc::new(memory.clone());

        let notifier = PollingNotifier::spawn(store, "auth", Duration::from_secs(1));
        let mut subscription = notifier.subscribe();
        memory.remove("auth").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.new_value, None);
    }
}
