//! Issue-token command implementation.

use finsync_core::UserId;
use finsync_sync_server::{AuthConfig, TokenAuthenticator};
use std::time::Duration;

/// Environment variable read when `--secret` is not given.
pub const SECRET_ENV: &str = "FINSYNC_AUTH_SECRET";

/// Issues a bearer token for `user` signed with `secret`.
pub fn issue(secret: &[u8], user: &str, expiry: Duration) -> Result<String, Box<dyn std::error::Error>> {
    if secret.is_empty() {
        return Err("auth secret must not be empty".into());
    }
    if user.trim().is_empty() {
        return Err("user id must not be empty".into());
    }
    let config = AuthConfig::new(secret.to_vec()).with_expiry(expiry);
    Ok(TokenAuthenticator::new(config).issue_token(&UserId::new(user)))
}

/// Runs the issue-token command.
pub fn run(secret: Option<String>, user: &str, expiry_days: u64) -> Result<(), Box<dyn std::error::Error>> {
    let secret = match secret {
        Some(secret) => secret,
        None => std::env::var(SECRET_ENV)
            .map_err(|_| format!("no --secret given and {SECRET_ENV} is not set"))?,
    };
    let token = issue(secret.as_bytes(), user, Duration::from_secs(expiry_days * 24 * 60 * 60))?;
    tracing::debug!(user, expiry_days, "token issued");
    println!("{token}");
    Ok(())
}
