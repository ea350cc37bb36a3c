//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let token_secret = matches
        .get_one::<String>("token-secret")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --token-secret")?;

    let get_string = |name: &str| -> Option<String> { matches.get_one::<String>(name).cloned() };

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        token_secret,
        token_issuer: get_string("token-issuer").unwrap_or_else(|| "janua".to_string()),
        access_token_ttl_seconds: matches
            .get_one::<i64>("access-token-ttl-seconds")
            .copied()
            .unwrap_or(900),
        refresh_token_ttl_seconds: matches
            .get_one::<i64>("refresh-token-ttl-seconds")
            .copied()
            .unwrap_or(604_800),
        frontend_base_url: get_string("frontend-base-url")
            .unwrap_or_else(|| "https://janua.dev".to_string()),
        session_sweep_seconds: matches
            .get_one::<u64>("session-sweep-seconds")
            .copied()
            .unwrap_or(3600),
        reset_token_ttl_seconds: matches
            .get_one::<i64>("reset-token-ttl-seconds")
            .copied()
            .unwrap_or(1800),
        device_salt: get_string("device-salt").unwrap_or_else(|| "janua-device".to_string()),
        mfa_pepper: SecretString::from(
            get_string("mfa-pepper").unwrap_or_else(|| "janua-mfa".to_string()),
        ),
        mfa_challenge_ttl_seconds: matches
            .get_one::<i64>("mfa-challenge-ttl-seconds")
            .copied()
            .unwrap_or(300),
        email_outbox_poll_seconds: matches
            .get_one::<u64>("email-outbox-poll-seconds")
            .copied()
            .unwrap_or(5),
        email_outbox_batch_size: matches
            .get_one::<usize>("email-outbox-batch-size")
            .copied()
            .unwrap_or(10),
        email_outbox_max_attempts: matches
            .get_one::<u32>("email-outbox-max-attempts")
            .copied()
            .unwrap_or(5),
        oauth_google_client_id: get_string("oauth-google-client-id"),
        oauth_google_client_secret: get_string("oauth-google-client-secret"),
        oauth_github_client_id: get_string("oauth-github-client-id"),
        oauth_github_client_secret: get_string("oauth-github-client-secret"),
        oauth_timeout_seconds: matches
            .get_one::<u64>("oauth-timeout-seconds")
            .copied()
            .unwrap_or(10),
    })))
}
