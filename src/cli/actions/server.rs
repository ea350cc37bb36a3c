use crate::api::{
    self,
    email::EmailWorkerConfig,
    handlers::auth::{AuthConfig, AuthState, oauth::ProviderRegistry},
};
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub frontend_base_url: String,
    pub session_sweep_seconds: u64,
    pub reset_token_ttl_seconds: i64,
    pub device_salt: String,
    pub mfa_pepper: SecretString,
    pub mfa_challenge_ttl_seconds: i64,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub oauth_google_client_id: Option<String>,
    pub oauth_google_client_secret: Option<String>,
    pub oauth_github_client_id: Option<String>,
    pub oauth_github_client_secret: Option<String>,
    pub oauth_timeout_seconds: u64,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to
/// start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = AuthConfig::new(args.frontend_base_url)
        .with_token_issuer(args.token_issuer)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(args.refresh_token_ttl_seconds)
        .with_reset_token_ttl_seconds(args.reset_token_ttl_seconds)
        .with_mfa_challenge_ttl_seconds(args.mfa_challenge_ttl_seconds)
        .with_session_sweep_seconds(args.session_sweep_seconds)
        .with_oauth_timeout_seconds(args.oauth_timeout_seconds);

    let mut providers = ProviderRegistry::new();
    if let (Some(id), Some(secret)) = (
        args.oauth_google_client_id,
        args.oauth_google_client_secret,
    ) {
        providers = providers.with_google(id, secret);
    }
    if let (Some(id), Some(secret)) = (
        args.oauth_github_client_id,
        args.oauth_github_client_secret,
    ) {
        providers = providers.with_github(id, secret);
    }

    let auth_state = AuthState::new(
        auth_config,
        args.token_secret,
        args.mfa_pepper,
        args.device_salt,
        providers,
    );

    let email_config = EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts);

    api::new(args.port, args.dsn, auth_state, email_config).await
}

/// Handle the action dispatched by the CLI.
///
/// # Errors
/// Returns an error if the server action fails.
pub async fn handle(action: crate::cli::actions::Action) -> Result<()> {
    match action {
        crate::cli::actions::Action::Server(args) => execute(*args).await,
    }
}
