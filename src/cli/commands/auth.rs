use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_session_args(command);
    let command = with_mfa_args(command);
    with_outbox_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("token-secret")
                .long("token-secret")
                .help("HS256 signing secret for access and refresh tokens")
                .env("JANUA_TOKEN_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("token-issuer")
                .long("token-issuer")
                .help("Issuer claim embedded in signed tokens")
                .env("JANUA_TOKEN_ISSUER")
                .default_value("janua"),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token lifetime in seconds")
                .env("JANUA_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token and session lifetime in seconds")
                .env("JANUA_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for CORS and password reset links")
                .env("JANUA_FRONTEND_BASE_URL")
                .default_value("https://janua.dev"),
        )
        .arg(
            Arg::new("session-sweep-seconds")
                .long("session-sweep-seconds")
                .help("Interval between expired session sweeps")
                .env("JANUA_SESSION_SWEEP_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("reset-token-ttl-seconds")
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds")
                .env("JANUA_RESET_TOKEN_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("device-salt")
                .long("device-salt")
                .help("Per-install salt mixed into device fingerprints")
                .env("JANUA_DEVICE_SALT")
                .default_value("janua-device"),
        )
}

fn with_mfa_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("mfa-pepper")
                .long("mfa-pepper")
                .help("Server-side pepper for backup code hashes")
                .env("JANUA_MFA_PEPPER")
                .default_value("janua-mfa"),
        )
        .arg(
            Arg::new("mfa-challenge-ttl-seconds")
                .long("mfa-challenge-ttl-seconds")
                .help("Lifetime of a pending MFA challenge in seconds")
                .env("JANUA_MFA_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-outbox-poll-seconds")
                .long("email-outbox-poll-seconds")
                .help("Email outbox poll interval in seconds")
                .env("JANUA_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-batch-size")
                .long("email-outbox-batch-size")
                .help("Email outbox batch size per poll")
                .env("JANUA_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-outbox-max-attempts")
                .long("email-outbox-max-attempts")
                .help("Max attempts before marking an email as failed")
                .env("JANUA_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Command;

    #[test]
    fn token_secret_required() {
        let command = with_args(Command::new("test"));
        let result = temp_env::with_var("JANUA_TOKEN_SECRET", None::<&str>, || {
            command.try_get_matches_from(vec!["test"])
        });
        assert!(result.is_err());
    }

    #[test]
    fn mfa_defaults() {
        let command = with_args(Command::new("test"));
        let matches = command
            .try_get_matches_from(vec!["test", "--token-secret", "s3cret"])
            .expect("arguments should parse");
        assert_eq!(
            matches
                .get_one::<i64>("mfa-challenge-ttl-seconds")
                .copied(),
            Some(300)
        );
        assert_eq!(
            matches.get_one::<String>("mfa-pepper").map(String::as_str),
            Some("janua-mfa")
        );
    }
}
