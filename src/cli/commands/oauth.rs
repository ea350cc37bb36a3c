use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("oauth-google-client-id")
                .long("oauth-google-client-id")
                .help("Google OAuth client id")
                .env("JANUA_OAUTH_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new("oauth-google-client-secret")
                .long("oauth-google-client-secret")
                .help("Google OAuth client secret")
                .env("JANUA_OAUTH_GOOGLE_CLIENT_SECRET"),
        )
        .arg(
            Arg::new("oauth-github-client-id")
                .long("oauth-github-client-id")
                .help("GitHub OAuth client id")
                .env("JANUA_OAUTH_GITHUB_CLIENT_ID"),
        )
        .arg(
            Arg::new("oauth-github-client-secret")
                .long("oauth-github-client-secret")
                .help("GitHub OAuth client secret")
                .env("JANUA_OAUTH_GITHUB_CLIENT_SECRET"),
        )
        .arg(
            Arg::new("oauth-timeout-seconds")
                .long("oauth-timeout-seconds")
                .help("Timeout for provider token exchange and profile fetch")
                .env("JANUA_OAUTH_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Command;

    #[test]
    fn provider_credentials_are_optional() {
        let command = with_args(Command::new("test"));
        let matches = command
            .try_get_matches_from(vec!["test"])
            .expect("arguments should parse");
        assert!(matches.get_one::<String>("oauth-google-client-id").is_none());
        assert_eq!(
            matches.get_one::<u64>("oauth-timeout-seconds").copied(),
            Some(10)
        );
    }
}
