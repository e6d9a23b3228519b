use anyhow::{bail, Context, Result};
use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

use crate::api::handlers::auth::{AuthConfig, DEFAULT_BCRYPT_COST, MIN_JWT_SECRET_LEN};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_PREVIOUS_SECRET: &str = "jwt-previous-secret";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";
pub const ARG_RESET_TOKEN_TTL_SECONDS: &str = "reset-token-ttl-seconds";
pub const ARG_BCRYPT_COST: &str = "bcrypt-cost";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_LEGACY_REFRESH_FALLBACK: &str = "legacy-refresh-fallback";
pub const ARG_REVOKE_SESSIONS_ON_PASSWORD_CHANGE: &str = "revoke-sessions-on-password-change";
pub const ARG_REFRESH_TOKEN_RETENTION_DAYS: &str = "refresh-token-retention-days";

pub fn with_args(command: Command) -> Command {
    let command = with_signing_args(command);
    let command = with_ttl_args(command);
    with_session_args(command)
}

fn with_signing_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HS256 signing secret for access tokens (at least 32 bytes)")
                .env("SAFEHAVEN_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_JWT_PREVIOUS_SECRET)
                .long(ARG_JWT_PREVIOUS_SECRET)
                .help("Previous signing secret, still accepted for verification during rotation")
                .env("SAFEHAVEN_JWT_PREVIOUS_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_BCRYPT_COST)
                .long(ARG_BCRYPT_COST)
                .help("bcrypt work factor for new password hashes")
                .env("SAFEHAVEN_BCRYPT_COST")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(4..=31)),
        )
}

fn with_ttl_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("SAFEHAVEN_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .long(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .help("Refresh token lifetime in seconds")
                .env("SAFEHAVEN_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RESET_TOKEN_TTL_SECONDS)
                .long(ARG_RESET_TOKEN_TTL_SECONDS)
                .help("Password reset token lifetime in seconds")
                .env("SAFEHAVEN_RESET_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_RETENTION_DAYS)
                .long(ARG_REFRESH_TOKEN_RETENTION_DAYS)
                .help("Days to keep expired or revoked refresh tokens before pruning")
                .env("SAFEHAVEN_REFRESH_TOKEN_RETENTION_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for password reset links")
                .env("SAFEHAVEN_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_LEGACY_REFRESH_FALLBACK)
                .long(ARG_LEGACY_REFRESH_FALLBACK)
                .help("Allow refresh with only an expired bearer token (uses the newest refresh token)")
                .env("SAFEHAVEN_LEGACY_REFRESH_FALLBACK")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_REVOKE_SESSIONS_ON_PASSWORD_CHANGE)
                .long(ARG_REVOKE_SESSIONS_ON_PASSWORD_CHANGE)
                .help("Revoke refresh tokens when a user changes their password")
                .env("SAFEHAVEN_REVOKE_SESSIONS_ON_PASSWORD_CHANGE")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(BoolishValueParser::new()),
        )
}

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub jwt_previous_secret: Option<SecretString>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub bcrypt_cost: u32,
    pub frontend_base_url: String,
    pub legacy_refresh_fallback: bool,
    pub revoke_sessions_on_password_change: bool,
    pub refresh_token_retention_days: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if the signing secret is missing or too short.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .context("missing required argument: --jwt-secret")?;
        let jwt_secret = checked_secret(jwt_secret, ARG_JWT_SECRET)?;
        let jwt_previous_secret = matches
            .get_one::<String>(ARG_JWT_PREVIOUS_SECRET)
            .filter(|secret| !secret.is_empty())
            .cloned()
            .map(|secret| checked_secret(secret, ARG_JWT_PREVIOUS_SECRET))
            .transpose()?;

        Ok(Self {
            jwt_secret,
            jwt_previous_secret,
            access_token_ttl_seconds: get_or(matches, ARG_ACCESS_TOKEN_TTL_SECONDS, 900),
            refresh_token_ttl_seconds: get_or(matches, ARG_REFRESH_TOKEN_TTL_SECONDS, 604_800),
            reset_token_ttl_seconds: get_or(matches, ARG_RESET_TOKEN_TTL_SECONDS, 3600),
            bcrypt_cost: bcrypt_cost(matches),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            legacy_refresh_fallback: matches.get_flag(ARG_LEGACY_REFRESH_FALLBACK),
            revoke_sessions_on_password_change: get_or(
                matches,
                ARG_REVOKE_SESSIONS_ON_PASSWORD_CHANGE,
                true,
            ),
            refresh_token_retention_days: get_or(matches, ARG_REFRESH_TOKEN_RETENTION_DAYS, 30),
        })
    }

    #[must_use]
    pub fn into_config(self) -> AuthConfig {
        AuthConfig::new(self.jwt_secret, self.frontend_base_url)
            .with_jwt_previous_secret(self.jwt_previous_secret)
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_refresh_token_ttl_seconds(self.refresh_token_ttl_seconds)
            .with_reset_token_ttl_seconds(self.reset_token_ttl_seconds)
            .with_bcrypt_cost(self.bcrypt_cost)
            .with_legacy_refresh_fallback(self.legacy_refresh_fallback)
            .with_revoke_sessions_on_password_change(self.revoke_sessions_on_password_change)
            .with_refresh_token_retention_days(self.refresh_token_retention_days)
    }
}

/// bcrypt cost on its own, for commands that hash without signing tokens.
#[must_use]
pub fn bcrypt_cost(matches: &ArgMatches) -> u32 {
    get_or(matches, ARG_BCRYPT_COST, DEFAULT_BCRYPT_COST)
}

fn get_or<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str, default: T) -> T {
    matches.get_one::<T>(id).cloned().unwrap_or(default)
}

fn checked_secret(secret: String, arg: &str) -> Result<SecretString> {
    let secret = SecretString::from(secret);
    if secret.expose_secret().len() < MIN_JWT_SECRET_LEN {
        bail!("--{arg} must be at least {MIN_JWT_SECRET_LEN} bytes");
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn command() -> Command {
        with_args(Command::new("safehaven"))
    }

    fn clear_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("SAFEHAVEN_JWT_SECRET", None::<&str>),
                ("SAFEHAVEN_JWT_PREVIOUS_SECRET", None),
                ("SAFEHAVEN_LEGACY_REFRESH_FALLBACK", None),
                ("SAFEHAVEN_REVOKE_SESSIONS_ON_PASSWORD_CHANGE", None),
                ("SAFEHAVEN_ACCESS_TOKEN_TTL_SECONDS", None),
                ("SAFEHAVEN_BCRYPT_COST", None),
            ],
            f,
        );
    }

    #[test]
    fn defaults_apply() {
        clear_env(|| {
            let matches = command().get_matches_from(["safehaven", "--jwt-secret", SECRET]);
            let options = Options::parse(&matches);
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert_eq!(options.access_token_ttl_seconds, 900);
                assert_eq!(options.refresh_token_ttl_seconds, 604_800);
                assert_eq!(options.reset_token_ttl_seconds, 3600);
                assert_eq!(options.bcrypt_cost, 10);
                assert_eq!(options.frontend_base_url, "http://localhost:5173");
                assert!(!options.legacy_refresh_fallback);
                assert!(options.revoke_sessions_on_password_change);
                assert_eq!(options.refresh_token_retention_days, 30);
                assert!(options.jwt_previous_secret.is_none());
            }
        });
    }

    #[test]
    fn secret_is_required_and_checked() {
        clear_env(|| {
            let matches = command().get_matches_from(["safehaven"]);
            let err = Options::parse(&matches).map(|_| ());
            assert!(err.is_err_and(|err| err.to_string().contains("--jwt-secret")));

            let matches = command().get_matches_from(["safehaven", "--jwt-secret", "short"]);
            assert!(Options::parse(&matches).is_err());

            let matches = command().get_matches_from([
                "safehaven",
                "--jwt-secret",
                SECRET,
                "--jwt-previous-secret",
                "short",
            ]);
            assert!(Options::parse(&matches).is_err());
        });
    }

    #[test]
    fn flags_from_env() {
        temp_env::with_vars(
            [
                ("SAFEHAVEN_JWT_SECRET", Some(SECRET)),
                ("SAFEHAVEN_LEGACY_REFRESH_FALLBACK", Some("true")),
                ("SAFEHAVEN_REVOKE_SESSIONS_ON_PASSWORD_CHANGE", Some("false")),
                ("SAFEHAVEN_ACCESS_TOKEN_TTL_SECONDS", Some("60")),
            ],
            || {
                let matches = command().get_matches_from(["safehaven"]);
                let options = Options::parse(&matches);
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert!(options.legacy_refresh_fallback);
                    assert!(!options.revoke_sessions_on_password_change);
                    assert_eq!(options.access_token_ttl_seconds, 60);
                }
            },
        );
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        clear_env(|| {
            let matches = command().get_matches_from(["safehaven", "--jwt-secret", SECRET]);
            let rendered = Options::parse(&matches).map(|options| format!("{options:?}"));
            assert!(rendered.is_ok_and(|rendered| !rendered.contains(SECRET)));
        });
    }

    #[test]
    fn bcrypt_cost_is_bounded() {
        clear_env(|| {
            let result = command().try_get_matches_from(["safehaven", "--bcrypt-cost", "2"]);
            assert!(result.is_err());
            let matches = command().get_matches_from(["safehaven", "--bcrypt-cost", "12"]);
            assert_eq!(bcrypt_cost(&matches), 12);
        });
    }
}
