//! Map parsed CLI arguments to an [`Action`].

use anyhow::{Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;
use url::Url;

use crate::api::ServerConfig;
use crate::cli::actions::{seed, server, Action};
use crate::cli::commands::{self, auth};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    if let Some(sub) = matches.subcommand_matches(commands::seed::COMMAND) {
        return Ok(Action::SeedAdmin(seed_args(matches, sub, dsn)?));
    }

    let auth = auth::Options::parse(matches)?.into_config();
    let server = ServerConfig {
        port: matches
            .get_one::<u16>(commands::ARG_PORT)
            .copied()
            .unwrap_or(8080),
        dsn,
        cors_origins: matches
            .get_many::<String>(commands::ARG_CORS_ORIGINS)
            .map(|origins| {
                origins
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        notify_webhook_url: matches
            .get_one::<Url>(commands::ARG_NOTIFY_WEBHOOK_URL)
            .cloned(),
    };

    Ok(Action::Server(server::Args { server, auth }))
}

fn seed_args(matches: &ArgMatches, sub: &ArgMatches, dsn: String) -> Result<seed::Args> {
    let get = |id: &str| sub.get_one::<String>(id).cloned();
    Ok(seed::Args {
        dsn,
        username: get(commands::seed::ARG_USERNAME)
            .context("missing required argument: --username")?,
        email: get(commands::seed::ARG_EMAIL).context("missing required argument: --email")?,
        password: get(commands::seed::ARG_PASSWORD)
            .map(SecretString::from)
            .context("missing required argument: --password")?,
        first_name: get(commands::seed::ARG_FIRST_NAME),
        last_name: get(commands::seed::ARG_LAST_NAME),
        bcrypt_cost: auth::bcrypt_cost(matches),
    })
}
