use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::handlers::auth::{seed_admin, PasswordHasher, PgStore, SeedAdmin, SeedOutcome};

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub username: String,
    pub email: String,
    pub password: SecretString,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bcrypt_cost: u32,
}

/// Create the initial admin account.
///
/// An existing account with the same username or email is left untouched.
///
/// # Errors
/// Returns an error if the database is unreachable or the input is invalid.
pub async fn handle(args: Args) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;
    let store = PgStore::new(pool);
    let hasher = PasswordHasher::new(args.bcrypt_cost);

    let seed = SeedAdmin {
        username: args.username,
        email: args.email,
        password: args.password,
        first_name: args.first_name,
        last_name: args.last_name,
    };

    match seed_admin(&store, &hasher, seed).await? {
        SeedOutcome::Created(user) => {
            info!(user_id = %user.id, username = %user.username, "Admin account created");
        }
        SeedOutcome::Exists(field) => {
            warn!(
                field = field.as_str(),
                "An account with this {} already exists, nothing to do",
                field.as_str()
            );
        }
    }

    Ok(())
}
