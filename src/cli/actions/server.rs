use anyhow::Result;
use tracing::info;

use crate::api::{self, handlers::auth::AuthConfig, ServerConfig};

#[derive(Debug)]
pub struct Args {
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

/// Run the HTTP server until shutdown.
///
/// # Errors
/// Returns an error if the database is unreachable or the listener cannot bind.
pub async fn handle(args: Args) -> Result<()> {
    info!(
        port = args.server.port,
        legacy_refresh_fallback = args.auth.legacy_refresh_fallback(),
        revoke_sessions_on_password_change = args.auth.revoke_sessions_on_password_change(),
        "Starting {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    api::new(args.server, args.auth).await
}
