//! Auth state and configuration.

use anyhow::Result;
use chrono::Duration;
use secrecy::SecretString;
use std::sync::Arc;

use super::password::{PasswordHasher, DEFAULT_BCRYPT_COST};
use super::storage::CredentialStore;
use super::tokens::{TokenIssuer, DEFAULT_ACCESS_TOKEN_TTL_SECONDS, DEFAULT_REFRESH_TOKEN_TTL_SECONDS};
use crate::audit::AuditSink;
use crate::notify::Notifier;

const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_REFRESH_TOKEN_RETENTION_DAYS: i64 = 30;

/// Minimum accepted signing secret length in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    jwt_previous_secret: Option<SecretString>,
    frontend_base_url: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    bcrypt_cost: u32,
    legacy_refresh_fallback: bool,
    revoke_sessions_on_password_change: bool,
    refresh_token_retention_days: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString, frontend_base_url: String) -> Self {
        Self {
            jwt_secret,
            jwt_previous_secret: None,
            frontend_base_url,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            legacy_refresh_fallback: false,
            revoke_sessions_on_password_change: true,
            refresh_token_retention_days: DEFAULT_REFRESH_TOKEN_RETENTION_DAYS,
        }
    }

    #[must_use]
    pub fn with_jwt_previous_secret(mut self, secret: Option<SecretString>) -> Self {
        self.jwt_previous_secret = secret;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub fn with_legacy_refresh_fallback(mut self, enabled: bool) -> Self {
        self.legacy_refresh_fallback = enabled;
        self
    }

    #[must_use]
    pub fn with_revoke_sessions_on_password_change(mut self, enabled: bool) -> Self {
        self.revoke_sessions_on_password_change = enabled;
        self
    }

    #[must_use]
    pub fn with_refresh_token_retention_days(mut self, days: i64) -> Self {
        self.refresh_token_retention_days = days;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn reset_token_ttl(&self) -> Duration {
        Duration::seconds(self.reset_token_ttl_seconds.max(1))
    }

    #[must_use]
    pub fn legacy_refresh_fallback(&self) -> bool {
        self.legacy_refresh_fallback
    }

    #[must_use]
    pub fn revoke_sessions_on_password_change(&self) -> bool {
        self.revoke_sessions_on_password_change
    }

    #[must_use]
    pub fn refresh_token_retention(&self) -> Duration {
        Duration::days(self.refresh_token_retention_days.max(1))
    }

    fn token_issuer(&self) -> TokenIssuer {
        TokenIssuer::new(&self.jwt_secret, self.jwt_previous_secret.as_ref())
            .with_access_ttl_seconds(self.access_token_ttl_seconds)
            .with_refresh_ttl_seconds(self.refresh_token_ttl_seconds)
    }
}

/// Everything the auth handlers need, shared behind an `Arc`.
pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    tokens: TokenIssuer,
    hasher: PasswordHasher,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    // Verified against when the login name is unknown so both paths cost one bcrypt.
    dummy_hash: String,
}

impl AuthState {
    /// # Errors
    /// Returns an error if the placeholder password hash cannot be computed.
    pub async fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let hasher = PasswordHasher::new(config.bcrypt_cost);
        let dummy_hash = hasher.hash("safehaven-placeholder-password").await?;
        Ok(Self {
            tokens: config.token_issuer(),
            config,
            store,
            hasher,
            notifier,
            audit,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn store_handle(&self) -> Arc<dyn CredentialStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    #[must_use]
    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    #[must_use]
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }

    #[must_use]
    pub fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    pub(super) fn dummy_hash(&self) -> &str {
        &self.dummy_hash
    }
}
