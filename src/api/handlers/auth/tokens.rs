//! Access and refresh token issuance.
//!
//! Access tokens are HS256 JWTs verified without a database round trip.
//! Refresh tokens are opaque random strings; only their SHA-256 hash is
//! persisted, alongside the owner and an absolute expiry.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::role::Role;
use super::storage::{CredentialStore, User};
use super::utils::{generate_opaque_token, hash_opaque_token};

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("malformed token")]
    Malformed,
    #[error("failed to sign token")]
    Signing,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::BadSignature,
            _ => Self::Malformed,
        }
    }
}

/// A freshly minted access/refresh pair.
#[derive(Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .finish()
    }
}

/// Signs and verifies access tokens and mints refresh tokens.
///
/// Verification accepts the current secret and, during a rotation window,
/// the previous one. Signing always uses the current secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: Vec<DecodingKey>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("keys", &self.decoding.len())
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &SecretString, previous: Option<&SecretString>) -> Self {
        let current = secret.expose_secret().as_bytes();
        let mut decoding = vec![DecodingKey::from_secret(current)];
        if let Some(previous) = previous {
            decoding.push(DecodingKey::from_secret(previous.expose_secret().as_bytes()));
        }
        Self {
            encoding: EncodingKey::from_secret(current),
            decoding,
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl = Duration::seconds(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl = Duration::seconds(seconds.max(1));
        self
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign an access token for `user`, issued at `now`.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if the JWT cannot be encoded.
    pub fn issue_access_token(&self, user: &User, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = AccessClaims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Signing)
    }

    /// Verify signature and expiry. A token is rejected once `now >= exp`.
    ///
    /// # Errors
    /// Returns the first non-signature failure, or [`TokenError::BadSignature`]
    /// when no configured secret matches.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let claims = self.decode(token, &validation)?;
        // jsonwebtoken accepts exp == now; treat the boundary as expired.
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Verify the signature only, accepting expired tokens.
    ///
    /// Used by the bearer fallback on the refresh endpoint.
    ///
    /// # Errors
    /// Returns an error for malformed tokens or signature mismatches.
    pub fn decode_ignoring_expiry(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub"]);
        self.decode(token, &validation)
    }

    fn decode(&self, token: &str, validation: &Validation) -> Result<AccessClaims, TokenError> {
        let mut last = TokenError::BadSignature;
        for key in &self.decoding {
            match jsonwebtoken::decode::<AccessClaims>(token, key, validation) {
                Ok(data) => return Ok(data.claims),
                Err(err) => match TokenError::from(err) {
                    TokenError::BadSignature => last = TokenError::BadSignature,
                    other => return Err(other),
                },
            }
        }
        Err(last)
    }

    /// Mint a refresh token and persist its hash with an absolute expiry.
    ///
    /// # Errors
    /// Returns an error if randomness or the store insert fails.
    pub async fn issue_refresh_token(
        &self,
        store: &dyn CredentialStore,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let token = generate_opaque_token()?;
        let token_hash = hash_opaque_token(&token);
        store
            .insert_refresh_token(user_id, &token_hash, now, now + self.refresh_ttl)
            .await
            .context("failed to persist refresh token")?;
        Ok(token)
    }

    /// Exchange a presented refresh token for a fresh one.
    ///
    /// Returns the owner and the new raw token, or `None` when the presented
    /// hash is not usable at `now`.
    ///
    /// # Errors
    /// Returns an error if randomness or the store rotation fails.
    pub async fn rotate_refresh_token(
        &self,
        store: &dyn CredentialStore,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<(Uuid, String)>> {
        let token = generate_opaque_token()?;
        let user_id = store
            .rotate_refresh_token(
                token_hash,
                &hash_opaque_token(&token),
                now,
                now + self.refresh_ttl,
            )
            .await
            .context("failed to rotate refresh token")?;
        Ok(user_id.map(|user_id| (user_id, token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::memory::MemoryStore;
    use crate::api::handlers::auth::storage::test_user;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&secret("an-access-token-secret-of-32-bytes!"), None)
    }

    #[test]
    fn access_token_round_trip() -> Result<(), TokenError> {
        let issuer = issuer();
        let user = test_user("alice", Role::Therapist);
        let token = issuer.issue_access_token(&user, Utc::now())?;
        let claims = issuer.verify_access_token(&token)?;
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::Therapist);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, DEFAULT_ACCESS_TOKEN_TTL_SECONDS);
        Ok(())
    }

    #[test]
    fn expired_access_token_rejected() -> Result<(), TokenError> {
        let issuer = issuer();
        let user = test_user("alice", Role::Client);
        let token = issuer.issue_access_token(&user, Utc::now() - Duration::minutes(20))?;
        assert_eq!(issuer.verify_access_token(&token), Err(TokenError::Expired));
        Ok(())
    }

    #[test]
    fn expiry_boundary_is_exclusive() -> Result<(), TokenError> {
        let issuer = issuer().with_access_ttl_seconds(60);
        let user = test_user("alice", Role::Client);
        let token = issuer.issue_access_token(&user, Utc::now() - Duration::seconds(60))?;
        assert_eq!(issuer.verify_access_token(&token), Err(TokenError::Expired));
        Ok(())
    }

    #[test]
    fn wrong_secret_rejected() -> Result<(), TokenError> {
        let user = test_user("alice", Role::Admin);
        let other = TokenIssuer::new(&secret("a-completely-different-secret-value"), None);
        let token = other.issue_access_token(&user, Utc::now())?;
        assert_eq!(
            issuer().verify_access_token(&token),
            Err(TokenError::BadSignature)
        );
        Ok(())
    }

    #[test]
    fn previous_secret_still_verifies() -> Result<(), TokenError> {
        let old = secret("the-old-secret-that-is-being-rotated");
        let new = secret("the-new-secret-that-replaces-the-old");
        let user = test_user("alice", Role::Staff);
        let token = TokenIssuer::new(&old, None).issue_access_token(&user, Utc::now())?;

        let rotated = TokenIssuer::new(&new, Some(&old));
        assert_eq!(rotated.verify_access_token(&token)?.sub, user.id);

        let without_previous = TokenIssuer::new(&new, None);
        assert_eq!(
            without_previous.verify_access_token(&token),
            Err(TokenError::BadSignature)
        );
        Ok(())
    }

    #[test]
    fn malformed_token_rejected() {
        assert_eq!(
            issuer().verify_access_token("not.a.jwt"),
            Err(TokenError::Malformed)
        );
        assert_eq!(issuer().verify_access_token(""), Err(TokenError::Malformed));
    }

    #[test]
    fn decode_ignoring_expiry_accepts_expired() -> Result<(), TokenError> {
        let issuer = issuer();
        let user = test_user("alice", Role::Client);
        let token = issuer.issue_access_token(&user, Utc::now() - Duration::days(2))?;
        assert_eq!(issuer.decode_ignoring_expiry(&token)?.sub, user.id);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_is_stored_hashed() -> Result<()> {
        let store = MemoryStore::default();
        let user = test_user("alice", Role::Client);
        let now = Utc::now();
        let token = issuer().issue_refresh_token(&store, user.id, now).await?;

        let record = store
            .latest_refresh_token(user.id, now)
            .await?
            .context("refresh token not stored")?;
        assert_eq!(record.token_hash, hash_opaque_token(&token));
        assert_ne!(record.token_hash, token.as_bytes());
        assert_eq!(
            record.expires_at,
            now + Duration::seconds(DEFAULT_REFRESH_TOKEN_TTL_SECONDS)
        );
        Ok(())
    }

    #[tokio::test]
    async fn rotation_replaces_token_once() -> Result<()> {
        let store = MemoryStore::default();
        let user = test_user("alice", Role::Client);
        let now = Utc::now();
        let token = issuer().issue_refresh_token(&store, user.id, now).await?;
        let presented = hash_opaque_token(&token);

        let (owner, successor) = issuer()
            .rotate_refresh_token(&store, &presented, now)
            .await?
            .context("usable token was not rotated")?;
        assert_eq!(owner, user.id);
        assert_ne!(successor, token);

        let latest = store
            .latest_refresh_token(user.id, now)
            .await?
            .context("successor not stored")?;
        assert_eq!(latest.token_hash, hash_opaque_token(&successor));

        assert!(issuer()
            .rotate_refresh_token(&store, &presented, now)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_rotation_keeps_presented_token() -> Result<()> {
        let store = MemoryStore::default();
        let user = test_user("alice", Role::Client);
        let now = Utc::now();
        let token = issuer().issue_refresh_token(&store, user.id, now).await?;
        let presented = hash_opaque_token(&token);

        store.fail_refresh_inserts(true);
        assert!(issuer()
            .rotate_refresh_token(&store, &presented, now)
            .await
            .is_err());
        store.fail_refresh_inserts(false);

        let tokens = store.refresh_tokens();
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].revoked_at.is_none());

        assert!(issuer()
            .rotate_refresh_token(&store, &presented, now)
            .await?
            .is_some());
        Ok(())
    }
}
