//! Credential persistence: users, refresh tokens and password reset tokens.
//!
//! Handlers talk to a [`CredentialStore`]; [`PgStore`] is the Postgres
//! implementation used by the server. Token columns only ever hold SHA-256
//! hashes.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::fmt;
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::role::Role;
use super::utils::{is_unique_violation, violated_constraint};

const USER_COLUMNS: &str = "id, username, email, password_hash, role, first_name, last_name, \
     is_active, must_change_password, two_factor_enabled, last_login_at, created_at, updated_at";

#[derive(Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub must_change_password: bool,
    pub two_factor_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .field("password_hash", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Fields for a user about to be inserted.
#[derive(Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub must_change_password: bool,
}

/// Which unique field a registration collided with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConflictField {
    Username,
    Email,
}

impl ConflictField {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Email => "email",
        }
    }

    fn from_constraint(constraint: &str) -> Option<Self> {
        match constraint {
            "users_username_key" => Some(Self::Username),
            "users_email_key" => Some(Self::Email),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum InsertUserOutcome {
    Created(User),
    Conflict(ConflictField),
}

/// Admin-editable user fields. `None` leaves the column untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct UserUpdate {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    /// Unrevoked and strictly before expiry.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

#[derive(Clone, Debug)]
pub struct ResetTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ResetTokenRecord {
    #[must_use]
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Liveness check used by the health endpoint.
    async fn ping(&self) -> Result<()>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Match on username, or on email case-insensitively.
    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Report the first field already taken, username before email.
    async fn find_conflict(&self, username: &str, email: &str) -> Result<Option<ConflictField>>;

    async fn insert_user(&self, user: NewUser) -> Result<InsertUserOutcome>;

    async fn update_user(
        &self,
        id: Uuid,
        update: UserUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<User>>;

    async fn list_active_users(&self) -> Result<Vec<User>>;

    async fn record_login(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Replace the password hash and clear the forced-change flag.
    async fn update_password(&self, id: Uuid, password_hash: &str, now: DateTime<Utc>)
        -> Result<()>;

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Revoke a usable refresh token and store its successor in one
    /// transaction, returning the owner.
    ///
    /// Returns `None` when `token_hash` is unknown, revoked, or expired, so two
    /// concurrent redemptions of the same token cannot both succeed. If the
    /// successor cannot be stored the presented token stays usable.
    async fn rotate_refresh_token(
        &self,
        token_hash: &[u8],
        successor_hash: &[u8],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Uuid>>;

    /// Most recently issued usable refresh token for a user.
    async fn latest_refresh_token(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>>;

    /// Revoke every outstanding refresh token for a user.
    async fn revoke_refresh_tokens(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64>;

    /// Delete refresh tokens that expired or were revoked before `cutoff`.
    async fn prune_refresh_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn insert_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Consume a reset token, set the new password and revoke refresh tokens.
    ///
    /// All three happen together or not at all. Returns the user id, or
    /// `None` if the token is unknown, used, or expired.
    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>>;
}

/// Postgres-backed [`CredentialStore`].
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_user(&self, filter: &str, value: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users {filter}");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user")?;
        row.as_ref().map(user_from_row).transpose()
    }
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: role
            .parse()
            .map_err(|err| anyhow!("invalid role stored for user: {err}"))?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        is_active: row.try_get("is_active")?,
        must_change_password: row.try_get("must_change_password")?,
        two_factor_enabled: row.try_get("two_factor_enabled")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        // Prefer the username match if one login string hits two rows.
        self.fetch_user(
            "WHERE username = $1 OR email = lower($1) ORDER BY (username = $1) DESC LIMIT 1",
            login,
        )
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.fetch_user("WHERE email = lower($1)", email).await
    }

    async fn find_conflict(&self, username: &str, email: &str) -> Result<Option<ConflictField>> {
        let query = "SELECT username FROM users WHERE username = $1 OR email = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(username)
            .bind(email)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to check for existing user")?;

        if rows.is_empty() {
            return Ok(None);
        }
        let username_taken = rows
            .iter()
            .any(|row| row.try_get::<String, _>("username").is_ok_and(|taken| taken == username));
        Ok(Some(if username_taken {
            ConflictField::Username
        } else {
            ConflictField::Email
        }))
    }

    async fn insert_user(&self, user: NewUser) -> Result<InsertUserOutcome> {
        let query = format!(
            "INSERT INTO users \
             (username, email, password_hash, role, first_name, last_name, must_change_password) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {USER_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let result = sqlx::query(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.must_change_password)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(row) => Ok(InsertUserOutcome::Created(user_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => {
                let field = violated_constraint(&err)
                    .as_deref()
                    .and_then(ConflictField::from_constraint)
                    .unwrap_or(ConflictField::Username);
                Ok(InsertUserOutcome::Conflict(field))
            }
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn update_user(
        &self,
        id: Uuid,
        update: UserUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let query = format!(
            "UPDATE users SET role = COALESCE($2, role), is_active = COALESCE($3, is_active), \
             updated_at = $4 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(update.role.map(Role::as_str))
            .bind(update.is_active)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to update user")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_active_users(&self) -> Result<Vec<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = TRUE ORDER BY created_at DESC"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list users")?;
        rows.iter().map(user_from_row).collect()
    }

    async fn record_login(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE users SET last_login_at = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login")?;
        Ok(())
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let query = "UPDATE users SET password_hash = $2, must_change_password = FALSE, \
             updated_at = $3 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update password")?;
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = "INSERT INTO refresh_tokens (user_id, token_hash, issued_at, expires_at) \
             VALUES ($1, $2, $3, $4)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(issued_at)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token")?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &[u8],
        successor_hash: &[u8],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin refresh rotation transaction")?;

        let query = "UPDATE refresh_tokens SET revoked_at = $2 \
             WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2 \
             RETURNING user_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to redeem refresh token")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user_id: Uuid = row.get("user_id");

        let query = "INSERT INTO refresh_tokens (user_id, token_hash, issued_at, expires_at) \
             VALUES ($1, $2, $3, $4)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(successor_hash)
            .bind(now)
            .bind(expires_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert rotated refresh token")?;

        tx.commit()
            .await
            .context("commit refresh rotation transaction")?;
        Ok(Some(user_id))
    }

    async fn latest_refresh_token(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>> {
        let query = "SELECT id, user_id, token_hash, issued_at, expires_at, revoked_at \
             FROM refresh_tokens \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2 \
             ORDER BY issued_at DESC LIMIT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup refresh token")?;
        Ok(row.map(|row| RefreshTokenRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            token_hash: row.get("token_hash"),
            issued_at: row.get("issued_at"),
            expires_at: row.get("expires_at"),
            revoked_at: row.get("revoked_at"),
        }))
    }

    async fn revoke_refresh_tokens(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let query = "UPDATE refresh_tokens SET revoked_at = $2 \
             WHERE user_id = $1 AND revoked_at IS NULL";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn prune_refresh_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM refresh_tokens WHERE expires_at < $1 OR revoked_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to prune refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn insert_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = "INSERT INTO password_reset_tokens (user_id, token_hash, created_at, expires_at) \
             VALUES ($1, $2, $3, $4)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(created_at)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert password reset token")?;
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin password reset transaction")?;

        let query = "UPDATE password_reset_tokens SET used_at = $2 \
             WHERE token_hash = $1 AND used_at IS NULL AND expires_at > $2 \
             RETURNING user_id";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to consume password reset token")?;

        // Dropping the transaction rolls it back.
        let Some(row) = row else {
            return Ok(None);
        };
        let user_id: Uuid = row.get("user_id");

        let query = "UPDATE users SET password_hash = $2, must_change_password = FALSE, \
             updated_at = $3 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to set password from reset token")?;

        let query = "UPDATE refresh_tokens SET revoked_at = $2 \
             WHERE user_id = $1 AND revoked_at IS NULL";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to revoke refresh tokens after reset")?;

        tx.commit()
            .await
            .context("commit password reset transaction")?;
        Ok(Some(user_id))
    }
}

#[cfg(test)]
pub(crate) fn test_user(username: &str, role: Role) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        password_hash: String::new(),
        role,
        first_name: String::new(),
        last_name: String::new(),
        is_active: true,
        must_change_password: false,
        two_factor_enabled: false,
        last_login_at: None,
        created_at: now,
        updated_at: now,
    }
}
