//! In-memory [`CredentialStore`] for handler tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::storage::{
    ConflictField, CredentialStore, InsertUserOutcome, NewUser, RefreshTokenRecord,
    ResetTokenRecord, User, UserUpdate,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    refresh_tokens: Vec<RefreshTokenRecord>,
    reset_tokens: Vec<ResetTokenRecord>,
    fail_refresh_inserts: bool,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, user: User) {
        self.lock().users.push(user);
    }

    pub(crate) fn user(&self, id: Uuid) -> Option<User> {
        self.lock().users.iter().find(|user| user.id == id).cloned()
    }

    pub(crate) fn reset_tokens(&self) -> Vec<ResetTokenRecord> {
        self.lock().reset_tokens.clone()
    }

    pub(crate) fn refresh_tokens(&self) -> Vec<RefreshTokenRecord> {
        self.lock().refresh_tokens.clone()
    }

    /// Push every reset token's expiry to `expires_at`.
    pub(crate) fn expire_reset_tokens(&self, expires_at: DateTime<Utc>) {
        for token in &mut self.lock().reset_tokens {
            token.expires_at = expires_at;
        }
    }

    /// Make every refresh token write fail until switched back off.
    pub(crate) fn fail_refresh_inserts(&self, fail: bool) {
        self.lock().fail_refresh_inserts = fail;
    }

    pub(crate) fn expire_refresh_tokens(&self, expires_at: DateTime<Utc>) {
        for token in &mut self.lock().refresh_tokens {
            token.expires_at = expires_at;
        }
    }
}

fn revoke_all(tables: &mut Tables, user_id: Uuid, now: DateTime<Utc>) -> u64 {
    let mut revoked = 0;
    for token in &mut tables.refresh_tokens {
        if token.user_id == user_id && token.revoked_at.is_none() {
            token.revoked_at = Some(now);
            revoked += 1;
        }
    }
    revoked
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.user(id))
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let tables = self.lock();
        let by_username = tables.users.iter().find(|user| user.username == login);
        let lowered = login.to_lowercase();
        Ok(by_username
            .or_else(|| tables.users.iter().find(|user| user.email == lowered))
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let lowered = email.to_lowercase();
        Ok(self
            .lock()
            .users
            .iter()
            .find(|user| user.email == lowered)
            .cloned())
    }

    async fn find_conflict(&self, username: &str, email: &str) -> Result<Option<ConflictField>> {
        let tables = self.lock();
        if tables.users.iter().any(|user| user.username == username) {
            return Ok(Some(ConflictField::Username));
        }
        if tables.users.iter().any(|user| user.email == email) {
            return Ok(Some(ConflictField::Email));
        }
        Ok(None)
    }

    async fn insert_user(&self, user: NewUser) -> Result<InsertUserOutcome> {
        let mut tables = self.lock();
        if tables.users.iter().any(|existing| existing.username == user.username) {
            return Ok(InsertUserOutcome::Conflict(ConflictField::Username));
        }
        if tables.users.iter().any(|existing| existing.email == user.email) {
            return Ok(InsertUserOutcome::Conflict(ConflictField::Email));
        }
        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            first_name: user.first_name,
            last_name: user.last_name,
            is_active: true,
            must_change_password: user.must_change_password,
            two_factor_enabled: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(created.clone());
        Ok(InsertUserOutcome::Created(created))
    }

    async fn update_user(
        &self,
        id: Uuid,
        update: UserUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut tables = self.lock();
        let Some(user) = tables.users.iter_mut().find(|user| user.id == id) else {
            return Ok(None);
        };
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(is_active) = update.is_active {
            user.is_active = is_active;
        }
        user.updated_at = now;
        Ok(Some(user.clone()))
    }

    async fn list_active_users(&self) -> Result<Vec<User>> {
        Ok(self
            .lock()
            .users
            .iter()
            .filter(|user| user.is_active)
            .cloned()
            .collect())
    }

    async fn record_login(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        if let Some(user) = self.lock().users.iter_mut().find(|user| user.id == id) {
            user.last_login_at = Some(now);
        }
        Ok(())
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(user) = self.lock().users.iter_mut().find(|user| user.id == id) {
            password_hash.clone_into(&mut user.password_hash);
            user.must_change_password = false;
            user.updated_at = now;
        }
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.lock();
        if tables.fail_refresh_inserts {
            anyhow::bail!("refresh token insert failed");
        }
        tables.refresh_tokens.push(RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_vec(),
            issued_at,
            expires_at,
            revoked_at: None,
        });
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &[u8],
        successor_hash: &[u8],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut tables = self.lock();
        let Some(index) = tables
            .refresh_tokens
            .iter()
            .position(|token| token.token_hash == token_hash && token.is_usable(now))
        else {
            return Ok(None);
        };
        if tables.fail_refresh_inserts {
            anyhow::bail!("refresh token insert failed");
        }
        let token = &mut tables.refresh_tokens[index];
        token.revoked_at = Some(now);
        let user_id = token.user_id;
        tables.refresh_tokens.push(RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: successor_hash.to_vec(),
            issued_at: now,
            expires_at,
            revoked_at: None,
        });
        Ok(Some(user_id))
    }

    async fn latest_refresh_token(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>> {
        Ok(self
            .lock()
            .refresh_tokens
            .iter()
            .filter(|token| token.user_id == user_id && token.is_usable(now))
            .max_by_key(|token| token.issued_at)
            .cloned())
    }

    async fn revoke_refresh_tokens(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        Ok(revoke_all(&mut self.lock(), user_id, now))
    }

    async fn prune_refresh_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.lock();
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|token| {
            token.expires_at >= cutoff && token.revoked_at.map_or(true, |at| at >= cutoff)
        });
        Ok((before - tables.refresh_tokens.len()) as u64)
    }

    async fn insert_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.lock().reset_tokens.push(ResetTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_vec(),
            expires_at,
            used_at: None,
            created_at,
        });
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut tables = self.lock();
        let Some(token) = tables
            .reset_tokens
            .iter_mut()
            .find(|token| token.token_hash == token_hash && token.is_redeemable(now))
        else {
            return Ok(None);
        };
        token.used_at = Some(now);
        let user_id = token.user_id;

        if let Some(user) = tables.users.iter_mut().find(|user| user.id == user_id) {
            password_hash.clone_into(&mut user.password_hash);
            user.must_change_password = false;
            user.updated_at = now;
        }
        revoke_all(&mut tables, user_id, now);
        Ok(Some(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::role::Role;
    use crate::api::handlers::auth::storage::test_user;
    use chrono::Duration;

    fn store_with(user: &User) -> MemoryStore {
        let store = MemoryStore::default();
        store.insert(user.clone());
        store
    }

    #[tokio::test]
    async fn refresh_rotation_fails_at_expiry_instant() -> Result<()> {
        let user = test_user("alice", Role::Client);
        let store = store_with(&user);
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::days(7);
        store
            .insert_refresh_token(user.id, b"presented", issued_at, expires_at)
            .await?;

        let rotated = store
            .rotate_refresh_token(
                b"presented",
                b"successor",
                expires_at,
                expires_at + Duration::days(7),
            )
            .await?;
        assert_eq!(rotated, None);
        assert_eq!(store.refresh_tokens().len(), 1);

        let just_before = expires_at - Duration::seconds(1);
        let rotated = store
            .rotate_refresh_token(
                b"presented",
                b"successor",
                just_before,
                just_before + Duration::days(7),
            )
            .await?;
        assert_eq!(rotated, Some(user.id));
        Ok(())
    }

    #[tokio::test]
    async fn password_reset_fails_at_expiry_instant() -> Result<()> {
        let user = test_user("alice", Role::Client);
        let store = store_with(&user);
        let created_at = Utc::now();
        let expires_at = created_at + Duration::hours(1);
        store
            .insert_reset_token(user.id, b"reset", created_at, expires_at)
            .await?;

        let completed = store
            .complete_password_reset(b"reset", "new-hash", expires_at)
            .await?;
        assert_eq!(completed, None);
        assert!(store.reset_tokens()[0].used_at.is_none());
        assert_eq!(
            store.user(user.id).map(|user| user.password_hash),
            Some(user.password_hash.clone())
        );

        let completed = store
            .complete_password_reset(b"reset", "new-hash", expires_at - Duration::seconds(1))
            .await?;
        assert_eq!(completed, Some(user.id));
        assert_eq!(
            store.user(user.id).map(|user| user.password_hash),
            Some("new-hash".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn password_reset_revokes_refresh_tokens() -> Result<()> {
        let user = test_user("alice", Role::Client);
        let store = store_with(&user);
        let now = Utc::now();
        store
            .insert_refresh_token(user.id, b"session", now, now + Duration::days(7))
            .await?;
        store
            .insert_reset_token(user.id, b"reset", now, now + Duration::hours(1))
            .await?;

        store.complete_password_reset(b"reset", "new-hash", now).await?;
        assert!(store
            .refresh_tokens()
            .iter()
            .all(|token| token.revoked_at == Some(now)));
        Ok(())
    }
}
