//! Audit trail for security-relevant actions.
//!
//! Handlers describe what happened with an [`AuditEvent`] and hand it to an
//! [`AuditSink`]. Recording never fails the request: sink errors are logged
//! and dropped by [`emit`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, Instrument};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    LoginFailed,
    Logout,
    TokenRefresh,
    UserRegister,
    PasswordChange,
    PasswordResetRequest,
    PasswordReset,
    RoleChanged,
    UserDeactivated,
    UserActivated,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::LoginFailed => "login_failed",
            Self::Logout => "logout",
            Self::TokenRefresh => "token_refresh",
            Self::UserRegister => "user_register",
            Self::PasswordChange => "password_change",
            Self::PasswordResetRequest => "password_reset_request",
            Self::PasswordReset => "password_reset",
            Self::RoleChanged => "role_changed",
            Self::UserDeactivated => "user_deactivated",
            Self::UserActivated => "user_activated",
        }
    }
}

/// Client details attached to every audit record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: crate::api::handlers::auth::extract_client_ip(headers),
            user_agent: crate::api::handlers::auth::extract_user_agent(headers),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub user_id: Option<Uuid>,
    pub entity_type: &'static str,
    pub entity_id: Option<Uuid>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub meta: RequestMeta,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: AuditAction, meta: &RequestMeta) -> Self {
        Self {
            action,
            user_id: None,
            entity_type: "user",
            entity_id: None,
            old_values: None,
            new_values: None,
            meta: meta.clone(),
            occurred_at: Utc::now(),
        }
    }

    /// The acting user.
    #[must_use]
    pub fn actor(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// The user record the action applies to.
    #[must_use]
    pub fn subject(mut self, user_id: Uuid) -> Self {
        self.entity_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn old_values(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    #[must_use]
    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Record an event, logging instead of propagating sink failures.
pub async fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(err) = sink.record(&event).await {
        error!(action = event.action.as_str(), "Failed to record audit event: {err:#}");
    }
}

/// Writes audit events to the `audit_logs` table.
#[derive(Clone, Debug)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        let query = r"
            INSERT INTO audit_logs
                (user_id, action, entity_type, entity_id, old_values, new_values,
                 ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5::jsonb, $6::jsonb, $7, $8, $9)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let old_values = event.old_values.as_ref().map(Value::to_string);
        let new_values = event.new_values.as_ref().map(Value::to_string);
        sqlx::query(query)
            .bind(event.user_id)
            .bind(event.action.as_str())
            .bind(event.entity_type)
            .bind(event.entity_id)
            .bind(old_values)
            .bind(new_values)
            .bind(event.meta.ip_address.as_deref())
            .bind(event.meta.user_agent.as_deref())
            .bind(event.occurred_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert audit log")?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: &AuditEvent) -> Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[test]
    fn action_names_match_serde() -> Result<()> {
        for action in [
            AuditAction::Login,
            AuditAction::LoginFailed,
            AuditAction::PasswordResetRequest,
            AuditAction::UserDeactivated,
        ] {
            assert_eq!(serde_json::to_value(action)?, json!(action.as_str()));
        }
        Ok(())
    }

    #[test]
    fn request_meta_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        let meta = RequestMeta::from_headers(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[tokio::test]
    async fn emit_records_builder_fields() {
        let sink = RecordingSink::default();
        let actor = Uuid::new_v4();
        let subject = Uuid::new_v4();
        emit(
            &sink,
            AuditEvent::new(AuditAction::RoleChanged, &RequestMeta::default())
                .actor(actor)
                .subject(subject)
                .old_values(json!({"role": "client"}))
                .new_values(json!({"role": "staff"})),
        )
        .await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, Some(actor));
        assert_eq!(events[0].entity_id, Some(subject));
        assert_eq!(events[0].new_values, Some(json!({"role": "staff"})));
    }

    #[tokio::test]
    async fn emit_swallows_sink_errors() {
        emit(
            &FailingSink,
            AuditEvent::new(AuditAction::Logout, &RequestMeta::default()),
        )
        .await;
    }
}
