//! Password reset, password change, and logout.

use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use super::{
    error::AuthError,
    gate::CurrentUser,
    state::AuthState,
    storage::User,
    types::{ChangePasswordRequest, MessageResponse, PasswordResetCompletion, PasswordResetRequest},
    utils::{build_reset_url, generate_opaque_token, hash_opaque_token, normalize_email, required},
};
use crate::audit::{emit, AuditAction, AuditEvent, RequestMeta};
use crate::notify::{dispatch, Notification, Template};

const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists with that email, a password reset link has been sent";

/// Start a password reset.
///
/// Succeeds identically whether or not the email belongs to a user. Once the
/// lookup finds an account, token issuance, notification, and audit run on a
/// detached task so the response does not wait on them. Failures there are
/// logged and not reported to the caller.
pub(super) async fn request_reset(
    state: Arc<AuthState>,
    email: Option<&str>,
    meta: &RequestMeta,
) -> Result<(), AuthError> {
    let email = required(email).ok_or_else(|| AuthError::validation("Email is required"))?;
    let email = normalize_email(email);

    let Some(user) = state.store().find_user_by_email(&email).await? else {
        return Ok(());
    };

    let meta = meta.clone();
    tokio::spawn(async move {
        if let Err(err) = issue_reset_token(&state, &user).await {
            error!("Failed to issue password reset token: {err:#}");
            return;
        }

        emit(
            state.audit(),
            AuditEvent::new(AuditAction::PasswordResetRequest, &meta).subject(user.id),
        )
        .await;
    });
    Ok(())
}

async fn issue_reset_token(state: &AuthState, user: &User) -> anyhow::Result<()> {
    let now = Utc::now();
    let expires_at = now + state.config().reset_token_ttl();
    let token = generate_opaque_token()?;
    state
        .store()
        .insert_reset_token(user.id, &hash_opaque_token(&token), now, expires_at)
        .await?;

    dispatch(
        state.notifier(),
        Notification {
            email: user.email.clone(),
            template: Template::PasswordReset,
            data: json!({
                "username": user.username,
                "first_name": user.first_name,
                "reset_url": build_reset_url(state.config().frontend_base_url(), &token),
                "expires_at": expires_at,
            }),
        },
    );
    Ok(())
}

/// Finish a reset: consume the token, set the password, revoke sessions.
pub(super) async fn complete_reset(
    state: &AuthState,
    token: Option<&str>,
    new_password: Option<&str>,
    meta: &RequestMeta,
) -> Result<(), AuthError> {
    let (Some(token), Some(new_password)) = (required(token), required(new_password)) else {
        return Err(AuthError::validation("Token and new password are required"));
    };

    let password_hash = state.hasher().hash(new_password).await?;
    let user_id = state
        .store()
        .complete_password_reset(&hash_opaque_token(token.trim()), &password_hash, Utc::now())
        .await?
        .ok_or(AuthError::InvalidResetToken)?;

    emit(
        state.audit(),
        AuditEvent::new(AuditAction::PasswordReset, meta)
            .actor(user_id)
            .subject(user_id),
    )
    .await;
    info!(user_id = %user_id, "Password reset completed");
    Ok(())
}

pub(super) async fn change_password(
    state: &AuthState,
    user: &User,
    current_password: Option<&str>,
    new_password: Option<&str>,
    meta: &RequestMeta,
) -> Result<(), AuthError> {
    let (Some(current_password), Some(new_password)) =
        (required(current_password), required(new_password))
    else {
        return Err(AuthError::validation(
            "Current password and new password are required",
        ));
    };

    if !state
        .hasher()
        .verify(current_password, &user.password_hash)
        .await
    {
        return Err(AuthError::InvalidCredentials);
    }

    let now = Utc::now();
    let password_hash = state.hasher().hash(new_password).await?;
    state
        .store()
        .update_password(user.id, &password_hash, now)
        .await?;

    let revoked = if state.config().revoke_sessions_on_password_change() {
        state.store().revoke_refresh_tokens(user.id, now).await?
    } else {
        0
    };

    emit(
        state.audit(),
        AuditEvent::new(AuditAction::PasswordChange, meta)
            .actor(user.id)
            .subject(user.id)
            .new_values(json!({ "revoked_sessions": revoked })),
    )
    .await;
    Ok(())
}

/// Revoke every outstanding refresh token. Safe to repeat.
pub(super) async fn logout_user(
    state: &AuthState,
    user: &User,
    meta: &RequestMeta,
) -> Result<(), AuthError> {
    let revoked = state
        .store()
        .revoke_refresh_tokens(user.id, Utc::now())
        .await?;
    emit(
        state.audit(),
        AuditEvent::new(AuditAction::Logout, meta)
            .actor(user.id)
            .subject(user.id)
            .new_values(json!({ "revoked_sessions": revoked })),
    )
    .await;
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/auth/password-reset-request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset link sent if the account exists", body = MessageResponse),
        (status = 400, description = "Missing email", body = super::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn password_reset_request(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<PasswordResetRequest>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let meta = RequestMeta::from_headers(&headers);
    request_reset(state, request.email.as_deref(), &meta).await?;
    Ok(Json(MessageResponse::new(RESET_REQUESTED_MESSAGE)))
}

#[utoipa::path(
    post,
    path = "/api/auth/password-reset",
    request_body = PasswordResetCompletion,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Missing fields or invalid/expired token", body = super::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn password_reset(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<PasswordResetCompletion>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let meta = RequestMeta::from_headers(&headers);
    complete_reset(
        &state,
        request.token.as_deref(),
        request.new_password.as_deref(),
        &meta,
    )
    .await?;
    Ok(Json(MessageResponse::new("Password has been reset successfully")))
}

#[utoipa::path(
    post,
    path = "/api/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Missing fields", body = super::error::ErrorBody),
        (status = 401, description = "Current password is wrong", body = super::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn password_change(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    headers: HeaderMap,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let meta = RequestMeta::from_headers(&headers);
    change_password(
        &state,
        &user,
        request.current_password.as_deref(),
        request.new_password.as_deref(),
        &meta,
    )
    .await?;
    Ok(Json(MessageResponse::new("Password changed successfully")))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Refresh tokens revoked", body = MessageResponse),
        (status = 401, description = "Missing or invalid token", body = super::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AuthError> {
    let meta = RequestMeta::from_headers(&headers);
    logout_user(&state, &user, &meta).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}
