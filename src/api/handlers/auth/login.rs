//! Username/password login.

use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use super::{
    error::AuthError,
    session::issue_session,
    state::AuthState,
    storage::User,
    tokens::TokenPair,
    types::{LoginRequest, ResponseStyle, TokenResponse, UserBody},
    utils::required,
};
use crate::audit::{emit, AuditAction, AuditEvent, RequestMeta};

/// Verify credentials and issue a token pair.
///
/// Unknown users, wrong passwords, and inactive accounts all fail with the
/// same `InvalidCredentials` error, and an unknown user still costs one
/// bcrypt verification.
pub(super) async fn login_with_password(
    state: &AuthState,
    login: Option<&str>,
    password: Option<&str>,
    meta: &RequestMeta,
) -> Result<(TokenPair, User), AuthError> {
    let (Some(login), Some(password)) = (required(login), required(password)) else {
        return Err(AuthError::validation("Username and password are required"));
    };
    let login = login.trim();

    let Some(mut user) = state.store().find_user_by_login(login).await? else {
        state.hasher().verify(password, state.dummy_hash()).await;
        emit(
            state.audit(),
            AuditEvent::new(AuditAction::LoginFailed, meta).new_values(json!({ "username": login })),
        )
        .await;
        return Err(AuthError::InvalidCredentials);
    };

    let verified = state.hasher().verify(password, &user.password_hash).await;
    if !verified || !user.is_active {
        emit(
            state.audit(),
            AuditEvent::new(AuditAction::LoginFailed, meta)
                .subject(user.id)
                .new_values(json!({ "username": user.username })),
        )
        .await;
        return Err(AuthError::InvalidCredentials);
    }

    let now = Utc::now();
    let pair = issue_session(state, &user, now).await?;
    if let Err(err) = state.store().record_login(user.id, now).await {
        error!("Failed to record last login: {err:#}");
    } else {
        user.last_login_at = Some(now);
    }

    emit(
        state.audit(),
        AuditEvent::new(AuditAction::Login, meta)
            .actor(user.id)
            .subject(user.id),
    )
    .await;
    info!(user_id = %user.id, role = user.role.as_str(), "User logged in");
    Ok((pair, user))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenResponse),
        (status = 400, description = "Missing username or password", body = super::error::ErrorBody),
        (status = 401, description = "Invalid credentials", body = super::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(style): Extension<ResponseStyle>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<TokenResponse>, AuthError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let meta = RequestMeta::from_headers(&headers);
    let (pair, user) = login_with_password(
        &state,
        request.username.as_deref(),
        request.password.as_deref(),
        &meta,
    )
    .await?;
    Ok(Json(TokenResponse {
        access: pair.access,
        refresh: pair.refresh,
        user: UserBody::new(&user, style),
    }))
}
