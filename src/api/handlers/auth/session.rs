//! Bearer authentication and refresh-token rotation.

use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::{
    error::AuthError,
    gate::CurrentUser,
    state::AuthState,
    storage::User,
    tokens::TokenPair,
    types::{RefreshRequest, ResponseStyle, TokenResponse, UserBody, ValidateResponse},
    utils::{extract_bearer_token, hash_opaque_token, required},
};
use crate::audit::{emit, AuditAction, AuditEvent, RequestMeta};

/// Resolve a bearer token into an active user.
///
/// The user record is re-read on every call, so deactivation and role
/// changes apply before the access token expires.
///
/// # Errors
/// `MissingToken` without a token, `InvalidAccessToken` for a bad signature
/// or expiry, `InactiveUser` when the subject is gone or deactivated.
pub(crate) async fn authenticate_bearer(
    state: &AuthState,
    bearer: Option<&str>,
) -> Result<User, AuthError> {
    let token = bearer.ok_or(AuthError::MissingToken)?;
    let claims = state.tokens().verify_access_token(token).map_err(|err| {
        debug!("Rejected access token: {err}");
        AuthError::InvalidAccessToken
    })?;
    match state.store().find_user_by_id(claims.sub).await? {
        Some(user) if user.is_active => Ok(user),
        _ => Err(AuthError::InactiveUser),
    }
}

/// Mint an access token and a persisted refresh token for `user`.
pub(super) async fn issue_session(
    state: &AuthState,
    user: &User,
    now: DateTime<Utc>,
) -> Result<TokenPair, AuthError> {
    let access = state
        .tokens()
        .issue_access_token(user, now)
        .map_err(|err| AuthError::Internal(err.into()))?;
    let refresh = state
        .tokens()
        .issue_refresh_token(state.store(), user.id, now)
        .await?;
    Ok(TokenPair { access, refresh })
}

/// Rotate a refresh token into a new pair.
///
/// The presented token is consumed and its successor stored in one store
/// transaction; replaying it fails. Without a refresh token, and only when the
/// legacy fallback is enabled, an expired but correctly signed bearer token
/// selects the user's newest usable refresh token instead.
pub(super) async fn refresh_session(
    state: &AuthState,
    refresh: Option<&str>,
    bearer: Option<&str>,
    meta: &RequestMeta,
) -> Result<(TokenPair, User), AuthError> {
    let now = Utc::now();

    let token_hash = if let Some(token) = required(refresh) {
        hash_opaque_token(token.trim())
    } else if state.config().legacy_refresh_fallback() {
        let bearer = bearer.ok_or(AuthError::InvalidRefreshToken)?;
        let claims = state
            .tokens()
            .decode_ignoring_expiry(bearer)
            .map_err(|_| AuthError::InvalidRefreshToken)?;
        let record = state
            .store()
            .latest_refresh_token(claims.sub, now)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;
        record.token_hash
    } else {
        return Err(AuthError::InvalidRefreshToken);
    };

    let (user_id, refresh) = state
        .tokens()
        .rotate_refresh_token(state.store(), &token_hash, now)
        .await?
        .ok_or(AuthError::InvalidRefreshToken)?;

    let user = match state.store().find_user_by_id(user_id).await? {
        Some(user) if user.is_active => user,
        _ => return Err(AuthError::InvalidRefreshToken),
    };

    let access = state
        .tokens()
        .issue_access_token(&user, now)
        .map_err(|err| AuthError::Internal(err.into()))?;
    let pair = TokenPair { access, refresh };
    emit(
        state.audit(),
        AuditEvent::new(AuditAction::TokenRefresh, meta)
            .actor(user.id)
            .subject(user.id),
    )
    .await;
    Ok((pair, user))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenResponse),
        (status = 401, description = "Invalid or expired refresh token", body = super::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(style): Extension<ResponseStyle>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<TokenResponse>, AuthError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let bearer = extract_bearer_token(&headers);
    let meta = RequestMeta::from_headers(&headers);
    let (pair, user) =
        refresh_session(&state, request.refresh.as_deref(), bearer.as_deref(), &meta).await?;
    Ok(Json(TokenResponse {
        access: pair.access,
        refresh: pair.refresh,
        user: UserBody::new(&user, style),
    }))
}

#[utoipa::path(
    post,
    path = "/api/auth/validate",
    responses(
        (status = 200, description = "Access token is valid", body = ValidateResponse),
        (status = 401, description = "Missing, invalid, or expired token", body = super::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn validate(
    Extension(style): Extension<ResponseStyle>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<ValidateResponse> {
    Json(ValidateResponse {
        valid: true,
        user: UserBody::new(&user, style),
    })
}

