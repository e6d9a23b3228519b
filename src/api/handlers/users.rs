//! User administration: role changes, activation, and listing.

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::auth::{
    AuthError, AuthState, CurrentUser, ResponseStyle, Role, UpdateUserRequest, User, UserBody,
    UserResponse, UserSummary, UserUpdate,
};
use crate::audit::{emit, AuditAction, AuditEvent, RequestMeta};

pub(crate) async fn update_user(
    state: &AuthState,
    actor: &User,
    id: Uuid,
    request: UpdateUserRequest,
    meta: &RequestMeta,
) -> Result<User, AuthError> {
    let role = request
        .role
        .as_deref()
        .map(str::parse::<Role>)
        .transpose()
        .map_err(|_| AuthError::validation("Invalid role"))?;
    let update = UserUpdate {
        role,
        is_active: request.is_active,
    };
    if update.role.is_none() && update.is_active.is_none() {
        return Err(AuthError::validation("No updatable fields supplied"));
    }

    let before = state
        .store()
        .find_user_by_id(id)
        .await?
        .ok_or(AuthError::NotFound)?;
    let now = Utc::now();
    let after = state
        .store()
        .update_user(id, update, now)
        .await?
        .ok_or(AuthError::NotFound)?;

    if before.role != after.role {
        emit(
            state.audit(),
            AuditEvent::new(AuditAction::RoleChanged, meta)
                .actor(actor.id)
                .subject(id)
                .old_values(json!({ "role": before.role }))
                .new_values(json!({ "role": after.role })),
        )
        .await;
        info!(user_id = %id, from = before.role.as_str(), to = after.role.as_str(), "Role changed");
    }

    if before.is_active != after.is_active {
        let action = if after.is_active {
            AuditAction::UserActivated
        } else {
            // Refresh tokens of a deactivated user must not outlive the account.
            state.store().revoke_refresh_tokens(id, now).await?;
            AuditAction::UserDeactivated
        };
        emit(
            state.audit(),
            AuditEvent::new(action, meta)
                .actor(actor.id)
                .subject(id)
                .old_values(json!({ "is_active": before.is_active }))
                .new_values(json!({ "is_active": after.is_active })),
        )
        .await;
    }

    Ok(after)
}

#[utoipa::path(
    patch,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Invalid role or empty update", body = super::auth::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = super::auth::ErrorBody),
        (status = 404, description = "Unknown user", body = super::auth::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn patch_user(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(style): Extension<ResponseStyle>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    payload: Option<Json<UpdateUserRequest>>,
) -> Result<Json<UserResponse>, AuthError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let meta = RequestMeta::from_headers(&headers);
    let user = update_user(&state, &actor, id, request, &meta).await?;
    Ok(Json(UserResponse {
        user: UserBody::new(&user, style),
    }))
}

#[utoipa::path(
    get,
    path = "/api/auth",
    responses(
        (status = 200, description = "Active users", body = [UserSummary]),
        (status = 401, description = "Missing or invalid token", body = super::auth::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(style): Extension<ResponseStyle>,
) -> Result<Json<Vec<UserSummary>>, AuthError> {
    let users = state.store().list_active_users().await?;
    Ok(Json(
        users
            .iter()
            .map(|user| UserSummary::new(user, style))
            .collect(),
    ))
}
