//! Administrative user registration.

use anyhow::{bail, Result};
use axum::{extract::Extension, http::HeaderMap, http::StatusCode, Json};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{
    error::AuthError,
    gate::CurrentUser,
    password::PasswordHasher,
    role::Role,
    state::AuthState,
    storage::{ConflictField, CredentialStore, InsertUserOutcome, NewUser, User},
    types::{RegisterRequest, ResponseStyle, UserBody, UserResponse},
    utils::{normalize_email, required, valid_email},
};
use crate::audit::{emit, AuditAction, AuditEvent, RequestMeta};
use crate::notify::{dispatch, Notification, Template};

pub(super) async fn register_user(
    state: &AuthState,
    actor: &User,
    request: RegisterRequest,
    meta: &RequestMeta,
) -> Result<User, AuthError> {
    let (Some(username), Some(email), Some(password)) = (
        required(request.username.as_deref()),
        required(request.email.as_deref()),
        required(request.password.as_deref()),
    ) else {
        return Err(AuthError::validation("Missing required fields"));
    };
    let username = username.trim();
    let email = normalize_email(email);
    if !valid_email(&email) {
        return Err(AuthError::validation("Invalid email"));
    }
    let role = match required(request.role.as_deref()) {
        Some(role) => role
            .parse::<Role>()
            .map_err(|_| AuthError::validation("Invalid role"))?,
        None => Role::default(),
    };

    if let Some(field) = state.store().find_conflict(username, &email).await? {
        return Err(AuthError::Duplicate(field));
    }

    let password_hash = state.hasher().hash(password).await?;
    let new_user = NewUser {
        username: username.to_string(),
        email,
        password_hash,
        role,
        first_name: request.first_name.unwrap_or_default().trim().to_string(),
        last_name: request.last_name.unwrap_or_default().trim().to_string(),
        must_change_password: true,
    };

    // The unique constraints still decide races between concurrent registrations.
    let user = match state.store().insert_user(new_user).await? {
        InsertUserOutcome::Created(user) => user,
        InsertUserOutcome::Conflict(field) => return Err(AuthError::Duplicate(field)),
    };

    if user.role == Role::Client {
        dispatch(
            state.notifier(),
            Notification {
                email: user.email.clone(),
                template: Template::Welcome,
                data: json!({
                    "username": user.username,
                    "first_name": user.first_name,
                    "login_url": state.config().frontend_base_url().trim_end_matches('/'),
                }),
            },
        );
    }

    emit(
        state.audit(),
        AuditEvent::new(AuditAction::UserRegister, meta)
            .actor(actor.id)
            .subject(user.id)
            .new_values(json!({
                "username": user.username,
                "email": user.email,
                "role": user.role,
            })),
    )
    .await;
    info!(user_id = %user.id, role = user.role.as_str(), "User registered");
    Ok(user)
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Missing or invalid fields", body = super::error::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = super::error::ErrorBody),
        (status = 409, description = "Username or email already taken", body = super::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn register(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(style): Extension<ResponseStyle>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    headers: HeaderMap,
    payload: Option<Json<RegisterRequest>>,
) -> Result<(StatusCode, Json<UserResponse>), AuthError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let meta = RequestMeta::from_headers(&headers);
    let user = register_user(&state, &actor, request, &meta).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            user: UserBody::new(&user, style),
        }),
    ))
}

/// Initial administrator created by the `seed-admin` command.
#[derive(Debug)]
pub struct SeedAdmin {
    pub username: String,
    pub email: String,
    pub password: SecretString,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug)]
pub enum SeedOutcome {
    Created(User),
    /// Nothing was written; an account already holds this value.
    Exists(ConflictField),
}

/// Create the first admin account unless the username or email is taken.
///
/// The account is active and does not have to change its password.
///
/// # Errors
/// Returns an error for invalid input or when the store fails.
pub async fn seed_admin(
    store: &dyn CredentialStore,
    hasher: &PasswordHasher,
    seed: SeedAdmin,
) -> Result<SeedOutcome> {
    let username = seed.username.trim();
    let email = normalize_email(&seed.email);
    if username.chars().count() < 3 {
        bail!("Username must be at least 3 characters");
    }
    if !valid_email(&email) {
        bail!("Valid email is required");
    }
    if seed.password.expose_secret().chars().count() < 8 {
        bail!("Password must be at least 8 characters");
    }

    if let Some(field) = store.find_conflict(username, &email).await? {
        return Ok(SeedOutcome::Exists(field));
    }

    let new_user = NewUser {
        username: username.to_string(),
        email,
        password_hash: hasher.hash(seed.password.expose_secret()).await?,
        role: Role::Admin,
        first_name: name_or(seed.first_name, "Super"),
        last_name: name_or(seed.last_name, "Admin"),
        must_change_password: false,
    };
    Ok(match store.insert_user(new_user).await? {
        InsertUserOutcome::Created(user) => SeedOutcome::Created(user),
        InsertUserOutcome::Conflict(field) => SeedOutcome::Exists(field),
    })
}

fn name_or(name: Option<String>, fallback: &str) -> String {
    name.map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
