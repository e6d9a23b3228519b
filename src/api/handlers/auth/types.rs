//! Request and response payloads.
//!
//! Requests accept both `camelCase` and `snake_case` field names. Responses
//! render users according to the [`ResponseStyle`] of the route group that
//! served them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::role::Role;
use super::storage::User;

/// Field naming for user payloads, chosen per route group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseStyle {
    /// `/api/auth/*` and `/api/users/*`: `snake_case`.
    #[default]
    Legacy,
    /// `/api/v1/users/*`: `camelCase`.
    V1,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SnakeUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub must_change_password: bool,
    pub two_factor_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CamelUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub must_change_password: bool,
    pub two_factor_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Public view of a user. Never includes the password hash.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum UserBody {
    Legacy(SnakeUser),
    V1(CamelUser),
}

impl UserBody {
    #[must_use]
    pub fn new(user: &User, style: ResponseStyle) -> Self {
        match style {
            ResponseStyle::Legacy => Self::Legacy(SnakeUser {
                id: user.id,
                username: user.username.clone(),
                email: user.email.clone(),
                role: user.role,
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                is_active: user.is_active,
                must_change_password: user.must_change_password,
                two_factor_enabled: user.two_factor_enabled,
                last_login_at: user.last_login_at,
                created_at: user.created_at,
            }),
            ResponseStyle::V1 => Self::V1(CamelUser {
                id: user.id,
                username: user.username.clone(),
                email: user.email.clone(),
                role: user.role,
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                is_active: user.is_active,
                must_change_password: user.must_change_password,
                two_factor_enabled: user.two_factor_enabled,
                last_login_at: user.last_login_at,
                created_at: user.created_at,
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefreshRequest {
    #[serde(alias = "refreshToken", alias = "refresh_token")]
    pub refresh: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    #[serde(alias = "first_name")]
    pub first_name: Option<String>,
    #[serde(alias = "last_name")]
    pub last_name: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetCompletion {
    pub token: Option<String>,
    #[serde(alias = "new_password")]
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(alias = "current_password")]
    pub current_password: Option<String>,
    #[serde(alias = "new_password")]
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    #[serde(alias = "is_active")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access: String,
    pub refresh: String,
    pub user: UserBody,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub user: UserBody,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user: UserBody,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SnakeSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CamelSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

/// Directory entry for the user listing: identity, names, and role only.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum UserSummary {
    Legacy(SnakeSummary),
    V1(CamelSummary),
}

impl UserSummary {
    #[must_use]
    pub fn new(user: &User, style: ResponseStyle) -> Self {
        match style {
            ResponseStyle::Legacy => Self::Legacy(SnakeSummary {
                id: user.id,
                username: user.username.clone(),
                email: user.email.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                role: user.role,
            }),
            ResponseStyle::V1 => Self::V1(CamelSummary {
                id: user.id,
                username: user.username.clone(),
                email: user.email.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                role: user.role,
            }),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub(crate) fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}
