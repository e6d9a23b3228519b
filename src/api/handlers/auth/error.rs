//! Single error type for the auth surface and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use super::storage::ConflictField;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("missing token")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidAccessToken,
    #[error("user not found or inactive")]
    InactiveUser,
    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidResetToken,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("Record not found")]
    NotFound,
    #[error("A record with this value already exists")]
    Duplicate(ConflictField),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// JSON error body. `field` is only set for uniqueness conflicts.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<ConflictField>,
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidResetToken => StatusCode::BAD_REQUEST,
            Self::MissingToken
            | Self::InvalidAccessToken
            | Self::InactiveUser
            | Self::InvalidRefreshToken
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Duplicate(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn validation(message: &str) -> Self {
        Self::Validation(message.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Internal(err) => {
                error!("Internal error: {err:#}");
                ErrorBody {
                    error: "Internal server error".to_string(),
                    field: None,
                }
            }
            Self::Duplicate(field) => ErrorBody {
                error: self.to_string(),
                field: Some(*field),
            },
            _ => ErrorBody {
                error: self.to_string(),
                field: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
