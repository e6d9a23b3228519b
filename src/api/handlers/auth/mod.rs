//! Authentication and session core.
//!
//! - `password`: bcrypt hashing on the blocking pool.
//! - `tokens`: HS256 access tokens and opaque, hashed refresh tokens.
//! - `session`: bearer validation and refresh rotation.
//! - `gate`: role checks and the `role_gate` middleware.
//! - `lifecycle`: password reset, password change, logout.
//! - `register`: admin-only user creation and the initial admin seed.
//! - `pruner`: background removal of spent refresh tokens.
//!
//! ## Refresh rotation
//!
//! A refresh token is redeemed with a single conditional `UPDATE` that marks
//! it revoked and returns its owner. Two requests racing with the same token
//! see exactly one success.

mod error;
mod gate;
pub(crate) mod lifecycle;
pub(crate) mod login;
#[cfg(test)]
pub(crate) mod memory;
mod password;
pub mod pruner;
pub(crate) mod register;
mod role;
pub(crate) mod session;
mod state;
mod storage;
mod tokens;
pub(crate) mod types;
mod utils;

pub use error::{AuthError, ErrorBody};
pub use gate::{authorize, role_gate, CurrentUser, RoleGate};
pub use password::{PasswordHasher, DEFAULT_BCRYPT_COST};
pub use register::{seed_admin, SeedAdmin, SeedOutcome};
pub use role::{Role, UnknownRole};
pub use state::{AuthConfig, AuthState, MIN_JWT_SECRET_LEN};
pub use storage::{
    ConflictField, CredentialStore, InsertUserOutcome, NewUser, PgStore, RefreshTokenRecord,
    ResetTokenRecord, User, UserUpdate,
};
pub use tokens::{AccessClaims, TokenError, TokenIssuer, TokenPair};
pub use types::{
    ChangePasswordRequest, LoginRequest, MessageResponse, PasswordResetCompletion,
    PasswordResetRequest, RefreshRequest, RegisterRequest, ResponseStyle, TokenResponse,
    UpdateUserRequest, UserBody, UserResponse, UserSummary, ValidateResponse,
};
pub(crate) use utils::{extract_client_ip, extract_user_agent};

#[cfg(test)]
pub(crate) use storage::test_user;
