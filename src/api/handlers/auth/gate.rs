//! Role-based authorization for route groups.
//!
//! Each protected group is wrapped in [`role_gate`] with the set of roles it
//! accepts. The gate authenticates the bearer token, checks the role, and
//! hands the resolved user to the handler as a [`CurrentUser`] extension.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use super::{
    error::AuthError, role::Role, session::authenticate_bearer, state::AuthState, storage::User,
    utils::extract_bearer_token,
};

/// The authenticated caller, inserted by [`role_gate`].
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Roles accepted by a route group.
#[derive(Clone, Copy, Debug)]
pub struct RoleGate {
    allowed: &'static [Role],
}

impl RoleGate {
    #[must_use]
    pub const fn new(allowed: &'static [Role]) -> Self {
        Self { allowed }
    }

    /// Any active user.
    #[must_use]
    pub const fn authenticated() -> Self {
        Self::new(Role::ALL)
    }

    #[must_use]
    pub const fn admin() -> Self {
        Self::new(&[Role::Admin])
    }

    #[must_use]
    pub fn allowed(&self) -> &'static [Role] {
        self.allowed
    }
}

/// Check an authenticated user's role against an allowed set.
///
/// # Errors
/// Returns [`AuthError::Forbidden`] when the role is not in `allowed`.
pub fn authorize(user: &User, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        debug!(role = user.role.as_str(), "Role not permitted for route");
        Err(AuthError::Forbidden)
    }
}

/// Middleware enforcing a [`RoleGate`].
///
/// Expects `Arc<AuthState>` in the request extensions, so the state layer
/// must sit outside this one.
///
/// # Errors
/// 401 for authentication failures, 403 for disallowed roles.
pub async fn role_gate(
    State(gate): State<RoleGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let state = request
        .extensions()
        .get::<Arc<AuthState>>()
        .cloned()
        .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("auth state extension missing")))?;
    let bearer = extract_bearer_token(request.headers());
    let user = authenticate_bearer(&state, bearer.as_deref()).await?;
    authorize(&user, gate.allowed())?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::storage::test_user;

    #[test]
    fn authorize_checks_membership() {
        let staff = test_user("sam", Role::Staff);
        assert!(authorize(&staff, &[Role::Admin, Role::Staff]).is_ok());
        assert!(matches!(
            authorize(&staff, &[Role::Admin]),
            Err(AuthError::Forbidden)
        ));
        assert!(matches!(authorize(&staff, &[]), Err(AuthError::Forbidden)));
    }

    #[test]
    fn authenticated_gate_accepts_every_role() {
        let gate = RoleGate::authenticated();
        for role in Role::ALL {
            assert!(authorize(&test_user("u", *role), gate.allowed()).is_ok());
        }
        assert_eq!(RoleGate::admin().allowed(), &[Role::Admin]);
    }
}
