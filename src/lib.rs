//! # SafeHaven (EHR authentication and session core)
//!
//! `safehaven` issues and rotates the credentials every other part of the
//! SafeHaven EHR API relies on, and answers one question for each request:
//! who is calling, and are they allowed to.
//!
//! ## Tokens
//!
//! - **Access tokens** are short-lived (15 minutes) HS256 JWTs carrying the user
//!   id and role. They are verified locally, without a database round trip.
//! - **Refresh tokens** are opaque 256-bit random strings. Only their SHA-256
//!   hash is stored; each refresh consumes the presented token and returns a
//!   new pair (rotation). Logout and password changes revoke them in bulk.
//!
//! Every authenticated request re-reads the user record, so deactivation and
//! role changes take effect immediately, before the access token expires.
//!
//! ## Roles
//!
//! Roles form a closed set (`admin`, `therapist`, `staff`, `client`). Route
//! groups declare the roles they accept and the gate rejects everything else
//! with `403 Forbidden`.
//!
//! ## Response styles
//!
//! The same handlers serve the legacy `/api/auth/*` routes (`snake_case`
//! bodies) and the `/api/v1/users/auth/*` routes (`camelCase` bodies).

pub mod api;
pub mod audit;
pub mod cli;
pub mod notify;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
