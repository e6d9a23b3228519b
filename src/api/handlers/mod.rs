//! API handlers.
//!
//! `auth` holds the authentication core (tokens, sessions, roles, password
//! lifecycle). `users` and `health` sit on top of it.

pub mod auth;
pub mod health;
pub mod users;
