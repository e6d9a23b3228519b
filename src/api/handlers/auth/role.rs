//! Closed set of user roles.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Therapist,
    Staff,
    Client,
}

impl Role {
    pub const ALL: &'static [Role] = &[Role::Admin, Role::Therapist, Role::Staff, Role::Client];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Therapist => "therapist",
            Self::Staff => "staff",
            Self::Client => "client",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Client
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "therapist" => Ok(Self::Therapist),
            "staff" => Ok(Self::Staff),
            "client" => Ok(Self::Client),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
