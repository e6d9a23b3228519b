use utoipa::{
    openapi::{
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
        Contact, License,
    },
    Modify, OpenApi,
};

use super::handlers::{auth, health, users};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login::login,
        auth::session::refresh,
        auth::session::validate,
        auth::lifecycle::logout,
        auth::lifecycle::password_reset_request,
        auth::lifecycle::password_reset,
        auth::lifecycle::password_change,
        auth::register::register,
        users::list_users,
        users::patch_user,
    ),
    components(schemas(
        health::Health,
        auth::ErrorBody,
        auth::Role,
        auth::UserBody,
        auth::UserSummary,
        auth::TokenResponse,
        auth::MessageResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Login, token rotation, and password lifecycle"),
        (name = "users", description = "User administration"),
        (name = "health", description = "Liveness"),
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Generated document with package metadata from Cargo.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
    doc.info.contact = cargo_contact();
    doc.info.license = cargo_license();
    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(':').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }
    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    non_empty(value)
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => (
            non_empty(&author[..start]),
            non_empty(author[start + 1..].trim_end_matches('>')),
        ),
        None => (non_empty(author), None),
    }
}
