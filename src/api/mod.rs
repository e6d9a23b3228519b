use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::audit::{AuditSink, PgAuditSink};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use handlers::auth::{
    self,
    pruner::{spawn_refresh_token_pruner, PrunerConfig},
    role_gate, AuthConfig, AuthState, PgStore, ResponseStyle, RoleGate,
};
use handlers::{health, users};

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Runtime settings for [`new`] that are not part of [`AuthConfig`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub cors_origins: Vec<String>,
    pub notify_webhook_url: Option<Url>,
}

/// Routes under `/api/auth` and `/api/v1/users/auth`.
fn auth_routes(style: ResponseStyle) -> Router {
    let public = Router::new()
        .route("/login", post(auth::login::login))
        .route("/login/", post(auth::login::login))
        .route("/refresh", post(auth::session::refresh))
        .route("/refresh/", post(auth::session::refresh))
        .route(
            "/password-reset-request",
            post(auth::lifecycle::password_reset_request),
        )
        .route("/password-reset", post(auth::lifecycle::password_reset));

    let authenticated = Router::new()
        .route("/", get(users::list_users))
        .route("/logout", post(auth::lifecycle::logout))
        .route("/change-password", post(auth::lifecycle::password_change))
        .route(
            "/validate",
            get(auth::session::validate).post(auth::session::validate),
        )
        .route_layer(middleware::from_fn_with_state(
            RoleGate::authenticated(),
            role_gate,
        ));

    let admin = Router::new()
        .route("/register", post(auth::register::register))
        .route_layer(middleware::from_fn_with_state(RoleGate::admin(), role_gate));

    public
        .merge(authenticated)
        .merge(admin)
        .layer(Extension(style))
}

/// Routes under `/api/users` and `/api/v1/users`.
fn user_routes(style: ResponseStyle) -> Router {
    Router::new()
        .route("/:id", patch(users::patch_user))
        .route_layer(middleware::from_fn_with_state(RoleGate::admin(), role_gate))
        .layer(Extension(style))
}

/// Build the full application router around shared auth state.
///
/// Transport layers (CORS, tracing, request ids) are added by [`new`].
#[must_use]
pub fn app(state: Arc<AuthState>) -> Router {
    Router::new()
        .nest("/api/auth", auth_routes(ResponseStyle::Legacy))
        .nest("/api/v1/users/auth", auth_routes(ResponseStyle::V1))
        .nest("/api/users", user_routes(ResponseStyle::Legacy))
        .nest("/api/v1/users", user_routes(ResponseStyle::V1))
        .route("/api/health", get(health::health).options(health::health))
        .route("/api/openapi.json", get(|| async { Json(openapi()) }))
        .layer(Extension(state))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(server: ServerConfig, auth_config: AuthConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 30))
        .test_before_acquire(true)
        .connect(&server.dsn)
        .await
        .context("Failed to connect to database")?;

    let notifier: Arc<dyn Notifier> = match server.notify_webhook_url {
        Some(url) => {
            info!(url = %url, "Delivering notifications via webhook");
            Arc::new(WebhookNotifier::new(url)?)
        }
        None => Arc::new(LogNotifier),
    };
    let audit: Arc<dyn AuditSink> = Arc::new(PgAuditSink::new(pool.clone()));
    let store = Arc::new(PgStore::new(pool));

    let pruner = PrunerConfig {
        retention: auth_config.refresh_token_retention(),
        ..PrunerConfig::default()
    };
    let frontend_origin = origin_header(auth_config.frontend_base_url())?;
    let auth_state = Arc::new(AuthState::new(auth_config, store, notifier, audit).await?);

    spawn_refresh_token_pruner(auth_state.store_handle(), pruner);

    let mut origins = vec![frontend_origin];
    for origin in &server.cors_origins {
        origins.push(origin_header(origin)?);
    }
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    let app = app(auth_state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{}", server.port)).await?;

    info!("Listening on [::]:{}", server.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Reduce a URL to its `scheme://host[:port]` origin.
fn origin_header(url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid origin URL: {url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Origin URL must include a valid host: {url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}
