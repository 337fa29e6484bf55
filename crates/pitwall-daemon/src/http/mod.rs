//! HTTP and WebSocket surface.

pub mod admin;
pub mod auth;
pub mod error;
pub mod extract;
pub mod forms;
pub mod sensors;
pub mod serial;
pub mod telemetry;
pub mod ws;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use pitwall_core::schema::FormRegistry;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::hub::TelemetryHub;
use crate::source::SourceManager;
use crate::store::Store;
use crate::values::ValueService;

/// Token-minting configuration shared by login and verification.
#[derive(Debug)]
pub struct AuthConfig {
    pub jwt_secret: Vec<u8>,
    pub token_ttl: Duration,
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub registry: Arc<RwLock<FormRegistry>>,
    pub values: Arc<ValueService>,
    pub hub: Arc<TelemetryHub>,
    pub sources: Arc<SourceManager>,
    pub auth: Arc<AuthConfig>,
}

/// Default deadline for a request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Builds the full application router.
#[must_use]
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/roles", get(auth::roles))
        .route("/forms", get(forms::list_forms))
        .route("/forms/:role", get(forms::get_form))
        .route("/forms/:role/values", get(forms::get_values))
        .route("/forms/:role/submit", post(forms::submit))
        .route("/forms/:role/tabs", get(forms::tabs))
        .route("/admin/users", get(admin::list_users).post(admin::create_user))
        .route("/admin/users/:id", axum::routing::delete(admin::delete_user))
        .route("/admin/users/:id/password", put(admin::update_password))
        .route("/admin/users/:id/roles", put(admin::update_roles))
        .route("/admin/audit", get(admin::audit))
        .route(
            "/admin/watch-directory",
            get(admin::get_watch_directory).put(admin::set_watch_directory),
        )
        .route("/admin/ldx-files", get(admin::list_ldx_files))
        .route(
            "/admin/ldx-files/:name/injections",
            get(admin::ldx_file_injections),
        )
        .route("/admin/ldx-stats", get(admin::ldx_stats))
        .route("/admin/export-db", post(admin::export_db))
        .route("/admin/clear-data", post(admin::clear_data))
        .route(
            "/admin/sensors",
            get(sensors::list_sensors).post(sensors::create_sensor),
        )
        .route(
            "/admin/sensors/:sensor_id",
            put(sensors::update_sensor).delete(sensors::delete_sensor),
        )
        .route(
            "/admin/serial/config",
            get(serial::get_config).put(serial::put_config),
        )
        .route("/admin/serial/source", put(serial::put_source))
        .route("/admin/serial/restart", post(serial::restart))
        .route("/telemetry/channels", get(telemetry::channels))
        .route("/telemetry/source", get(telemetry::source_status))
        .route(
            "/telemetry/preferences",
            get(telemetry::get_preferences).put(telemetry::put_preferences),
        )
        .route("/ws/telemetry", get(ws::telemetry))
        .with_state(state)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
}
