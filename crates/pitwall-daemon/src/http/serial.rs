//! Admin serial/modem endpoints.

use axum::extract::State;
use axum::Json;
use pitwall_core::serial::{SerialConfig, SerialFormat, SourcePreference};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::extract::RequireAdmin;
use super::AppState;

/// `GET /admin/serial/config`
pub async fn get_config(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Json<SerialConfig> {
    Json(state.sources.serial().config())
}

/// Partial serial configuration update; absent fields keep their value.
#[derive(Debug, Deserialize)]
pub struct SerialConfigUpdate {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub data_format: Option<SerialFormat>,
    pub csv_channel_order: Option<Vec<String>>,
    pub csv_separator: Option<String>,
    pub timeout: Option<f64>,
    pub reconnect_interval: Option<f64>,
}

/// `PUT /admin/serial/config`: applies the change and restarts the
/// reader so the new settings take effect on a fresh port session.
pub async fn put_config(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(update): Json<SerialConfigUpdate>,
) -> Result<Json<Value>, ApiError> {
    let mut config: SerialConfig = state.sources.serial().config();
    if let Some(port) = update.port {
        config.port = port.trim().to_string();
    }
    if let Some(baud_rate) = update.baud_rate {
        config.baud_rate = baud_rate;
    }
    if let Some(data_format) = update.data_format {
        config.data_format = data_format;
    }
    if let Some(order) = update.csv_channel_order {
        config.csv_channel_order = order;
    }
    if let Some(separator) = update.csv_separator {
        config.csv_separator = separator;
    }
    if let Some(timeout) = update.timeout {
        config.timeout = timeout;
    }
    if let Some(reconnect_interval) = update.reconnect_interval {
        config.reconnect_interval = reconnect_interval;
    }
    config.validate().map_err(ApiError::Validation)?;
    state.sources.apply_serial_config(config).await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Debug, Deserialize)]
pub struct SourceUpdate {
    pub source: String,
}

/// `PUT /admin/serial/source`
pub async fn put_source(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(payload): Json<SourceUpdate>,
) -> Result<Json<Value>, ApiError> {
    let preference: SourcePreference =
        payload.source.parse().map_err(ApiError::Validation)?;
    state.sources.set_preference(preference)?;
    Ok(Json(json!({
        "status": "updated",
        "active_source": state.sources.active_source().map(|s| s.as_str()),
    })))
}

/// `POST /admin/serial/restart`
pub async fn restart(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Json<Value> {
    state.sources.serial().restart().await;
    Json(json!({
        "status": "restarted",
        "state": state.sources.serial().state().as_str(),
    }))
}
