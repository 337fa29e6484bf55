//! Telemetry catalog, source status, and dashboard preference endpoints.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::extract::CurrentUser;
use super::AppState;

/// Preference key under which the dashboard layout is stored.
const DASHBOARD_PREF_KEY: &str = "dashboard";

/// Dashboard layout blobs larger than this are rejected.
const MAX_DASHBOARD_CONFIG_LENGTH: usize = 100_000;

/// Channel shape served to the dashboard.
#[derive(Debug, Serialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub group: String,
}

/// `GET /telemetry/channels`: enabled sensors only.
pub async fn channels(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<Vec<ChannelInfo>>, ApiError> {
    let sensors = state.store.list_sensors(true)?;
    Ok(Json(
        sensors
            .into_iter()
            .map(|s| ChannelInfo {
                id: s.sensor_id,
                name: s.name,
                unit: s.unit,
                min: s.min_value,
                max: s.max_value,
                group: s.group,
            })
            .collect(),
    ))
}

/// `GET /telemetry/source`
pub async fn source_status(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Json<Value> {
    Json(state.sources.status())
}

/// `GET /telemetry/preferences`
pub async fn get_preferences(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let config = state.store.get_pref(user.id, DASHBOARD_PREF_KEY)?;
    Ok(Json(json!({ "config": config })))
}

#[derive(Debug, Deserialize)]
pub struct PreferencesBody {
    pub config: String,
}

/// `PUT /telemetry/preferences`
pub async fn put_preferences(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<PreferencesBody>,
) -> Result<Json<Value>, ApiError> {
    if payload.config.trim().is_empty() {
        return Err(ApiError::Validation("Config is required".to_string()));
    }
    if payload.config.len() > MAX_DASHBOARD_CONFIG_LENGTH {
        return Err(ApiError::Validation(format!(
            "Config exceeds maximum size of {}KB",
            MAX_DASHBOARD_CONFIG_LENGTH / 1000
        )));
    }
    if serde_json::from_str::<Value>(&payload.config).is_err() {
        return Err(ApiError::Validation("Config must be valid JSON".to_string()));
    }
    state
        .store
        .put_pref(user.id, DASHBOARD_PREF_KEY, &payload.config, crate::store::now_ms())?;
    Ok(Json(json!({"status": "saved"})))
}
