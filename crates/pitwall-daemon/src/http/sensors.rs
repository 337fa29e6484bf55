//! Admin sensor catalog endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::error::ApiError;
use super::extract::RequireAdmin;
use super::AppState;
use crate::store::{NewSensor, SensorRecord, SensorUpdate};

const MAX_SENSOR_ID_LENGTH: usize = 64;
const MAX_SENSOR_NAME_LENGTH: usize = 128;
const MAX_SENSOR_UNIT_LENGTH: usize = 32;
const MAX_SENSOR_GROUP_LENGTH: usize = 64;
const SORT_ORDER_RANGE: std::ops::RangeInclusive<i64> = -1000..=10000;

fn validate_new(sensor: &mut NewSensor) -> Result<(), ApiError> {
    sensor.sensor_id = sensor.sensor_id.trim().to_string();
    if sensor.sensor_id.is_empty() {
        return Err(ApiError::Validation("Sensor ID is required".to_string()));
    }
    if sensor.sensor_id.len() > MAX_SENSOR_ID_LENGTH {
        return Err(ApiError::Validation(format!(
            "Sensor ID must be at most {MAX_SENSOR_ID_LENGTH} characters"
        )));
    }
    if !sensor
        .sensor_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::Validation(
            "Sensor ID may only contain letters, numbers, and underscores".to_string(),
        ));
    }
    sensor.name = sensor.name.trim().to_string();
    if sensor.name.is_empty() {
        return Err(ApiError::Validation("Name is required".to_string()));
    }
    if sensor.name.len() > MAX_SENSOR_NAME_LENGTH {
        return Err(ApiError::Validation(format!(
            "Name must be at most {MAX_SENSOR_NAME_LENGTH} characters"
        )));
    }
    sensor.unit = sensor.unit.trim().to_string();
    if sensor.unit.is_empty() {
        return Err(ApiError::Validation("Unit is required".to_string()));
    }
    if sensor.unit.len() > MAX_SENSOR_UNIT_LENGTH {
        return Err(ApiError::Validation(format!(
            "Unit must be at most {MAX_SENSOR_UNIT_LENGTH} characters"
        )));
    }
    sensor.group = sensor.group.trim().to_string();
    if sensor.group.is_empty() {
        sensor.group = "Other".to_string();
    }
    if sensor.group.len() > MAX_SENSOR_GROUP_LENGTH {
        return Err(ApiError::Validation(format!(
            "Group must be at most {MAX_SENSOR_GROUP_LENGTH} characters"
        )));
    }
    if !SORT_ORDER_RANGE.contains(&sensor.sort_order) {
        return Err(ApiError::Validation(
            "Sort order must be between -1000 and 10000".to_string(),
        ));
    }
    if sensor.max_value <= sensor.min_value {
        return Err(ApiError::Validation(
            "Max value must be greater than min value".to_string(),
        ));
    }
    Ok(())
}

fn validate_update(update: &SensorUpdate) -> Result<(), ApiError> {
    if let Some(name) = &update.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::Validation("Name cannot be empty".to_string()));
        }
        if name.len() > MAX_SENSOR_NAME_LENGTH {
            return Err(ApiError::Validation(format!(
                "Name must be at most {MAX_SENSOR_NAME_LENGTH} characters"
            )));
        }
    }
    if let Some(unit) = &update.unit {
        let unit = unit.trim();
        if unit.is_empty() {
            return Err(ApiError::Validation("Unit cannot be empty".to_string()));
        }
        if unit.len() > MAX_SENSOR_UNIT_LENGTH {
            return Err(ApiError::Validation(format!(
                "Unit must be at most {MAX_SENSOR_UNIT_LENGTH} characters"
            )));
        }
    }
    if let Some(group) = &update.group {
        if group.len() > MAX_SENSOR_GROUP_LENGTH {
            return Err(ApiError::Validation(format!(
                "Group must be at most {MAX_SENSOR_GROUP_LENGTH} characters"
            )));
        }
    }
    if let Some(sort_order) = update.sort_order {
        if !SORT_ORDER_RANGE.contains(&sort_order) {
            return Err(ApiError::Validation(
                "Sort order must be between -1000 and 10000".to_string(),
            ));
        }
    }
    Ok(())
}

/// `GET /admin/sensors`
pub async fn list_sensors(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<SensorRecord>>, ApiError> {
    Ok(Json(state.store.list_sensors(false)?))
}

/// `POST /admin/sensors`
pub async fn create_sensor(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(mut payload): Json<NewSensor>,
) -> Result<Json<SensorRecord>, ApiError> {
    validate_new(&mut payload)?;
    Ok(Json(state.store.create_sensor(&payload)?))
}

/// `PUT /admin/sensors/:sensor_id`
pub async fn update_sensor(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(sensor_id): Path<String>,
    Json(payload): Json<SensorUpdate>,
) -> Result<Json<SensorRecord>, ApiError> {
    validate_update(&payload)?;
    match state.store.update_sensor(&sensor_id, &payload) {
        Ok(sensor) => Ok(Json(sensor)),
        Err(crate::store::StoreError::NotFound) => Err(ApiError::NotFound(format!(
            "Sensor '{sensor_id}' not found"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// `DELETE /admin/sensors/:sensor_id`
pub async fn delete_sensor(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(sensor_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.store.delete_sensor(&sensor_id) {
        Ok(()) => Ok(Json(json!({"status": "deleted"}))),
        Err(crate::store::StoreError::NotFound) => {
            Err(ApiError::NotFound("Sensor not found".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
