//! Form schema and value endpoints.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use pitwall_core::schema::FormSchema;
use pitwall_core::Role;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::ApiError;
use super::extract::{AuthUser, CurrentUser};
use super::AppState;
use crate::values::Prefill;

fn parse_role(raw: &str) -> Result<Role, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown role: {raw}")))
}

fn schema_for(state: &AppState, user: &AuthUser, role: Role) -> Result<FormSchema, ApiError> {
    if !user.can_access(role) {
        return Err(ApiError::Forbidden("Access denied for this form".to_string()));
    }
    let registry = state
        .registry
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    registry
        .get(role)
        .cloned()
        .ok_or_else(|| ApiError::NotFound("Form not found".to_string()))
}

/// `GET /forms`: schemas visible to the caller.
pub async fn list_forms(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<Vec<FormSchema>> {
    let registry = state
        .registry
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    Json(
        registry
            .visible_to(user.is_admin, &user.roles)
            .into_iter()
            .cloned()
            .collect(),
    )
}

/// `GET /forms/:role`
pub async fn get_form(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(role): Path<String>,
) -> Result<Json<FormSchema>, ApiError> {
    let role = parse_role(&role)?;
    Ok(Json(schema_for(&state, &user, role)?))
}

/// `GET /forms/:role/values`: prefill with timestamps and lookback.
pub async fn get_values(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(role): Path<String>,
) -> Result<Json<Prefill>, ApiError> {
    let role = parse_role(&role)?;
    let schema = schema_for(&state, &user, role)?;
    Ok(Json(state.values.prefill(&schema)?))
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub values: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub saved: usize,
}

/// `POST /forms/:role/submit`
pub async fn submit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(role): Path<String>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let role = parse_role(&role)?;
    let schema = schema_for(&state, &user, role)?;
    let saved = state
        .values
        .submit(&schema, Some(user.id), &body.values)
        .await?;
    Ok(Json(SubmitResponse { saved }))
}

/// `GET /forms/:role/tabs`: ordered distinct tab names.
pub async fn tabs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(role): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let role = parse_role(&role)?;
    let schema = schema_for(&state, &user, role)?;
    Ok(Json(json!({ "tabs": schema.tabs() })))
}
