//! Admin endpoints: user management, audit, watch directory, LDX views,
//! export, and data clearing.

use std::path::{Path as FsPath, PathBuf};

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, TimeZone, Utc};
use pitwall_core::auth::{hash_password, validate_password, validate_username};
use pitwall_core::Role;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::auth::UserView;
use super::error::ApiError;
use super::extract::RequireAdmin;
use super::AppState;
use crate::store::{AuditPage, InjectionRow, InjectionStats, UserRecord};
use crate::watcher::WATCH_DIRECTORY_KEY;

fn user_view(user: UserRecord) -> UserView {
    UserView {
        id: user.id,
        username: user.username,
        roles: user.roles,
        is_admin: user.is_admin,
    }
}

fn parse_roles(raw: &[String]) -> Result<Vec<Role>, ApiError> {
    if raw.len() > 2 {
        return Err(ApiError::Validation("Max two roles allowed".to_string()));
    }
    raw.iter()
        .map(|r| {
            r.parse()
                .map_err(|_| ApiError::Validation(format!("Invalid role: {r}")))
        })
        .collect()
}

// --- users ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UserCreate {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// `GET /admin/users`
pub async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<UserView>>, ApiError> {
    Ok(Json(
        state.store.list_users()?.into_iter().map(user_view).collect(),
    ))
}

/// `POST /admin/users`
pub async fn create_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(payload): Json<UserCreate>,
) -> Result<Json<UserView>, ApiError> {
    let username = payload.username.trim();
    validate_username(username).map_err(ApiError::Validation)?;
    validate_password(&payload.password).map_err(ApiError::Validation)?;
    let roles = parse_roles(&payload.roles)?;
    if payload.is_admin && !roles.is_empty() {
        return Err(ApiError::Validation(
            "Admin cannot have subteam roles".to_string(),
        ));
    }
    if !payload.is_admin && roles.is_empty() {
        return Err(ApiError::Validation(
            "At least one role is required for non-admin users".to_string(),
        ));
    }

    let hash = hash_password(&payload.password).map_err(|e| ApiError::Internal(e.to_string()))?;
    let user = state
        .store
        .create_user(username, &hash, payload.is_admin, &roles)?;
    info!(user = %user.username, admin = payload.is_admin, by = %admin.username, "user created");
    Ok(Json(user_view(user)))
}

/// `DELETE /admin/users/:id`
pub async fn delete_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(user_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if user_id == admin.id {
        return Err(ApiError::Validation(
            "You cannot delete your own account".to_string(),
        ));
    }
    let target = state
        .store
        .get_user(user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    if target.is_admin && state.store.count_admins()? <= 1 {
        return Err(ApiError::Validation(
            "The last admin cannot be deleted".to_string(),
        ));
    }
    state.store.delete_user(user_id)?;
    info!(user = %target.username, by = %admin.username, "user deleted");
    Ok(Json(json!({"status": "deleted"})))
}

#[derive(Debug, Deserialize)]
pub struct PasswordUpdate {
    pub password: String,
}

/// `PUT /admin/users/:id/password`
pub async fn update_password(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(user_id): Path<i64>,
    Json(payload): Json<PasswordUpdate>,
) -> Result<Json<Value>, ApiError> {
    validate_password(&payload.password).map_err(ApiError::Validation)?;
    let hash = hash_password(&payload.password).map_err(|e| ApiError::Internal(e.to_string()))?;
    match state.store.set_password(user_id, &hash) {
        Ok(()) => Ok(Json(json!({"status": "updated"}))),
        Err(crate::store::StoreError::NotFound) => {
            Err(ApiError::NotFound("User not found".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct RolesUpdate {
    pub roles: Vec<String>,
}

/// `PUT /admin/users/:id/roles`
pub async fn update_roles(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(user_id): Path<i64>,
    Json(payload): Json<RolesUpdate>,
) -> Result<Json<UserView>, ApiError> {
    let roles = parse_roles(&payload.roles)?;
    let user = state
        .store
        .get_user(user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    if user.is_admin && !roles.is_empty() {
        return Err(ApiError::Validation(
            "Admin cannot have subteam roles".to_string(),
        ));
    }
    if !user.is_admin && roles.is_empty() {
        return Err(ApiError::Validation(
            "At least one role is required".to_string(),
        ));
    }
    state.store.set_roles(user_id, &roles)?;
    let user = state
        .store
        .get_user(user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(Json(user_view(user)))
}

// --- audit ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
}

/// `GET /admin/audit?offset=&limit=`
pub async fn audit(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditPage>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    Ok(Json(state.store.list_audit(query.offset, limit)?))
}

// --- watch directory --------------------------------------------------

const SENSITIVE_PREFIXES: [&str; 9] = [
    "/etc", "/var/log", "/usr", "/bin", "/sbin", "/root", "/proc", "/sys", "/dev",
];

/// `GET /admin/watch-directory`
pub async fn get_watch_directory(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({
        "path": state.store.get_setting(WATCH_DIRECTORY_KEY)?
    })))
}

#[derive(Debug, Deserialize)]
pub struct WatchDirectoryUpdate {
    #[serde(default)]
    pub path: String,
}

/// `PUT /admin/watch-directory`
pub async fn set_watch_directory(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Json(payload): Json<WatchDirectoryUpdate>,
) -> Result<Json<Value>, ApiError> {
    let path = payload.path.trim();
    if path.is_empty() {
        return Err(ApiError::Validation("Path is required".to_string()));
    }
    if path.len() > 1024 {
        return Err(ApiError::Validation("Path is too long".to_string()));
    }
    let resolved = FsPath::new(path)
        .canonicalize()
        .map_err(|_| ApiError::Validation("Invalid path format".to_string()))?;
    if !resolved.is_dir() {
        return Err(ApiError::Validation(format!(
            "Directory does not exist: {}",
            resolved.display()
        )));
    }
    let resolved_str = resolved.to_string_lossy().into_owned();
    for sensitive in SENSITIVE_PREFIXES {
        if resolved_str == sensitive || resolved_str.starts_with(&format!("{sensitive}/")) {
            return Err(ApiError::Validation(format!(
                "Access to system directory '{sensitive}' is not allowed"
            )));
        }
    }
    std::fs::read_dir(&resolved).map_err(|_| {
        ApiError::Validation(format!(
            "Permission denied reading directory: {}",
            resolved.display()
        ))
    })?;
    state.store.put_setting(WATCH_DIRECTORY_KEY, &resolved_str)?;
    info!(path = %resolved_str, "watch directory updated");
    Ok(Json(json!({"status": "updated", "path": resolved_str})))
}

// --- LDX views --------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct LdxFileInfo {
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// `GET /admin/ldx-files`: files currently in the watch directory.
pub async fn list_ldx_files(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<LdxFileInfo>>, ApiError> {
    let Some(dir) = state.store.get_setting(WATCH_DIRECTORY_KEY)? else {
        return Ok(Json(Vec::new()));
    };
    let dir = PathBuf::from(dir);
    if !dir.is_dir() {
        return Ok(Json(Vec::new()));
    }
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let is_ldx = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("ldx"));
            if !is_ldx || !path.is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let modified_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_millis() as i64);
            files.push(LdxFileInfo {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size: meta.len(),
                modified_at: Utc
                    .timestamp_millis_opt(modified_ms)
                    .single()
                    .unwrap_or_default(),
            });
        }
    }
    files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    Ok(Json(files))
}

/// `GET /admin/ldx-files/:name/injections`
pub async fn ldx_file_injections(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(file_name): Path<String>,
) -> Result<Json<Vec<InjectionRow>>, ApiError> {
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
        return Err(ApiError::Validation("Invalid file name".to_string()));
    }
    if !file_name.to_ascii_lowercase().ends_with(".ldx") {
        return Err(ApiError::Validation(
            "File must be an .ldx file".to_string(),
        ));
    }
    Ok(Json(state.store.list_injections(&file_name)?))
}

/// `GET /admin/ldx-stats`
pub async fn ldx_stats(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<InjectionStats>>, ApiError> {
    Ok(Json(state.store.injection_stats()?))
}

// --- maintenance ------------------------------------------------------

/// `POST /admin/export-db`: timestamped snapshot into the watch
/// directory.
pub async fn export_db(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<Value>, ApiError> {
    let dir = state
        .store
        .get_setting(WATCH_DIRECTORY_KEY)?
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
        .ok_or_else(|| {
            ApiError::Validation(
                "Watch directory not configured or does not exist".to_string(),
            )
        })?;
    let filename = format!("export_{}.db", Utc::now().format("%Y-%m-%d_%H%M%S"));
    let dest = dir.join(&filename);
    state.store.export_snapshot(&dest)?;
    info!(file = %dest.display(), by = %admin.username, "database exported");
    Ok(Json(json!({"status": "exported", "filename": filename})))
}

/// `POST /admin/clear-data`: wipes runtime data, preserving users,
/// sensors, and configuration.
pub async fn clear_data(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<Value>, ApiError> {
    state.store.clear_runtime_data()?;
    info!(by = %admin.username, "runtime data cleared");
    Ok(Json(json!({"status": "cleared"})))
}
