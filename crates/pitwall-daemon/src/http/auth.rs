//! Login and identity endpoints.

use axum::extract::State;
use axum::{Form, Json};
use pitwall_core::auth::{mint_token, verify_password, Claims, MAX_USERNAME_LENGTH};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use super::extract::{AuthUser, CurrentUser};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

/// User shape returned by `/auth/me` and the admin user endpoints.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub roles: Vec<pitwall_core::Role>,
    pub is_admin: bool,
}

impl From<AuthUser> for UserView {
    fn from(user: AuthUser) -> Self {
        Self {
            id: user.id,
            username: user.username,
            roles: user.roles,
            is_admin: user.is_admin,
        }
    }
}

/// `POST /auth/login`
///
/// Unknown usernames and wrong passwords fail with different messages;
/// that distinction is a product requirement for this internal tool.
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let username = form.username.trim();
    if username.is_empty() {
        return Err(ApiError::Validation("Username is required".to_string()));
    }
    if form.password.is_empty() {
        return Err(ApiError::Validation("Password is required".to_string()));
    }
    if username.len() > MAX_USERNAME_LENGTH {
        return Err(ApiError::Validation(format!(
            "Username must be at most {MAX_USERNAME_LENGTH} characters"
        )));
    }

    let user = state
        .store
        .get_user_by_username(username)?
        .ok_or_else(|| ApiError::Unauthorized("Account not found".to_string()))?;
    let ok = verify_password(&form.password, &user.password_hash)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !ok {
        return Err(ApiError::Unauthorized("Incorrect password".to_string()));
    }

    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims = Claims {
        sub: user.username.clone(),
        uid: user.id,
        is_admin: user.is_admin,
        roles: user.roles,
        exp: now + state.auth.token_ttl.as_secs(),
    };
    let token = mint_token(&state.auth.jwt_secret, &claims);
    info!(user = %user.username, "login");
    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer",
    }))
}

/// `GET /auth/me`
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserView> {
    Json(user.into())
}

/// `GET /roles`: the closed role set.
pub async fn roles(CurrentUser(_user): CurrentUser) -> Json<Vec<&'static str>> {
    Json(pitwall_core::Role::ALL.iter().map(|r| r.as_str()).collect())
}
