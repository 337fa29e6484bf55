//! Request-scoped authentication extractors.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use pitwall_core::auth::{verify_token, Claims};
use pitwall_core::Role;

use super::error::ApiError;
use super::AppState;

/// The authenticated caller, re-loaded from the store on every request so
/// deleted users lose access immediately.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub roles: Vec<Role>,
}

impl AuthUser {
    /// Whether this user may read or write the given role's form.
    #[must_use]
    pub fn can_access(&self, role: Role) -> bool {
        self.is_admin || self.roles.contains(&role)
    }
}

/// Extractor: any valid logged-in user.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthUser);

/// Extractor: admin users only.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub AuthUser);

/// Verifies a bearer token and resolves the user it names.
pub fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims: Claims = verify_token(&state.auth.jwt_secret, token, now)
        .map_err(|_| ApiError::Unauthorized("Invalid authentication token".to_string()))?;
    let user = state
        .store
        .get_user_by_username(&claims.sub)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;
    Ok(AuthUser {
        id: user.id,
        username: user.username,
        is_admin: user.is_admin,
        roles: user.roles,
    })
}

fn bearer_token(parts: &Parts) -> Result<String, ApiError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        Ok(Self(authenticate(state, &token)?))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ApiError::Forbidden("Admin access required".to_string()));
        }
        Ok(Self(user))
    }
}
