//! Authentication endpoints.
//!
//! - `POST  /api/auth/register` - public client registration
//! - `POST  /api/auth/login`
//! - `POST  /api/auth/validate-token` - used by the other services
//! - `GET   /api/auth/me`
//! - `POST  /api/auth/users` - admin creates an account with any role
//! - `PATCH /api/auth/users/:id/status` - admin activates or deactivates
//! - `GET   /api/auth/internal/users` - internal credential only

use crate::server::AppState;
use crate::types::{Account, Credentials, LoginContext, NewUser, Registration, Session};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use dentalbook_auth::{Role, TokenValidation};
use dentalbook_web::{AppError, AuthUser, ClientIp, InternalService, UserAgent};
use serde::Deserialize;

/// Body of `PATCH /users/:id/status`; an absent flag toggles.
#[derive(Debug, Default, Deserialize)]
pub struct StatusRequest {
    /// Target flag
    #[serde(default)]
    pub active: Option<bool>,
}

/// Register a client and log them in.
pub async fn register(
    State(state): State<AppState>,
    Json(registration): Json<Registration>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    let session = state.accounts.register(registration).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Exchange credentials for a token.
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Session>, AppError> {
    let context = LoginContext {
        ip: ip.to_string(),
        user_agent,
    };
    Ok(Json(state.accounts.login(credentials, context).await?))
}

/// The extractor already checked signature and account status.
pub async fn validate_token(auth: AuthUser) -> Json<TokenValidation> {
    Json(TokenValidation {
        valid: true,
        user: auth.user,
    })
}

/// The caller's own account.
pub async fn me(auth: AuthUser, State(state): State<AppState>) -> Result<Json<Account>, AppError> {
    Ok(Json(state.accounts.find(auth.user.id).await?))
}

/// Create an account with an explicit role (admin).
pub async fn create_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    auth.require_role(&[Role::Admin])?;
    let session = state.accounts.create_user(user).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Activate, deactivate or toggle an account (admin).
pub async fn set_status(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<StatusRequest>>,
) -> Result<Json<Account>, AppError> {
    auth.require_role(&[Role::Admin])?;
    if id == auth.user.id {
        return Err(AppError::bad_request("Admins cannot change their own status"));
    }
    let Json(request) = body.unwrap_or_default();
    let active = match request.active {
        Some(active) => active,
        None => !state.accounts.find(id).await?.active,
    };
    Ok(Json(state.accounts.set_active(id, active).await?))
}

/// Every account, for the profile service's sync fallback.
pub async fn internal_users(
    _internal: InternalService,
    State(state): State<AppState>,
) -> Result<Json<Vec<Account>>, AppError> {
    Ok(Json(state.accounts.all().await?))
}
