//! User profile endpoints.
//!
//! - `GET    /api/users` - staff listing
//! - `GET    /api/users/:id`
//! - `PUT    /api/users/:id` - self or admin
//! - `POST   /api/users/:id/complete-profile` - the client themself
//! - `PATCH  /api/users/:id/toggle-active` - admin
//! - `DELETE /api/users/:id` - admin, soft delete
//! - `GET    /api/users/role/:role`
//! - `GET    /api/users/practitioners/available`
//! - `POST   /api/users/create-with-id` - internal
//! - `POST   /api/users/sync/:id` - internal or bearer
//! - `GET    /api/users/by-email/:email` - internal
//!
//! Bearer callers must have an active local replica themselves.

use crate::server::AppState;
use crate::types::{Page, Profile, ProfileCompletion, ProfileFilter, ProfilePatch, UserRecord};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use dentalbook_auth::Role;
use dentalbook_web::{AppError, AuthUser, Caller, InternalService};
use serde::Deserialize;

const STAFF: [Role; 2] = [Role::Admin, Role::FrontDesk];

/// Largest accepted page size
const MAX_PAGE_SIZE: u32 = 100;

// ============================================================================
// Request Types
// ============================================================================

/// Query parameters of `GET /api/users`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Filter by role
    pub role: Option<Role>,
    /// Filter by active flag
    pub active: Option<bool>,
    /// Filter by profile-complete flag
    pub profile_complete: Option<bool>,
    /// Free-text search
    pub search: Option<String>,
    /// 1-based page (default 1)
    pub page: Option<u32>,
    /// Page size (default 10, max 100)
    pub limit: Option<u32>,
}

impl ListQuery {
    fn into_filter(self) -> ProfileFilter {
        let defaults = ProfileFilter::default();
        ProfileFilter {
            role: self.role,
            active: self.active,
            profile_complete: self.profile_complete,
            search: self.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            page: self.page.unwrap_or(defaults.page).max(1),
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
        }
    }
}

/// Query of `GET /api/users/role/:role`.
#[derive(Debug, Deserialize)]
pub struct RoleQuery {
    /// Active users only (default `true`)
    #[serde(default = "active_default")]
    pub active: bool,
}

const fn active_default() -> bool {
    true
}

// ============================================================================
// Access rules
// ============================================================================

/// The bearer caller's own replica must exist and be active.
async fn require_active_caller(state: &AppState, auth: &AuthUser) -> Result<(), AppError> {
    state.profiles.require_active(auth.user.id).await?;
    Ok(())
}

/// Self, staff and practitioners may read anyone; everybody may read a
/// practitioner.
fn can_view(auth: &AuthUser, profile: &Profile) -> bool {
    auth.user.is_self_or_staff(profile.id)
        || auth.user.role == Role::Practitioner
        || profile.role == Role::Practitioner
}

// ============================================================================
// Handlers
// ============================================================================

/// Staff listing with filters and pagination.
pub async fn list_users(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Profile>>, AppError> {
    auth.require_role(&STAFF)?;
    require_active_caller(&state, &auth).await?;
    Ok(Json(state.profiles.list(&query.into_filter()).await?))
}

/// One profile.
pub async fn get_user(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Profile>, AppError> {
    if let Caller::User(auth) = &caller {
        require_active_caller(&state, auth).await?;
    }
    let profile = state.profiles.find(id).await?;
    match caller {
        Caller::User(auth) if !can_view(&auth, &profile) => {
            Err(AppError::forbidden("You cannot view this user"))
        },
        _ => Ok(Json(profile)),
    }
}

/// Edit profile fields (self or admin).
pub async fn update_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>, AppError> {
    if auth.user.id != id && auth.user.role != Role::Admin {
        return Err(AppError::forbidden("You can only edit your own profile"));
    }
    require_active_caller(&state, &auth).await?;
    Ok(Json(state.profiles.update(id, patch).await?))
}

/// Fill in the client-only fields and mark the profile complete.
pub async fn complete_profile(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(completion): Json<ProfileCompletion>,
) -> Result<Json<Profile>, AppError> {
    auth.require_role(&[Role::Client])?;
    if auth.user.id != id {
        return Err(AppError::forbidden("You can only complete your own profile"));
    }
    require_active_caller(&state, &auth).await?;
    Ok(Json(state.profiles.complete(id, completion).await?))
}

/// Flip the active flag (admin).
pub async fn toggle_active(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Profile>, AppError> {
    auth.require_role(&[Role::Admin])?;
    require_active_caller(&state, &auth).await?;
    Ok(Json(state.profiles.toggle_active(id).await?))
}

/// Soft delete (admin).
pub async fn delete_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Profile>, AppError> {
    auth.require_role(&[Role::Admin])?;
    require_active_caller(&state, &auth).await?;
    Ok(Json(state.profiles.delete(id).await?))
}

/// Users holding a role, ordered by name.
pub async fn users_by_role(
    caller: Caller,
    State(state): State<AppState>,
    Path(role): Path<String>,
    Query(query): Query<RoleQuery>,
) -> Result<Json<Vec<Profile>>, AppError> {
    if let Caller::User(auth) = &caller {
        require_active_caller(&state, auth).await?;
    }
    let role: Role = role
        .parse()
        .map_err(|e: dentalbook_auth::UnknownRole| AppError::invalid_field("role", e.to_string()))?;
    Ok(Json(state.profiles.by_role(role, query.active).await?))
}

/// Active practitioners.
pub async fn available_practitioners(
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<Vec<Profile>>, AppError> {
    if let Caller::User(auth) = &caller {
        require_active_caller(&state, auth).await?;
    }
    Ok(Json(state.profiles.available_practitioners().await?))
}

/// Materialise a record pushed by another service; 201 when new.
pub async fn create_with_id(
    _internal: InternalService,
    State(state): State<AppState>,
    Json(record): Json<UserRecord>,
) -> Result<(StatusCode, Json<Profile>), AppError> {
    let (profile, created) = state.profiles.materialize(record).await?;
    Ok((created_status(created), Json(profile)))
}

/// Pull a record from identity and materialise it; 201 when new.
pub async fn sync_user(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Profile>), AppError> {
    tracing::info!(user_id = id, internal = matches!(caller, Caller::Internal), "Sync requested");
    let (profile, created) = state.profiles.sync(id).await?;
    Ok((created_status(created), Json(profile)))
}

/// Lookup by email for other services.
pub async fn user_by_email(
    _internal: InternalService,
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(state.profiles.find_by_email(&email).await?))
}

const fn created_status(created: bool) -> StatusCode {
    if created { StatusCode::CREATED } else { StatusCode::OK }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::server::{AppState, build_router};
    use crate::service::tests::{Harness, harness};
    use crate::types::tests::profile;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dentalbook_auth::{AuthError, AuthenticatedUser, Role, TokenValidator};
    use dentalbook_web::AuthState;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct StaticValidator;

    #[async_trait]
    impl TokenValidator for StaticValidator {
        async fn validate(&self, token: &str) -> dentalbook_auth::Result<AuthenticatedUser> {
            let (id, role) = match token {
                "admin" => (1, Role::Admin),
                "desk" => (2, Role::FrontDesk),
                "dentist-7" => (7, Role::Practitioner),
                "client-10" => (10, Role::Client),
                "client-11" => (11, Role::Client),
                "ghost" => (40, Role::Client),
                _ => return Err(AuthError::InvalidToken("unknown".to_string())),
            };
            Ok(AuthenticatedUser {
                id,
                email: format!("user{id}@example.com"),
                role,
                name: "Test".to_string(),
                surname: "User".to_string(),
            })
        }
    }

    async fn seeded() -> (Harness, axum::Router) {
        let h = harness();
        for (id, role) in [
            (1, Role::Admin),
            (2, Role::FrontDesk),
            (7, Role::Practitioner),
            (10, Role::Client),
            (11, Role::Client),
        ] {
            h.repository.seed(profile(id, role)).await;
        }
        let app = build_router(AppState::new(
            h.profiles.clone(),
            AuthState::new(Arc::new(StaticValidator), "svc-key"),
            None,
        ));
        (h, app)
    }

    async fn send(app: &axum::Router, request: axum::http::request::Builder, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = request;
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            },
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn call(app: &axum::Router, method: &str, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {token}"));
        send(app, request, body).await
    }

    async fn internal(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-internal-service", "svc-key");
        send(app, request, body).await
    }

    #[tokio::test]
    async fn listing_is_staff_only_and_paginated() {
        let (_h, app) = seeded().await;

        let (status, body) = call(&app, "GET", "/api/users?role=client&limit=1", "desk", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["pagination"]["totalItems"], 2);

        let (status, _) = call(&app, "GET", "/api/users", "client-10", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "GET", "/api/users", "nobody", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn clients_see_themselves_and_practitioners_only() {
        let (_h, app) = seeded().await;

        assert_eq!(call(&app, "GET", "/api/users/10", "client-10", None).await.0, StatusCode::OK);
        assert_eq!(call(&app, "GET", "/api/users/7", "client-10", None).await.0, StatusCode::OK);
        assert_eq!(call(&app, "GET", "/api/users/11", "client-10", None).await.0, StatusCode::FORBIDDEN);
        assert_eq!(call(&app, "GET", "/api/users/11", "dentist-7", None).await.0, StatusCode::OK);
        assert_eq!(internal(&app, "GET", "/api/users/11", None).await.0, StatusCode::OK);
        assert_eq!(internal(&app, "GET", "/api/users/404", None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn callers_without_an_active_replica_are_refused() {
        let (h, app) = seeded().await;

        let (status, _) = call(&app, "GET", "/api/users/7", "ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        h.profiles.toggle_active(11).await.unwrap();
        let (status, _) = call(&app, "GET", "/api/users/11", "client-11", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn update_ignores_identity_fields() {
        let (_h, app) = seeded().await;

        let (status, body) = call(
            &app,
            "PUT",
            "/api/users/10",
            "client-10",
            Some(json!({"name": "Lucía", "email": "hijack@example.com", "role": "admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Lucía");
        assert_eq!(body["email"], "user10@example.com");
        assert_eq!(body["role"], "client");

        let (status, _) = call(&app, "PUT", "/api/users/11", "client-10", Some(json!({"name": "X"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, "PUT", "/api/users/11", "admin", Some(json!({"name": "X"}))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn complete_profile_rules() {
        let (_h, app) = seeded().await;
        let body = |national_id: &str| {
            json!({
                "nationalId": national_id,
                "birthDate": "1990-04-01",
                "phone": "600123123",
                "address": "Calle Mayor 1",
            })
        };

        let (status, profile) =
            call(&app, "POST", "/api/users/10/complete-profile", "client-10", Some(body("12345678A"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["profileComplete"], true);

        let (status, error) =
            call(&app, "POST", "/api/users/11/complete-profile", "client-11", Some(body("12345678A"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error["details"]["field"], "nationalId");

        let (status, _) =
            call(&app, "POST", "/api/users/11/complete-profile", "client-10", Some(body("87654321B"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            call(&app, "POST", "/api/users/11/complete-profile", "client-11", Some(body("short"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_toggles_and_soft_deletes() {
        let (h, app) = seeded().await;

        assert_eq!(
            call(&app, "PATCH", "/api/users/11/toggle-active", "desk", None).await.0,
            StatusCode::FORBIDDEN
        );
        let (status, body) = call(&app, "PATCH", "/api/users/11/toggle-active", "admin", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], false);

        let (status, body) = call(&app, "DELETE", "/api/users/10", "admin", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], false);
        assert!(h.profiles.find(10).await.is_ok());
        assert_eq!(h.bus.published_types("user.events"), vec!["USER_UPDATED", "USER_DELETED"]);
    }

    #[tokio::test]
    async fn role_listings() {
        let (_h, app) = seeded().await;

        let (status, body) = call(&app, "GET", "/api/users/role/client", "desk", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _) = call(&app, "GET", "/api/users/role/wizard", "desk", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = internal(&app, "GET", "/api/users/practitioners/available", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], 7);
    }

    #[tokio::test]
    async fn sync_endpoints() {
        let (_h, app) = seeded().await;
        let record = json!({"id": 20, "email": "user20@example.com", "name": "Eva", "surname": "Gil", "role": "client"});

        let (status, _) = call(&app, "POST", "/api/users/create-with-id", "admin", Some(record.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            internal(&app, "POST", "/api/users/create-with-id", Some(record.clone())).await.0,
            StatusCode::CREATED
        );
        assert_eq!(
            internal(&app, "POST", "/api/users/create-with-id", Some(record)).await.0,
            StatusCode::OK
        );

        let (status, body) = internal(&app, "POST", "/api/users/sync/30", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "user30@example.com");
        assert_eq!(call(&app, "POST", "/api/users/sync/30", "desk", None).await.0, StatusCode::OK);
        assert_eq!(internal(&app, "POST", "/api/users/sync/77", None).await.0, StatusCode::NOT_FOUND);
        assert_eq!(
            internal(&app, "POST", "/api/users/sync/99", None).await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        let (status, body) = internal(&app, "GET", "/api/users/by-email/user20@example.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 20);
    }
}
