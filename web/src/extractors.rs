//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: request correlation id (set by the middleware, or from the header)
//! - [`ClientIp`]: client address from proxy headers or the connection
//! - [`UserAgent`]: the `User-Agent` header
//! - [`AuthUser`]: the caller, from a validated bearer token (or the
//!   `token` query parameter on a WebSocket upgrade)
//! - [`InternalService`]: proof of the shared internal-service credential
//! - [`Caller`]: either of the last two
//!
//! The auth extractors need an [`AuthState`] reachable from the router state
//! through `FromRef`.

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Query, connect_info::ConnectInfo},
    http::{HeaderMap, header, request::Parts},
};
use dentalbook_auth::{AuthenticatedUser, INTERNAL_SERVICE_HEADER, Role, TokenValidator, bearer_token};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use uuid::Uuid;

/// Correlation ID for request tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        let correlation_id = parts
            .headers
            .get(crate::middleware::CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Client IP address.
///
/// Priority: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// connection address (when the server was started with connect info),
/// then loopback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = extract_client_ip(&parts.headers, parts.extensions.get());
        Ok(Self(ip))
    }
}

fn extract_client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> IpAddr {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    let real_ip = || {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    };

    forwarded
        .or_else(real_ip)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// User-Agent header, `"Unknown"` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("Unknown")
            .to_string();

        Ok(Self(user_agent))
    }
}

/// What the auth extractors need from the application state.
#[derive(Clone)]
pub struct AuthState {
    /// Validates bearer tokens
    pub validator: Arc<dyn TokenValidator>,
    /// Expected value of the internal-service header
    pub internal_key: Arc<str>,
}

impl AuthState {
    /// Bundle a validator and the internal-service credential.
    #[must_use]
    pub fn new(validator: Arc<dyn TokenValidator>, internal_key: impl Into<Arc<str>>) -> Self {
        Self {
            validator,
            internal_key: internal_key.into(),
        }
    }

    fn is_internal(&self, headers: &HeaderMap) -> bool {
        headers
            .get(INTERNAL_SERVICE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == &*self.internal_key)
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState").finish_non_exhaustive()
    }
}

/// The authenticated caller, plus the raw token for forwarding.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Principal from the token
    pub user: AuthenticatedUser,
    /// The bearer token as received
    pub token: String,
}

impl AuthUser {
    /// Reject with 403 unless the caller holds one of `roles`.
    ///
    /// # Errors
    ///
    /// Returns a forbidden [`AppError`] naming the caller's role.
    pub fn require_role(&self, roles: &[Role]) -> Result<(), AppError> {
        if self.user.has_any_role(roles) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "Role '{}' is not allowed to perform this action",
                self.user.role
            )))
        }
    }

    /// Reject with 403 unless the caller is user `id` or staff.
    ///
    /// # Errors
    ///
    /// Returns a forbidden [`AppError`].
    pub fn require_self_or_staff(&self, id: i64) -> Result<(), AppError> {
        if self.user.is_self_or_staff(id) {
            Ok(())
        } else {
            Err(AppError::forbidden("You can only act on your own account"))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthState::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
            .or_else(|| upgrade_token(parts))
            .ok_or_else(|| AppError::unauthorized("Access denied: no token provided"))?;

        let user = auth.validator.validate(&token).await?;
        Ok(Self { user, token })
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

/// Browsers cannot set headers on a WebSocket handshake, so an upgrade
/// request may carry the token as `?token=`.
fn upgrade_token(parts: &Parts) -> Option<String> {
    let upgrading = parts
        .headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if !upgrading {
        return None;
    }
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .map(|Query(query)| query.token)
}

/// A request carrying the shared internal-service credential.
#[derive(Debug, Clone, Copy)]
pub struct InternalService;

#[async_trait]
impl<S> FromRequestParts<S> for InternalService
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if AuthState::from_ref(state).is_internal(&parts.headers) {
            Ok(Self)
        } else {
            tracing::warn!("Internal endpoint called without a valid service credential");
            Err(AppError::forbidden("Internal endpoint"))
        }
    }
}

/// Either another service (internal credential) or an authenticated user.
#[derive(Debug, Clone)]
pub enum Caller {
    /// Carries the internal-service credential
    Internal,
    /// Presented a valid bearer token
    User(AuthUser),
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if AuthState::from_ref(state).is_internal(&parts.headers) {
            return Ok(Self::Internal);
        }
        AuthUser::from_request_parts(parts, state).await.map(Self::User)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use dentalbook_auth::{AuthError, AuthenticatedUser};

    struct StaticValidator;

    #[async_trait]
    impl TokenValidator for StaticValidator {
        async fn validate(&self, token: &str) -> dentalbook_auth::Result<AuthenticatedUser> {
            match token {
                "desk" => Ok(AuthenticatedUser {
                    id: 2,
                    email: "desk@example.com".to_string(),
                    role: Role::FrontDesk,
                    name: "Front".to_string(),
                    surname: "Desk".to_string(),
                }),
                "down" => Err(AuthError::Unavailable("timeout".to_string())),
                _ => Err(AuthError::InvalidToken("bad".to_string())),
            }
        }
    }

    fn state() -> AuthState {
        AuthState::new(Arc::new(StaticValidator), "svc-key")
    }

    fn parts(headers: &[(&str, &str)]) -> Parts {
        parts_at("/", headers)
    }

    fn parts_at(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let header = uuid.to_string();
        let mut parts = parts(&[("X-Correlation-ID", header.as_str())]);
        let id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id.0, uuid);
    }

    #[tokio::test]
    async fn client_ip_priority() {
        let mut forwarded = parts(&[
            ("X-Forwarded-For", "203.0.113.1, 198.51.100.1"),
            ("X-Real-IP", "198.51.100.42"),
        ]);
        let ip = ClientIp::from_request_parts(&mut forwarded, &()).await.unwrap();
        assert_eq!(ip.0.to_string(), "203.0.113.1");

        let mut real = parts(&[("X-Real-IP", "198.51.100.42")]);
        let ip = ClientIp::from_request_parts(&mut real, &()).await.unwrap();
        assert_eq!(ip.0.to_string(), "198.51.100.42");

        let mut none = parts(&[]);
        let ip = ClientIp::from_request_parts(&mut none, &()).await.unwrap();
        assert_eq!(ip.0.to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn user_agent_fallback() {
        let mut parts = parts(&[]);
        let ua = UserAgent::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ua.0, "Unknown");
    }

    #[tokio::test]
    async fn auth_user_requires_a_valid_bearer_token() {
        let state = state();

        let mut ok = parts(&[("Authorization", "Bearer desk")]);
        let user = AuthUser::from_request_parts(&mut ok, &state).await.unwrap();
        assert_eq!(user.user.role, Role::FrontDesk);
        assert_eq!(user.token, "desk");
        assert!(user.require_role(&[Role::Admin, Role::FrontDesk]).is_ok());
        assert!(user.require_role(&[Role::Practitioner]).is_err());

        let mut missing = parts(&[]);
        let err = AuthUser::from_request_parts(&mut missing, &state).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let mut down = parts(&[("Authorization", "Bearer down")]);
        let err = AuthUser::from_request_parts(&mut down, &state).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn query_token_only_counts_on_websocket_upgrades() {
        let state = state();

        let mut upgrade = parts_at("/ws?token=desk", &[("Upgrade", "websocket")]);
        let user = AuthUser::from_request_parts(&mut upgrade, &state).await.unwrap();
        assert_eq!(user.user.id, 2);

        let mut plain = parts_at("/appointments?token=desk", &[]);
        let err = AuthUser::from_request_parts(&mut plain, &state).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn internal_credential_gates_internal_endpoints() {
        let state = state();

        let mut good = parts(&[("x-internal-service", "svc-key")]);
        assert!(InternalService::from_request_parts(&mut good, &state).await.is_ok());

        let mut wrong = parts(&[("x-internal-service", "guess")]);
        let err = InternalService::from_request_parts(&mut wrong, &state).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let mut internal = parts(&[("x-internal-service", "svc-key")]);
        assert!(matches!(
            Caller::from_request_parts(&mut internal, &state).await.unwrap(),
            Caller::Internal
        ));

        let mut user = parts(&[("Authorization", "Bearer desk")]);
        assert!(matches!(
            Caller::from_request_parts(&mut user, &state).await.unwrap(),
            Caller::User(_)
        ));
    }
}
