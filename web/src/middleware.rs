//! Correlation-id middleware.
//!
//! 1. Take the id from `X-Correlation-ID` (or generate a UUID v4)
//! 2. Store it in the request extensions as [`CorrelationId`]
//! 3. Run the request inside an `http_request` span carrying it
//! 4. Echo it back in the response header
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/appointments", post(create))
//!     .layer(correlation_id_layer());
//! ```

use crate::extractors::CorrelationId;
use axum::{extract::Request, http::HeaderValue, response::Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create a layer that adds correlation ID tracking to all requests.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        req.extensions_mut().insert(CorrelationId(correlation_id));

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|id: CorrelationId| async move { id.0.to_string() }),
            )
            .layer(correlation_id_layer())
    }

    #[tokio::test]
    async fn generates_an_id_when_missing() {
        let response = app()
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("Correlation ID header should be present")
            .to_str()
            .unwrap()
            .to_string();
        assert!(Uuid::parse_str(&header).is_ok());

        // Handler sees the same id the response carries.
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), header);
    }

    #[tokio::test]
    async fn preserves_a_valid_incoming_id() {
        let incoming = Uuid::new_v4();
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header(CORRELATION_ID_HEADER, incoming.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            incoming.to_string().as_str()
        );
    }

    #[tokio::test]
    async fn replaces_an_invalid_incoming_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header(CORRELATION_ID_HEADER, "not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let header = response.headers().get(CORRELATION_ID_HEADER).unwrap().to_str().unwrap();
        assert_ne!(header, "not-a-uuid");
        assert!(Uuid::parse_str(header).is_ok());
    }
}
