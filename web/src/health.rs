//! Liveness, readiness and metrics endpoints.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use dentalbook_runtime::{HealthReport, HealthStatus, metrics::MetricsExporter};

/// `GET /health/live`: the process is up.
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// Render a readiness report. Degraded still serves traffic; unhealthy is 503.
#[must_use]
pub fn health_response(report: HealthReport) -> Response {
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report)).into_response()
}

/// Render the Prometheus scrape body.
#[must_use]
pub fn metrics_response(exporter: &MetricsExporter) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        exporter.render(),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use dentalbook_runtime::HealthCheck;

    #[test]
    fn unhealthy_reports_are_503() {
        let report = HealthReport::new(
            "profile-service",
            vec![HealthCheck::unhealthy("postgres", "connection refused")],
        );
        assert_eq!(health_response(report).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn degraded_reports_still_serve() {
        let report = HealthReport::new(
            "profile-service",
            vec![
                HealthCheck::healthy("postgres"),
                HealthCheck::degraded("event-bus", "consumer lagging"),
            ],
        );
        let response = health_response(report);
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"][1]["component"], "event-bus");
    }
}
