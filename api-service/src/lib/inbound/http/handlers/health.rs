use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::inbound::http::handlers::ApiSuccess;
use crate::inbound::http::router::AppState;

pub const SERVICE_NAME: &str = "api-service";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<&'static str, String>,
}

/// Report storage reachability; 503 when any check fails.
pub async fn health(State(state): State<AppState>) -> ApiSuccess<HealthStatus> {
    let mut checks = BTreeMap::new();

    let user_repository = match state.user_service.count_users().await {
        Ok(_) => "healthy".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed for user repository");
            "unhealthy".to_string()
        }
    };
    checks.insert("user_repository", user_repository);

    let healthy = checks.values().all(|check| check == "healthy");
    let (status, code) = if healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    ApiSuccess::new(
        code,
        HealthStatus {
            status,
            service: SERVICE_NAME,
            timestamp: Utc::now(),
            checks,
        },
    )
}
