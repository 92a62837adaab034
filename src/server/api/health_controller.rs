use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::warn;

use crate::logger::Logger;
use crate::server::dtos::health_dto::{
    BackendsHealth, FilterEngineHealth, HealthResponse, HealthStatus, ServiceHealthDetails,
};
use crate::server::services::GatewayServices;
use crate::server::services::filter_services::FilterState;
use crate::server::{get_app_version, get_uptime_seconds};

/// health endpoint, never fails. an engine that isn't ready only means bodies pass through
/// unfiltered so that's reported as degraded with a 200
pub async fn health_endpoint(
    Extension(services): Extension<GatewayServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let filter_state = services.filter.state();

    let status = match filter_state {
        FilterState::Ready => HealthStatus::Healthy,
        FilterState::Failed => {
            warn!("health check: filter engine failed to load, serving unfiltered");
            HealthStatus::Degraded
        }
        FilterState::Uninitialized | FilterState::Loading => HealthStatus::Degraded,
    };

    let response = HealthResponse {
        status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: Logger::environment_name(services.config.cargo_env).to_string(),
        services: ServiceHealthDetails {
            filter_engine: FilterEngineHealth {
                state: filter_state,
            },
            backends: BackendsHealth {
                registered: services.registry.len(),
                names: services.registry.backends().map(|b| b.slug()).collect(),
            },
        },
    };

    (StatusCode::OK, Json(response))
}
