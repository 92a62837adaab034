use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::server::services::filter_services::FilterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    // serving, but bodies aren't being filtered
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub version: String,
    pub environment: String,
    pub services: ServiceHealthDetails,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealthDetails {
    pub filter_engine: FilterEngineHealth,
    pub backends: BackendsHealth,
}

#[derive(Debug, Serialize)]
pub struct FilterEngineHealth {
    pub state: FilterState,
}

#[derive(Debug, Serialize)]
pub struct BackendsHealth {
    pub registered: usize,
    pub names: Vec<String>,
}
