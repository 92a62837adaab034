pub mod api;
pub mod dtos;
pub mod error;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::config::AppConfig;

use api::{PageController, ProxyController, health_controller::health_endpoint};
use services::GatewayServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub struct ApplicationServer;

impl ApplicationServer {
    /// proxy routes win, then health/metrics, then static files, then the content page
    pub fn router(services: GatewayServices, metrics: Option<PrometheusHandle>) -> Router {
        for backend in services.registry.backends() {
            info!("proxying {} -> {}", backend.route_prefix(), backend.origin);
        }

        let page_router = PageController::app().layer(Extension(services.clone()));
        let public = ServeDir::new(&services.config.public_dir).fallback(page_router);

        let mut router = ProxyController::app().route("/health", get(health_endpoint));

        // comment out if you don't want prometheus scraping this
        if let Some(handle) = metrics {
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        router
            .fallback_service(public)
            .layer(Extension(services))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(
        config: Arc<AppConfig>,
        services: GatewayServices,
        metrics: Option<PrometheusHandle>,
    ) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let router = Self::router(services, metrics);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!("gateway listening on http://{}", addr);

        axum::serve(listener, router)
            .await
            .context("error while starting server")?;

        Ok(())
    }
}
