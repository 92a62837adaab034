use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::info;

use crate::config::AppConfig;

use super::{
    backend_services::BackendRegistry, filter_services::DynFilterService,
    metadata_services::{DynMetadataService, TmdbMetadataService},
};

/// everything a request handler can reach, cloned into each request through an Extension
///
/// nothing in here is mutated after startup apart from the filter engine's one-time load
#[derive(Clone)]
pub struct GatewayServices {
    pub registry: Arc<BackendRegistry>,
    pub filter: DynFilterService,
    pub metadata: DynMetadataService,
    /// upstream client, doesn't follow redirects or decompress so bodies reach the filter raw
    pub http: reqwest::Client,
    pub config: Arc<AppConfig>,
}

impl GatewayServices {
    pub fn new(config: Arc<AppConfig>, filter: DynFilterService) -> anyhow::Result<Self> {
        info!("starting gateway services...");

        let registry =
            BackendRegistry::from_config(&config).context("invalid backend configuration")?;
        info!("registered {} backends", registry.len());

        let http = Self::upstream_client(&config)?;

        let lookup_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .build()
            .context("failed to build tmdb client")?;
        let metadata = Arc::new(TmdbMetadataService::new(
            lookup_client,
            &config.tmdb_base_url,
            &config.tmdb_api_key,
        )) as DynMetadataService;

        Self::from_parts(config, registry, filter, metadata, http)
    }

    /// assembles services from prebuilt pieces, also how tests swap in mocks
    pub fn from_parts(
        config: Arc<AppConfig>,
        registry: BackendRegistry,
        filter: DynFilterService,
        metadata: DynMetadataService,
        http: reqwest::Client,
    ) -> anyhow::Result<Self> {
        if registry.get(&config.default_server).is_none() {
            bail!(
                "default server '{}' is not one of the configured backends",
                config.default_server
            );
        }

        Ok(Self {
            registry: Arc::new(registry),
            filter,
            metadata,
            http,
            config,
        })
    }

    pub fn upstream_client(config: &AppConfig) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build upstream client")
    }
}
