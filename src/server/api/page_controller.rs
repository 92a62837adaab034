use axum::{
    Extension, Router,
    extract::{Path, Query},
    response::Html,
    routing::get,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info};

use crate::server::{
    dtos::MediaType,
    error::{AppResult, Error},
    services::GatewayServices,
    utils::{
        page_utils::render_player_page,
        player_utils::{PlayerRequest, parse_episode_number},
    },
};

/// query params are kept as raw strings, `?season=abc` shouldn't turn into a 400
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub season: Option<String>,
    pub episode: Option<String>,
    pub server: Option<String>,
}

pub struct PageController;

impl PageController {
    pub fn app() -> Router {
        Router::new().route("/{content_id}", get(Self::content_page))
    }

    pub async fn content_page(
        Extension(services): Extension<GatewayServices>,
        Path(content_id): Path<String>,
        Query(query): Query<PageQuery>,
    ) -> AppResult<Html<String>> {
        counter!("gateway_page_requests_total").increment(1);

        let season = parse_episode_number(query.season.as_deref());
        let episode = parse_episode_number(query.episode.as_deref());
        let default_server = services.config.default_server.as_str();
        // an unknown server would only get an iframe that 404s, fall back to the default instead
        let backend = match query.server.as_deref().filter(|s| !s.is_empty()) {
            Some(name) if services.registry.get(name).is_some() => name,
            Some(name) => {
                debug!("unknown server {}, using {}", name, default_server);
                default_server
            }
            None => default_server,
        };

        // only a hint for which tmdb endpoint to hit
        let kind = if season.is_some() || episode.is_some() {
            MediaType::Tv
        } else {
            MediaType::Movie
        };

        let content = services.metadata.lookup(&content_id, kind).await?;
        debug!("{} resolved to {:?} '{}'", content_id, content.media_type, content.title);

        let player_url = PlayerRequest {
            content: &content,
            backend,
            season,
            episode,
        }
        .player_url();

        if player_url.is_empty() {
            info!("no player for {} ({:?})", content_id, content.media_type);
            return Err(Error::NotFound("Player URL not found".to_string()));
        }

        Ok(Html(render_player_page(&content.title, &player_url)))
    }
}
