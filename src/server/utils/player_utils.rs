use crate::server::dtos::{ContentMetadata, MediaType};

/// everything needed to work out which proxied player the iframe should load
#[derive(Debug, Clone, Copy)]
pub struct PlayerRequest<'a> {
    pub content: &'a ContentMetadata,
    pub backend: &'a str,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl PlayerRequest<'_> {
    pub fn player_url(&self) -> String {
        resolve_player_url(self.content, self.backend, self.season, self.episode)
    }
}

/// maps content onto the `/proxy/{backend}` path its player lives under
///
/// an empty string means there's no player for this media type. season and episode fall back to
/// 1 when missing or 0
pub fn resolve_player_url(
    content: &ContentMetadata,
    backend_name: &str,
    season: Option<u32>,
    episode: Option<u32>,
) -> String {
    let backend = backend_name.to_lowercase();

    match content.media_type {
        MediaType::Movie => format!("/proxy/{}/embed/movie?tmdb={}", backend, content.id),
        MediaType::Tv => {
            let season = season.filter(|s| *s > 0).unwrap_or(1);
            let episode = episode.filter(|e| *e > 0).unwrap_or(1);
            format!(
                "/proxy/{}/embed/tv?tmdb={}&season={}&episode={}",
                backend, content.id, season, episode
            )
        }
        MediaType::Other => String::new(),
    }
}

/// lenient query parsing, anything that isn't a number counts as absent
pub fn parse_episode_number(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
}
