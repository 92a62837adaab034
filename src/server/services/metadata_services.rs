use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use tracing::{debug, error};

use crate::server::{
    dtos::{ContentMetadata, MediaType, TmdbContentResponse},
    error::{AppResult, Error},
};

pub type DynMetadataService = Arc<dyn MetadataServiceTrait + Send + Sync>;

/// content id -> metadata, no caching, every call goes out to tmdb
#[automock]
#[async_trait]
pub trait MetadataServiceTrait {
    /// `kind` picks the tmdb endpoint, the response's own media_type wins when it has one
    async fn lookup(&self, content_id: &str, kind: MediaType) -> AppResult<ContentMetadata>;
}

#[derive(Clone)]
pub struct TmdbMetadataService {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TmdbMetadataService {
    pub fn new(http_client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn details_url(&self, content_id: &str, kind: MediaType) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            kind.endpoint(),
            urlencoding::encode(content_id)
        )
    }
}

#[async_trait]
impl MetadataServiceTrait for TmdbMetadataService {
    async fn lookup(&self, content_id: &str, kind: MediaType) -> AppResult<ContentMetadata> {
        let url = self.details_url(content_id, kind);
        debug!("looking up {} on tmdb", content_id);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                error!("tmdb request for {} failed: {}", content_id, e);
                Error::MetadataLookup(format!("tmdb request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("tmdb returned {} for {}", status, content_id);
            return Err(Error::MetadataLookup(format!("tmdb returned {}", status)));
        }

        let details: TmdbContentResponse = response.json().await.map_err(|e| {
            error!("failed to parse tmdb response for {}: {}", content_id, e);
            Error::MetadataLookup(format!("failed to parse tmdb response: {}", e))
        })?;

        Ok(details.into_metadata(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_url_uses_the_kind_endpoint() {
        let service = TmdbMetadataService::new(
            reqwest::Client::new(),
            "https://api.themoviedb.org/3/",
            "key",
        );

        assert_eq!(
            service.details_url("550", MediaType::Movie),
            "https://api.themoviedb.org/3/movie/550"
        );
        assert_eq!(
            service.details_url("1399", MediaType::Tv),
            "https://api.themoviedb.org/3/tv/1399"
        );
    }

    #[test]
    fn details_url_escapes_the_id() {
        let service = TmdbMetadataService::new(reqwest::Client::new(), "http://tmdb.test", "key");

        assert_eq!(
            service.details_url("../account", MediaType::Movie),
            "http://tmdb.test/movie/..%2Faccount"
        );
    }
}
