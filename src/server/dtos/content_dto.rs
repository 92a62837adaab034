use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
    #[serde(other)]
    Other,
}

impl MediaType {
    pub fn from_tmdb(value: &str) -> Self {
        match value {
            "movie" => Self::Movie,
            "tv" => Self::Tv,
            _ => Self::Other,
        }
    }

    /// tmdb path segment used to look this kind of content up
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Tv => "tv",
            Self::Movie | Self::Other => "movie",
        }
    }
}

/// what the page handler needs to know about a piece of content, fetched fresh every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentMetadata {
    pub id: i64,
    pub media_type: MediaType,
    pub title: String,
}

/// the subset of a tmdb movie/tv details (or search result) body we care about
///
/// details endpoints don't include media_type, search and trending results do
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbContentResponse {
    pub id: i64,
    pub media_type: Option<String>,
    pub title: Option<String>,
    // tv shows use name instead of title
    pub name: Option<String>,
}

impl TmdbContentResponse {
    pub fn into_metadata(self, queried: MediaType) -> ContentMetadata {
        let media_type = self
            .media_type
            .as_deref()
            .map(MediaType::from_tmdb)
            .unwrap_or(queried);

        ContentMetadata {
            id: self.id,
            media_type,
            title: self.title.or(self.name).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_without_media_type_use_the_queried_kind() {
        let body = r#"{"id": 550, "title": "Fight Club", "runtime": 139}"#;
        let response: TmdbContentResponse = serde_json::from_str(body).unwrap();

        let metadata = response.into_metadata(MediaType::Movie);

        assert_eq!(
            metadata,
            ContentMetadata {
                id: 550,
                media_type: MediaType::Movie,
                title: "Fight Club".to_string(),
            }
        );
    }

    #[test]
    fn tv_names_fill_in_for_titles() {
        let body = r#"{"id": 1399, "name": "Game of Thrones"}"#;
        let response: TmdbContentResponse = serde_json::from_str(body).unwrap();

        let metadata = response.into_metadata(MediaType::Tv);

        assert_eq!(metadata.media_type, MediaType::Tv);
        assert_eq!(metadata.title, "Game of Thrones");
    }

    #[test]
    fn explicit_media_types_win() {
        let body = r#"{"id": 3, "media_type": "person", "name": "Someone"}"#;
        let response: TmdbContentResponse = serde_json::from_str(body).unwrap();

        assert_eq!(
            response.into_metadata(MediaType::Movie).media_type,
            MediaType::Other
        );
    }
}
