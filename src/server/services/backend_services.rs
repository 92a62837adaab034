use std::collections::BTreeMap;

use crate::config::AppConfig;

/// one upstream embed provider, reachable only through `/proxy/{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub name: String,
    /// absolute origin without a trailing slash, e.g. `https://vidsrc.xyz`
    pub origin: String,
}

impl Backend {
    /// the lowercased path segment used in proxy routes and player urls
    pub fn slug(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn route_prefix(&self) -> String {
        format!("/proxy/{}", self.slug())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("backend '{0}' is not registered")]
    NotFound(String),

    #[error("backend '{0}' is registered more than once")]
    DuplicateName(String),

    #[error("backend name '{0}' can't be used as a path segment")]
    InvalidName(String),

    #[error("backend '{name}' has an invalid origin '{origin}'")]
    InvalidOrigin { name: String, origin: String },

    #[error("no backends configured")]
    Empty,
}

/// immutable name -> origin table, built once on startup and shared read-only
///
/// keys are the lowercased names so lookups ignore case, the BTreeMap keeps route installation
/// order stable between runs
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Backend>,
}

impl BackendRegistry {
    pub fn new<I, N, O>(entries: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (N, O)>,
        N: Into<String>,
        O: Into<String>,
    {
        let mut backends = BTreeMap::new();

        for (name, origin) in entries {
            let name = name.into();
            let origin = origin.into();

            if !Self::is_path_safe(&name) {
                return Err(RegistryError::InvalidName(name));
            }

            let origin = Self::normalize_origin(&origin).ok_or_else(|| {
                RegistryError::InvalidOrigin {
                    name: name.clone(),
                    origin: origin.clone(),
                }
            })?;

            let key = name.to_lowercase();
            if backends.contains_key(&key) {
                return Err(RegistryError::DuplicateName(name));
            }

            backends.insert(key, Backend { name, origin });
        }

        if backends.is_empty() {
            return Err(RegistryError::Empty);
        }

        Ok(Self { backends })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        Self::new(config.server_entries())
    }

    pub fn get(&self, name: &str) -> Option<&Backend> {
        self.backends.get(&name.to_lowercase())
    }

    /// only ever called with names the router registered itself, so NotFound is a config bug
    pub fn resolve_origin(&self, name: &str) -> Result<&str, RegistryError> {
        self.get(name)
            .map(|backend| backend.origin.as_str())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn backends(&self) -> impl Iterator<Item = &Backend> {
        self.backends.values()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    fn is_path_safe(name: &str) -> bool {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    fn normalize_origin(origin: &str) -> Option<String> {
        let parsed = url::Url::parse(origin).ok()?;

        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return None;
        }

        // queries and fragments would end up glued to every forwarded path
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return None;
        }

        Some(origin.trim_end_matches('/').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BackendRegistry {
        BackendRegistry::new([
            ("VENUS", "https://vidsrc.xyz"),
            ("MARS", "https://vidsrc.me/"),
        ])
        .unwrap()
    }

    #[test]
    fn resolves_names_case_insensitively() {
        let registry = registry();

        assert_eq!(registry.resolve_origin("VENUS"), Ok("https://vidsrc.xyz"));
        assert_eq!(registry.resolve_origin("venus"), Ok("https://vidsrc.xyz"));
        assert_eq!(registry.resolve_origin("Mars"), Ok("https://vidsrc.me"));
    }

    #[test]
    fn unknown_names_are_not_found() {
        assert_eq!(
            registry().resolve_origin("PLUTO"),
            Err(RegistryError::NotFound("PLUTO".to_string()))
        );
    }

    #[test]
    fn rejects_duplicates_ignoring_case() {
        let result = BackendRegistry::new([("VENUS", "https://a.test"), ("venus", "https://b.test")]);

        assert_eq!(
            result.unwrap_err(),
            RegistryError::DuplicateName("venus".to_string())
        );
    }

    #[test]
    fn rejects_path_unsafe_names() {
        for name in ["", "a/b", "a b", "v?x", "../up"] {
            let result = BackendRegistry::new([(name, "https://a.test")]);
            assert_eq!(result.unwrap_err(), RegistryError::InvalidName(name.to_string()));
        }
    }

    #[test]
    fn rejects_bad_origins() {
        for origin in ["", "vidsrc.xyz", "ftp://vidsrc.xyz", "https://a.test/?q=1"] {
            let result = BackendRegistry::new([("VENUS", origin)]);
            assert!(matches!(
                result.unwrap_err(),
                RegistryError::InvalidOrigin { .. }
            ));
        }
    }

    #[test]
    fn rejects_an_empty_registry() {
        let entries: Vec<(String, String)> = Vec::new();
        assert_eq!(BackendRegistry::new(entries).unwrap_err(), RegistryError::Empty);
    }

    #[test]
    fn backends_iterate_in_name_order() {
        let names: Vec<String> = registry().backends().map(Backend::slug).collect();
        assert_eq!(names, vec!["mars", "venus"]);
    }

    #[test]
    fn route_prefix_is_lowercased() {
        let registry = registry();
        let venus = registry.get("venus").unwrap();

        assert_eq!(venus.route_prefix(), "/proxy/venus");
        assert_eq!(venus.name, "VENUS");
    }
}
