#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

pub const DEFAULT_SERVERS: &str = "VENUS=https://vidsrc.xyz,MARS=https://vidsrc.me,JUPITER=https://vidsrc.pm,SATURN=https://2embed.org";

pub const DEFAULT_FILTER_LISTS: &str =
    "https://easylist.to/easylist/easylist.txt,https://easylist.to/easylist/easyprivacy.txt";

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "3000")]
    pub port: u16,

    // tmdb v3 api key, the page handler can't do anything without it
    #[clap(long, env)]
    pub tmdb_api_key: String,

    #[clap(long, env, default_value = "https://api.themoviedb.org/3")]
    pub tmdb_base_url: String,

    // comma separated NAME=origin pairs, names end up lowercased in /proxy/{name}
    #[clap(long, env, default_value = DEFAULT_SERVERS)]
    pub servers: String,

    // backend used by the page handler when ?server= is missing
    #[clap(long, env, default_value = "VENUS")]
    pub default_server: String,

    // static assets served at the root
    #[clap(long, env, default_value = "public")]
    pub public_dir: String,

    // block lists fetched once on startup, comma separated
    #[clap(long, env, default_value = DEFAULT_FILTER_LISTS)]
    pub filter_lists: String,

    // upstream bodies are buffered whole before filtering so this caps the memory per request
    #[clap(long, env, default_value = "16777216")]
    pub max_body_bytes: usize,

    // used for both upstream proxying and tmdb lookups
    #[clap(long, env, default_value = "30")]
    pub upstream_timeout_secs: u64,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    /// splits `servers` into (name, origin) pairs, blank entries are skipped
    pub fn server_entries(&self) -> Vec<(String, String)> {
        self.servers
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((name, origin)) => (name.trim().to_string(), origin.trim().to_string()),
                // left for the registry to reject as a bad origin
                None => (entry.to_string(), String::new()),
            })
            .collect()
    }

    pub fn filter_list_urls(&self) -> Vec<String> {
        self.filter_lists
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for AppConfig {
    // defaults aren't really needed here but it's here as a bad fallback (and for tests)
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 3000,
            tmdb_api_key: String::new(),
            tmdb_base_url: "https://api.themoviedb.org/3".to_string(),
            servers: DEFAULT_SERVERS.to_string(),
            default_server: "VENUS".to_string(),
            public_dir: "public".to_string(),
            filter_lists: DEFAULT_FILTER_LISTS.to_string(),
            max_body_bytes: 16 * 1024 * 1024,
            upstream_timeout_secs: 30,
            sentry_dsn: None,
        }
    }
}
