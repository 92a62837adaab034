use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use adblock::Engine;
use adblock::lists::{FilterSet, ParseOptions};
use adblock::request::Request;
use once_cell::sync::{Lazy, OnceCell};
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, error, info, warn};

pub type DynFilterService = Arc<dyn FilterServiceTrait + Send + Sync>;

/// lifecycle of the block list, only ever moves forward
///
/// uninitialized -> loading -> ready, or loading -> failed when nothing could be loaded. anything
/// but ready means bodies go through untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

impl FilterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Failed,
            _ => Self::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Loading => 1,
            Self::Ready => 2,
            Self::Failed => 3,
        }
    }
}

/// what the filter knows about the body it's given
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    /// absolute url the body was fetched from
    pub url: &'a str,
    pub content_type: &'a str,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterInitError {
    #[error("filter engine initialization already started")]
    AlreadyStarted,

    #[error("block lists contained no usable rules")]
    NoRules,

    #[error("block list compilation did not finish: {0}")]
    CompileFailed(String),
}

pub trait FilterServiceTrait {
    fn state(&self) -> FilterState;

    /// pure function of (body, url, content type). never blocks, never touches the network
    fn filter(&self, body: Vec<u8>, context: &FilterContext<'_>) -> Vec<u8>;
}

/// sub-resources that get dropped from html when their url is blocked
/// (selector, attribute holding the url, adblock request type)
static RESOURCE_SELECTORS: Lazy<Vec<(Selector, &'static str, &'static str)>> = Lazy::new(|| {
    [
        ("script[src]", "src", "script"),
        ("iframe[src]", "src", "sub_frame"),
        ("frame[src]", "src", "sub_frame"),
        ("img[src]", "src", "image"),
        ("link[href]", "href", "stylesheet"),
        ("embed[src]", "src", "object"),
        ("object[data]", "data", "object"),
        ("video[src]", "src", "media"),
        ("audio[src]", "src", "media"),
        ("source[src]", "src", "media"),
    ]
    .into_iter()
    .map(|(css, attr, request_type)| {
        (
            Selector::parse(css).expect("resource selector should parse"),
            attr,
            request_type,
        )
    })
    .collect()
});

static CLASS_OR_ID: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[class], [id]").expect("class/id selector should parse"));

// no rule targets this host, so its cosmetic resources are exactly the generic ones
const BASELINE_URL: &str = "https://baseline.invalid/";

/// everything built from the block lists, written once and then only read
struct CompiledRules {
    engine: Engine,
    generic_hide: GenericHide,
}

impl CompiledRules {
    /// cpu heavy with full lists, callers on the runtime go through spawn_blocking
    fn build(rules: &str) -> Result<(Self, usize), FilterInitError> {
        let rule_count = rules
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with('['))
            .count();

        if rule_count == 0 {
            return Err(FilterInitError::NoRules);
        }

        let mut filter_set = FilterSet::new(false);
        filter_set.add_filter_list(rules, ParseOptions::default());
        let engine = Engine::from_filter_set(filter_set, true);
        let generic_hide = GenericHide::collect(&engine);
        debug!(
            "{} generic hide selectors parsed ahead of time",
            generic_hide.each.len()
        );

        Ok((
            Self {
                engine,
                generic_hide,
            },
            rule_count,
        ))
    }
}

/// generic `##selector` rules apply to every page. easylist has thousands, so they're parsed once
/// here instead of on every response
struct GenericHide {
    raw: HashSet<String>,
    each: Vec<(String, Selector)>,
    // all of `each` as one selector list, the document is walked once for the lot
    combined: Option<Selector>,
}

impl GenericHide {
    fn collect(engine: &Engine) -> Self {
        let raw: HashSet<String> = engine
            .url_cosmetic_resources(BASELINE_URL)
            .hide_selectors
            .into_iter()
            .collect();

        // sorted so the combined list is the same on every start
        let sorted: BTreeSet<&String> = raw.iter().collect();
        let each: Vec<(String, Selector)> = sorted
            .into_iter()
            .filter_map(|css| Selector::parse(css).ok().map(|selector| (css.clone(), selector)))
            .collect();

        let combined = if each.is_empty() {
            None
        } else {
            let list = each
                .iter()
                .map(|(css, _)| css.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Selector::parse(&list).ok()
        };

        Self {
            raw,
            each,
            combined,
        }
    }

    /// the generic selectors that apply to a page, none under $generichide
    fn applicable(&self, generichide: bool, exceptions: &HashSet<String>) -> Vec<&Selector> {
        if generichide {
            return Vec::new();
        }

        match &self.combined {
            Some(all) if exceptions.is_disjoint(&self.raw) => vec![all],
            _ => self
                .each
                .iter()
                .filter(|(css, _)| !exceptions.contains(css))
                .map(|(_, selector)| selector)
                .collect(),
        }
    }
}

pub struct FilterEngine {
    state: AtomicU8,
    rules: OnceCell<CompiledRules>,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(FilterState::Uninitialized.as_u8()),
            rules: OnceCell::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == FilterState::Ready
    }

    /// kicks off the one and only block list fetch, requests keep flowing as passthrough while it
    /// runs
    pub fn spawn_initialization(
        self: &Arc<Self>,
        http: reqwest::Client,
        list_urls: Vec<String>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.initialize(&http, &list_urls).await })
    }

    /// fetches every list concurrently and compiles whatever came back. lists that fail are
    /// skipped, nothing is retried
    pub async fn initialize(&self, http: &reqwest::Client, list_urls: &[String]) {
        if !self.begin_loading() {
            warn!("filter engine initialization requested twice, ignoring");
            return;
        }

        info!("fetching {} block lists", list_urls.len());

        let fetches = list_urls.iter().map(|url| Self::fetch_list(http, url));
        let results = futures::future::join_all(fetches).await;

        let mut combined = String::new();
        for (url, result) in list_urls.iter().zip(results) {
            match result {
                Ok(text) => {
                    debug!("block list {} fetched ({} bytes)", url, text.len());
                    combined.push_str(&text);
                    combined.push('\n');
                }
                Err(e) => error!("failed to fetch block list {}: {}", url, e),
            }
        }

        // building the engine from full lists takes a while, keep it off the runtime threads
        let built = tokio::task::spawn_blocking(move || CompiledRules::build(&combined))
            .await
            .unwrap_or_else(|e| Err(FilterInitError::CompileFailed(e.to_string())));

        match built.and_then(|(compiled, rule_count)| self.install(compiled).map(|_| rule_count)) {
            Ok(rules) => info!("filter engine ready with {} rules", rules),
            Err(e) => {
                self.state
                    .store(FilterState::Failed.as_u8(), Ordering::Release);
                error!("filter engine failed to initialize, staying in passthrough: {}", e);
            }
        }
    }

    /// synchronous path for rule text that's already in memory
    pub fn load_rules(&self, rules: &str) -> Result<usize, FilterInitError> {
        if !self.begin_loading() {
            return Err(FilterInitError::AlreadyStarted);
        }

        CompiledRules::build(rules)
            .and_then(|(compiled, rule_count)| self.install(compiled).map(|_| rule_count))
            .inspect_err(|_| {
                self.state
                    .store(FilterState::Failed.as_u8(), Ordering::Release);
            })
    }

    fn begin_loading(&self) -> bool {
        self.state
            .compare_exchange(
                FilterState::Uninitialized.as_u8(),
                FilterState::Loading.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn install(&self, compiled: CompiledRules) -> Result<(), FilterInitError> {
        // begin_loading guarantees a single writer so the cell is always empty here
        if self.rules.set(compiled).is_err() {
            return Err(FilterInitError::AlreadyStarted);
        }
        self.state
            .store(FilterState::Ready.as_u8(), Ordering::Release);

        Ok(())
    }

    async fn fetch_list(http: &reqwest::Client, url: &str) -> Result<String, reqwest::Error> {
        http.get(url).send().await?.error_for_status()?.text().await
    }

    fn is_html(content_type: &str) -> bool {
        let content_type = content_type.to_ascii_lowercase();
        content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
    }

    fn request_type_for(content_type: &str) -> &'static str {
        let content_type = content_type.to_ascii_lowercase();

        if content_type.contains("javascript") || content_type.contains("ecmascript") {
            "script"
        } else if content_type.contains("text/css") {
            "stylesheet"
        } else if content_type.starts_with("image/") {
            "image"
        } else if content_type.starts_with("video/") || content_type.starts_with("audio/") {
            "media"
        } else if content_type.contains("json") || content_type.contains("xml") {
            "xmlhttprequest"
        } else {
            "other"
        }
    }

    fn is_blocked(engine: &Engine, url: &str, source_url: &str, request_type: &str) -> bool {
        match Request::new(url, source_url, request_type) {
            Ok(request) => engine.check_network_request(&request).matched,
            Err(_) => false,
        }
    }

    /// returns the rewritten document, or None when nothing had to go
    fn filter_html(rules: &CompiledRules, html: &str, page_url: &str) -> Option<String> {
        let engine = &rules.engine;
        let mut document = Html::parse_document(html);
        let base = url::Url::parse(page_url).ok();
        let mut doomed = Vec::new();

        for (selector, attr, request_type) in RESOURCE_SELECTORS.iter() {
            let (attr, request_type) = (*attr, *request_type);
            for element in document.select(selector) {
                let Some(raw) = element.value().attr(attr) else {
                    continue;
                };

                let resolved = match &base {
                    Some(base) => base.join(raw.trim()),
                    None => url::Url::parse(raw.trim()),
                };
                let Ok(resolved) = resolved else {
                    continue;
                };
                if !matches!(resolved.scheme(), "http" | "https") {
                    continue;
                }

                // only stylesheet links load as stylesheets, preloads and friends are "other"
                let request_type = if element.value().name() == "link"
                    && !element
                        .value()
                        .attr("rel")
                        .is_some_and(|rel| rel.to_ascii_lowercase().contains("stylesheet"))
                {
                    "other"
                } else {
                    request_type
                };

                if Self::is_blocked(engine, resolved.as_str(), page_url, request_type) {
                    debug!("dropping blocked {} {}", request_type, resolved);
                    doomed.push(element.id());
                }
            }
        }

        let cosmetic = engine.url_cosmetic_resources(page_url);
        let generic = rules
            .generic_hide
            .applicable(cosmetic.generichide, &cosmetic.exceptions);

        // whatever is left after the generic ones is specific to this site, usually a handful
        let mut selectors: BTreeSet<String> = cosmetic
            .hide_selectors
            .iter()
            .filter(|css| !rules.generic_hide.raw.contains(*css))
            .cloned()
            .collect();

        if !cosmetic.generichide {
            let mut classes = BTreeSet::new();
            let mut ids = BTreeSet::new();
            for element in document.select(&CLASS_OR_ID) {
                classes.extend(element.value().classes().map(str::to_string));
                if let Some(id) = element.value().id() {
                    ids.insert(id.to_string());
                }
            }

            selectors.extend(engine.hidden_class_id_selectors(
                classes.iter(),
                ids.iter(),
                &cosmetic.exceptions,
            ));
        }

        // procedural and extended syntax doesn't parse here, those rules are skipped
        let specific: Vec<Selector> = selectors
            .iter()
            .filter_map(|css| Selector::parse(css).ok())
            .collect();

        for selector in generic.into_iter().chain(specific.iter()) {
            for element in document.select(selector) {
                if matches!(element.value().name(), "html" | "head" | "body") {
                    continue;
                }
                doomed.push(element.id());
            }
        }

        if doomed.is_empty() {
            return None;
        }

        debug!("removing {} elements from {}", doomed.len(), page_url);
        for id in doomed {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }

        Some(document.html())
    }
}

impl FilterServiceTrait for FilterEngine {
    fn state(&self) -> FilterState {
        FilterState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn filter(&self, body: Vec<u8>, context: &FilterContext<'_>) -> Vec<u8> {
        if !self.is_ready() {
            return body;
        }
        let Some(rules) = self.rules.get() else {
            return body;
        };

        if Self::is_html(context.content_type) {
            // non utf-8 documents are passed through rather than mangled
            let Ok(html) = std::str::from_utf8(&body) else {
                return body;
            };

            return match Self::filter_html(rules, html, context.url) {
                Some(filtered) => filtered.into_bytes(),
                None => body,
            };
        }

        // a blocked script/image/etc fetched straight through the proxy is neutralized
        let request_type = Self::request_type_for(context.content_type);
        if Self::is_blocked(&rules.engine, context.url, context.url, request_type) {
            debug!("neutralizing blocked {} {}", request_type, context.url);
            return Vec::new();
        }

        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = "\
! test list
||ads.example.com^
||tracker.example.net^$script
vidsrc.test##.ad-banner
";

    const PAGE: &str = r#"<!DOCTYPE html><html><head>
<script src="https://ads.example.com/pop.js"></script>
<script src="/player.js"></script>
</head><body>
<div class="ad-banner">buy now</div>
<div id="player"><iframe src="https://ads.example.com/frame"></iframe></div>
<img src="https://cdn.vidsrc.test/poster.jpg">
</body></html>"#;

    fn html_context() -> FilterContext<'static> {
        FilterContext {
            url: "https://vidsrc.test/embed/movie?tmdb=42",
            content_type: "text/html; charset=utf-8",
        }
    }

    fn ready_engine() -> FilterEngine {
        let engine = FilterEngine::new();
        engine.load_rules(RULES).unwrap();
        engine
    }

    #[test]
    fn starts_uninitialized_and_passes_through() {
        let engine = FilterEngine::new();

        assert_eq!(engine.state(), FilterState::Uninitialized);
        let body = PAGE.as_bytes().to_vec();
        assert_eq!(engine.filter(body.clone(), &html_context()), body);
    }

    #[test]
    fn load_rules_moves_to_ready() {
        let engine = FilterEngine::new();

        assert_eq!(engine.load_rules(RULES), Ok(3));
        assert_eq!(engine.state(), FilterState::Ready);
    }

    #[test]
    fn empty_rules_fail_into_passthrough() {
        let engine = FilterEngine::new();

        assert_eq!(
            engine.load_rules("! only a comment\n\n"),
            Err(FilterInitError::NoRules)
        );
        assert_eq!(engine.state(), FilterState::Failed);

        let body = PAGE.as_bytes().to_vec();
        assert_eq!(engine.filter(body.clone(), &html_context()), body);
    }

    #[test]
    fn initialization_only_happens_once() {
        let engine = ready_engine();

        assert_eq!(engine.load_rules(RULES), Err(FilterInitError::AlreadyStarted));
        assert_eq!(engine.state(), FilterState::Ready);
    }

    #[test]
    fn strips_blocked_subresources_and_hidden_elements() {
        let engine = ready_engine();

        let filtered = engine.filter(PAGE.as_bytes().to_vec(), &html_context());
        let filtered = String::from_utf8(filtered).unwrap();

        assert!(!filtered.contains("ads.example.com"));
        assert!(!filtered.contains("buy now"));
        assert!(filtered.contains("/player.js"));
        assert!(filtered.contains("poster.jpg"));
        assert!(filtered.contains(r#"id="player""#));
    }

    #[test]
    fn clean_documents_come_back_byte_identical() {
        let engine = ready_engine();
        let clean = "<html><body><p class=\"content\">hello</p></body></html>";

        let filtered = engine.filter(clean.as_bytes().to_vec(), &html_context());

        assert_eq!(filtered, clean.as_bytes());
    }

    #[test]
    fn filtering_is_deterministic() {
        let engine = ready_engine();

        let first = engine.filter(PAGE.as_bytes().to_vec(), &html_context());
        let second = engine.filter(PAGE.as_bytes().to_vec(), &html_context());

        assert_eq!(first, second);
    }

    #[test]
    fn blocked_scripts_are_neutralized() {
        let engine = ready_engine();
        let context = FilterContext {
            url: "https://tracker.example.net/t.js",
            content_type: "application/javascript",
        };

        assert!(engine.filter(b"track()".to_vec(), &context).is_empty());
    }

    #[test]
    fn unrelated_bodies_pass_through() {
        let engine = ready_engine();
        let context = FilterContext {
            url: "https://vidsrc.test/api/source.json",
            content_type: "application/json",
        };

        assert_eq!(
            engine.filter(b"{\"ok\":true}".to_vec(), &context),
            b"{\"ok\":true}"
        );
    }

    #[test]
    fn non_utf8_html_passes_through() {
        let engine = ready_engine();
        let body = vec![0xff, 0xfe, b'<', b'h'];

        assert_eq!(engine.filter(body.clone(), &html_context()), body);
    }

    #[test]
    fn generic_hide_rules_are_parsed_once_and_respect_exceptions() {
        let engine = FilterEngine::new();
        engine
            .load_rules("##div[data-slot=\"ad\"]\nallowed.test#@#div[data-slot=\"ad\"]\n")
            .unwrap();
        assert_eq!(engine.rules.get().unwrap().generic_hide.each.len(), 1);

        let page = r#"<html><body><div data-slot="ad">ad</div><p>keep</p></body></html>"#;
        let elsewhere = FilterContext {
            url: "https://other.test/",
            content_type: "text/html",
        };
        let filtered = String::from_utf8(engine.filter(page.as_bytes().to_vec(), &elsewhere)).unwrap();
        assert!(!filtered.contains("data-slot"));
        assert!(filtered.contains("keep"));

        let excepted = FilterContext {
            url: "https://allowed.test/",
            content_type: "text/html",
        };
        assert_eq!(engine.filter(page.as_bytes().to_vec(), &excepted), page.as_bytes());
    }

    #[test]
    fn request_types_follow_content_type() {
        assert_eq!(FilterEngine::request_type_for("text/javascript"), "script");
        assert_eq!(FilterEngine::request_type_for("text/css"), "stylesheet");
        assert_eq!(FilterEngine::request_type_for("image/png"), "image");
        assert_eq!(FilterEngine::request_type_for("video/mp4"), "media");
        assert_eq!(FilterEngine::request_type_for("application/json"), "xmlhttprequest");
        assert_eq!(FilterEngine::request_type_for(""), "other");
    }
}
