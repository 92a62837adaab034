use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;

use gateway::server::services::filter_services::{
    FilterContext, FilterEngine, FilterServiceTrait, FilterState,
};

const RULES: &str = "\
! served by the fake list host
||ads.example.com^
";

const PAGE: &str = r#"<html><head><script src="https://ads.example.com/a.js"></script></head><body>ok</body></html>"#;

async fn spawn_list_host() -> SocketAddr {
    let app = Router::new().route("/easylist.txt", get(|| async { RULES }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn context() -> FilterContext<'static> {
    FilterContext {
        url: "https://vidsrc.test/embed/movie",
        content_type: "text/html",
    }
}

#[tokio::test]
async fn test_initialization_fetches_lists_and_becomes_ready() {
    let addr = spawn_list_host().await;
    let engine = Arc::new(FilterEngine::new());

    engine
        .spawn_initialization(
            reqwest::Client::new(),
            vec![format!("http://{}/easylist.txt", addr)],
        )
        .await
        .unwrap();

    assert_eq!(engine.state(), FilterState::Ready);
    let filtered = String::from_utf8(engine.filter(PAGE.as_bytes().to_vec(), &context())).unwrap();
    assert!(!filtered.contains("ads.example.com"));
    assert!(filtered.contains("ok"));
}

#[tokio::test]
async fn test_failed_lists_are_skipped() {
    let addr = spawn_list_host().await;
    let dead = dead_address().await;
    let engine = FilterEngine::new();

    engine
        .initialize(
            &reqwest::Client::new(),
            &[
                format!("http://{}/easylist.txt", dead),
                format!("http://{}/easylist.txt", addr),
            ],
        )
        .await;

    assert_eq!(engine.state(), FilterState::Ready);
}

#[tokio::test]
async fn test_no_reachable_lists_leaves_the_engine_in_passthrough() {
    let dead = dead_address().await;
    let engine = FilterEngine::new();

    engine
        .initialize(
            &reqwest::Client::new(),
            &[format!("http://{}/easylist.txt", dead)],
        )
        .await;

    assert_eq!(engine.state(), FilterState::Failed);
    assert_eq!(
        engine.filter(PAGE.as_bytes().to_vec(), &context()),
        PAGE.as_bytes()
    );
}

#[tokio::test]
async fn test_initialization_happens_once() {
    let addr = spawn_list_host().await;
    let engine = FilterEngine::new();
    engine.load_rules("||other.example.org^").unwrap();

    engine
        .initialize(
            &reqwest::Client::new(),
            &[format!("http://{}/easylist.txt", addr)],
        )
        .await;

    // the second load is ignored so the first rule set stays
    assert_eq!(engine.state(), FilterState::Ready);
    assert_eq!(
        engine.filter(PAGE.as_bytes().to_vec(), &context()),
        PAGE.as_bytes()
    );
}
