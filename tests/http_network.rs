use std::sync::Arc;
use std::time::Duration;

use offline_cache::application::commands::local_runtime;
use offline_cache::cache::{BufferedTraceSink, CacheEngine, CacheNames, EngineConfig};
use offline_cache::domain::{Request, ResultSource};
use offline_cache::infra::network::HttpNetwork;
use offline_cache::runtime::{FetchError, Network};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn get(server: &MockServer, route: &str) -> Request {
    let url = Url::parse(&server.uri())
        .and_then(|base| base.join(route))
        .expect("mock server url");
    Request::get(url)
}

#[tokio::test]
async fn fetch_maps_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .and(header("authorization", "Bearer t0k"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .insert_header("cache-control", "private")
                .set_body_string(r#"{"id":7}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let network = HttpNetwork::new(Some(Duration::from_secs(5))).unwrap();
    let request = get(&server, "/api/profile").with_header("authorization", "Bearer t0k");
    let response = network.fetch(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some("application/json"));
    assert!(response.is_private());
    assert_eq!(response.body, r#"{"id":7}"#);
}

#[tokio::test]
async fn slow_server_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let network = HttpNetwork::new(Some(Duration::from_millis(100))).unwrap();
    let err = network.fetch(&get(&server, "/slow")).await.unwrap_err();
    assert!(
        matches!(err, FetchError::Timeout { timeout_ms: 100 }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn unreachable_host_is_transport_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let request = Request::get(Url::parse(&format!("http://127.0.0.1:{port}/gone")).unwrap());

    let network = HttpNetwork::new(Some(Duration::from_secs(1))).unwrap();
    let err = network.fetch(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn engine_caches_static_asset_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app.js"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/javascript")
                .set_body_string("console.log('ready')"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let origin = Url::parse(&server.uri()).unwrap();
    let config = EngineConfig::new(CacheNames::new("shop", "1").unwrap(), "test", origin);
    let network = HttpNetwork::new(Some(Duration::from_secs(5))).unwrap();
    let sink = Arc::new(BufferedTraceSink::new());
    let engine = CacheEngine::builder(config, local_runtime(Arc::new(network)))
        .trace_sink(sink.clone())
        .build();

    let request = get(&server, "/app.js");
    let first = engine.intercept(&request).await.unwrap();
    let second = engine.intercept(&request).await.unwrap();

    assert_eq!(first.source, ResultSource::Network);
    assert_eq!(second.source, ResultSource::Cache);
    assert_eq!(second.response.body, "console.log('ready')");
    assert_eq!(sink.len(), 2);
}
