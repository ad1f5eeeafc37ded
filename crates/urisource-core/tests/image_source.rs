//! Integration tests for ImageSource over the reqwest transport.
//!
//! Uses wiremock for HTTP mocking. Tests cover dedup of concurrent callers,
//! retry on 504, exhaustion, non-retryable statuses, cache reuse and headers.

use std::sync::Arc;
use std::time::Duration;

use urisource_core::{
    FetchConfig, FetchCoordinator, FetchError, FetchErrorKind, ImageRequest, ImageSource,
    ReqwestTransport, ResourceKey, ResultCache, TransportPolicy, DEFAULT_USER_AGENT,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-data";

fn test_config() -> FetchConfig {
    FetchConfig::default()
        .with_retry_schedule(&[Duration::from_millis(10), Duration::from_millis(20)])
        .with_request_timeout(Duration::from_secs(5))
}

fn create_source(config: &FetchConfig) -> ImageSource {
    ImageSource::from_config(config).expect("failed to create source")
}

fn png_response() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_bytes(PNG)
        .insert_header("content-type", "image/png")
}

#[tokio::test]
async fn test_fetch_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/img.png"))
        .respond_with(png_response())
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/img.png", mock_server.uri());

    let image = source
        .fetch(Some(&uri))
        .await
        .expect("fetch failed")
        .expect("expected Some");

    assert_eq!(image.bytes().as_ref(), PNG);
    assert_eq!(image.content_type(), Some("image/png"));
}

#[tokio::test]
async fn test_concurrent_fetch_join() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/img.jpg"))
        .respond_with(png_response().set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/img.jpg", mock_server.uri());

    let (a, b) = tokio::join!(source.fetch(Some(&uri)), source.fetch(Some(&uri)));
    let a = a.expect("first caller failed").expect("expected Some");
    let b = b.expect("second caller failed").expect("expected Some");

    assert!(!a.is_empty());
    assert_eq!(a.len(), b.len());

    let stats = source.coordinator().stats();
    assert_eq!(stats.started_fetches, 1);
    assert_eq!(stats.joined_requests, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_spawned_callers_share_one_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/shared.png"))
        .respond_with(png_response().set_delay(Duration::from_millis(500)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/shared.png", mock_server.uri());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let source = source.clone();
            let uri = uri.clone();
            tokio::spawn(async move { source.fetch(Some(&uri)).await })
        })
        .collect();

    for handle in handles {
        let image = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(image.bytes().as_ref(), PNG);
    }
}

#[tokio::test]
async fn test_retry_then_succeed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky.png"))
        .respond_with(ResponseTemplate::new(504))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky.png"))
        .respond_with(png_response())
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/flaky.png", mock_server.uri());

    let image = source
        .fetch(Some(&uri))
        .await
        .expect("retry should recover")
        .expect("expected Some");
    assert_eq!(image.bytes().as_ref(), PNG);
}

#[tokio::test]
async fn test_exhausted_retries_not_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down.png"))
        .respond_with(ResponseTemplate::new(504))
        .expect(3)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/down.png", mock_server.uri());

    let err = source.fetch(Some(&uri)).await.unwrap_err();

    assert_eq!(err.kind(), FetchErrorKind::TransientNetworkFailure);
    match err {
        FetchError::TransientNetwork { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected TransientNetwork, got {other:?}"),
    }
    assert!(!source.cache().contains(ResourceKey::from_uri(&uri)));
    assert!(!source.coordinator().is_in_flight(ResourceKey::from_uri(&uri)));
}

#[tokio::test]
async fn test_failed_fetch_retried_on_next_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/later.png"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/later.png"))
        .respond_with(png_response())
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/later.png", mock_server.uri());

    let err = source.fetch(Some(&uri)).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::NonRetryableResponse {
            uri: uri.clone(),
            status: 404
        }
    );

    let image = source.fetch(Some(&uri)).await.unwrap();
    assert!(image.is_some());
}

#[tokio::test]
async fn test_server_error_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/broken.png"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/broken.png", mock_server.uri());

    let err = source.fetch(Some(&uri)).await.unwrap_err();
    assert_eq!(err.kind(), FetchErrorKind::NonRetryableResponse);
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_cache_reuse() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cached.png"))
        .respond_with(png_response())
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/cached.png", mock_server.uri());

    let first = source.fetch(Some(&uri)).await.unwrap().unwrap();
    let second = source.fetch(Some(&uri)).await.unwrap().unwrap();

    assert_eq!(first, second);
    let entry = source
        .cache()
        .get_entry(ResourceKey::from_uri(&uri))
        .expect("expected cache entry");
    assert_eq!(entry.payload, first);
}

#[tokio::test]
async fn test_query_string_is_part_of_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/thumb.png"))
        .respond_with(png_response())
        .expect(2)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let small = format!("{}/thumb.png?size=small", mock_server.uri());
    let large = format!("{}/thumb.png?size=large", mock_server.uri());

    source.fetch(Some(&small)).await.unwrap();
    source.fetch(Some(&large)).await.unwrap();
    source.fetch(Some(&small)).await.unwrap();
}

#[tokio::test]
async fn test_caching_disabled_by_config() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/fresh.png"))
        .respond_with(png_response())
        .expect(2)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config().with_caching(false));
    assert!(!source.caching_enabled());
    let uri = format!("{}/fresh.png", mock_server.uri());

    source.fetch(Some(&uri)).await.unwrap();
    source.fetch(Some(&uri)).await.unwrap();
}

#[tokio::test]
async fn test_oversized_payload_returned_but_not_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/huge.png"))
        .respond_with(png_response())
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = FetchConfig {
        cache_max_entry_bytes: 4,
        ..test_config()
    };
    let source = create_source(&config);
    let uri = format!("{}/huge.png", mock_server.uri());

    let image = source.fetch(Some(&uri)).await.unwrap().unwrap();
    assert_eq!(image.bytes().as_ref(), PNG);
    source.fetch(Some(&uri)).await.unwrap();
}

#[tokio::test]
async fn test_default_user_agent_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ua.png"))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .respond_with(png_response())
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/ua.png", mock_server.uri());

    source.fetch(Some(&uri)).await.expect("fetch failed");
}

#[tokio::test]
async fn test_per_call_headers_override_defaults() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/custom.png"))
        .and(header("user-agent", "urisource-tests/1.0"))
        .and(header("x-api-key", "abc"))
        .respond_with(png_response())
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/custom.png", mock_server.uri());

    let request = ImageRequest::new(&uri)
        .header("User-Agent", "urisource-tests/1.0")
        .header("X-Api-Key", "abc");
    source.fetch_with(request).await.expect("fetch failed");
}

#[tokio::test]
async fn test_injected_collaborators() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/di.png"))
        .respond_with(png_response())
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config();
    let transport = ReqwestTransport::new(&config).expect("failed to create transport");
    let coordinator = FetchCoordinator::new();
    let cache = ResultCache::new(1024);
    let source = ImageSource::new(
        TransportPolicy::new(Arc::new(transport), &config),
        coordinator.clone(),
        cache.clone(),
    );
    let uri = format!("{}/di.png", mock_server.uri());

    source.fetch(Some(&uri)).await.unwrap();

    assert_eq!(coordinator.stats().started_fetches, 1);
    assert_eq!(cache.get(ResourceKey::from_uri(&uri)).unwrap().bytes().as_ref(), PNG);
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // Bind and drop a listener so the port is very likely closed.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let source = create_source(&test_config());
    let uri = format!("http://{}/img.png", addr);

    let err = source.fetch(Some(&uri)).await.unwrap_err();
    assert_eq!(err.kind(), FetchErrorKind::TransientNetworkFailure);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_malformed_header_fails_without_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/bad-header.png"))
        .respond_with(png_response())
        .expect(0)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/bad-header.png", mock_server.uri());

    let err = source
        .fetch_with(ImageRequest::new(&uri).header("Bad Header", "v"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FetchErrorKind::InvalidInput);
    assert!(!err.is_retryable());
    assert!(!source.coordinator().is_in_flight(ResourceKey::from_uri(&uri)));
}

#[tokio::test]
async fn test_redirect_loop_returns_final_response() {
    let mock_server = MockServer::start().await;
    let uri = format!("{}/loop.png", mock_server.uri());

    Mock::given(method("GET"))
        .and(path("/loop.png"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", uri.as_str()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());

    let err = source.fetch(Some(&uri)).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::NonRetryableResponse {
            uri: uri.clone(),
            status: 302
        }
    );
}

#[tokio::test]
async fn test_redirect_limit_returns_final_response() {
    let mock_server = MockServer::start().await;

    for (from, to) in [("/a.png", "/b.png"), ("/b.png", "/c.png"), ("/c.png", "/d.png")] {
        Mock::given(method("GET"))
            .and(path(from))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}{}", mock_server.uri(), to).as_str()),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/d.png"))
        .respond_with(png_response())
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = FetchConfig {
        max_redirects: 2,
        ..test_config()
    };
    let source = create_source(&config);
    let uri = format!("{}/a.png", mock_server.uri());

    let err = source.fetch(Some(&uri)).await.unwrap_err();
    assert_eq!(err.kind(), FetchErrorKind::NonRetryableResponse);
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_redirect_within_limit_followed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/old.png"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("location", format!("{}/new.png", mock_server.uri()).as_str()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/new.png"))
        .respond_with(png_response())
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&test_config());
    let uri = format!("{}/old.png", mock_server.uri());

    let image = source.fetch(Some(&uri)).await.unwrap().unwrap();
    assert_eq!(image.bytes().as_ref(), PNG);
}
