//! Integration tests for the reqwest transport and the search gateway
//!
//! These tests run against a local httpmock server, never the real API.
//! Run with: `cargo test -p search_providers --test integration_tests`

use config::ResolvedConfig;
use httpmock::prelude::*;
use search_providers::{
    mock::completion_body, NoopProgress, RecordingProgress, SearchError, SearchGateway,
    SearchOutcome, SearchRequest,
};
use std::sync::Arc;
use std::time::Duration;

fn gateway_for(server: &MockServer, configure: impl FnOnce(&mut ResolvedConfig)) -> SearchGateway {
    let mut config = ResolvedConfig::default();
    config.perplexity.api_key = "pplx-integration".to_string();
    config.perplexity.api_url = server.url("/chat/completions");
    config.perplexity.max_retries = 0;
    config.perplexity.retry_delay = 0.0;
    configure(&mut config);
    SearchGateway::new(Arc::new(config))
}

#[tokio::test]
async fn test_search_success_sends_bearer_and_payload() {
    let server = MockServer::start_async().await;
    let completion = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("Authorization", "Bearer pplx-integration")
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "model": "sonar",
                    "messages": [
                        {"role": "system", "content": "Be precise and concise."},
                        {"role": "user", "content": "rust ownership"}
                    ]
                }));
            then.status(200)
                .header("Content-Type", "application/json")
                .body(completion_body(&["Ownership moves values."], &["https://doc.rust-lang.org"]));
        })
        .await;

    let gateway = gateway_for(&server, |_| {});
    let outcome = gateway
        .search(SearchRequest::new("rust ownership"), &NoopProgress)
        .await
        .expect("search should succeed");

    completion.assert_async().await;
    assert_eq!(
        outcome,
        SearchOutcome::Success {
            text: "Ownership moves values.\n\nCitations:\n[1] https://doc.rust-lang.org\n"
                .to_string(),
            citations: vec!["https://doc.rust-lang.org".to_string()],
        }
    );
}

#[tokio::test]
async fn test_search_forwards_model_override_with_prefix() {
    let server = MockServer::start_async().await;
    let completion = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .json_body_partial(r#"{"model": "team-sonar-pro"}"#);
            then.status(200).body(completion_body(&["ok"], &[]));
        })
        .await;

    let gateway = gateway_for(&server, |c| c.perplexity.model_prefix = "team-".to_string());
    let outcome = gateway
        .search(
            SearchRequest::new("anything").with_model("sonar-pro"),
            &NoopProgress,
        )
        .await
        .expect("search should succeed");

    completion.assert_async().await;
    assert_eq!(outcome.into_text(), "ok");
}

#[tokio::test]
async fn test_search_unauthorized_returns_upstream_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401).body(r#"{"error":"invalid api key"}"#);
        })
        .await;

    let gateway = gateway_for(&server, |_| {});
    let progress = RecordingProgress::new();
    let err = gateway
        .search(SearchRequest::new("rust"), &progress)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SearchError::UpstreamStatus {
            status: 401,
            body: r#"{"error":"invalid api key"}"#.to_string(),
        }
    );
    assert!(err.to_string().starts_with("Perplexity API request failed: 401"));
}

#[tokio::test]
async fn test_search_non_json_body_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body("<html>oops</html>");
        })
        .await;

    let gateway = gateway_for(&server, |_| {});
    let err = gateway
        .search(SearchRequest::new("rust"), &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_search_timeout_is_classified() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .delay(Duration::from_secs(3))
                .body(completion_body(&["too late"], &[]));
        })
        .await;

    let gateway = gateway_for(&server, |c| c.perplexity.timeout = 0.3);
    let err = gateway
        .search(SearchRequest::new("rust"), &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::Timeout { .. }));
}

#[tokio::test]
async fn test_search_timeout_retries_before_giving_up() {
    let server = MockServer::start_async().await;
    let slow = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .delay(Duration::from_secs(3))
                .body(completion_body(&["too late"], &[]));
        })
        .await;

    let gateway = gateway_for(&server, |c| {
        c.perplexity.timeout = 0.2;
        c.perplexity.max_retries = 2;
        c.perplexity.retry_delay = 0.05;
    });
    let err = gateway
        .search(SearchRequest::new("rust"), &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::Timeout { .. }));
    slow.assert_hits_async(3).await;
}

#[tokio::test]
async fn test_search_through_unreachable_proxy_is_proxy_failure() {
    let server = MockServer::start_async().await;
    let completion = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body(completion_body(&["direct"], &[]));
        })
        .await;

    let gateway = gateway_for(&server, |c| {
        c.proxy.http_proxy = "http://127.0.0.1:1".to_string();
        c.perplexity.timeout = 5.0;
    });
    let progress = RecordingProgress::new();
    let err = gateway
        .search(SearchRequest::new("rust"), &progress)
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::ProxyFailure(_)), "got {err:?}");
    completion.assert_hits_async(0).await;
    let (_, hint) = progress.last().unwrap();
    assert!(hint.contains("proxy"));
}

#[tokio::test]
async fn test_search_invalid_proxy_goes_direct() {
    let server = MockServer::start_async().await;
    let completion = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body(completion_body(&["direct"], &[]));
        })
        .await;

    let gateway = gateway_for(&server, |c| c.proxy.http_proxy = "not a proxy".to_string());
    let outcome = gateway
        .search(SearchRequest::new("rust"), &NoopProgress)
        .await
        .expect("invalid proxy should fall back to a direct connection");

    completion.assert_async().await;
    assert_eq!(outcome.into_text(), "direct");
}

#[tokio::test]
async fn test_search_no_proxy_list_bypasses_proxy() {
    let server = MockServer::start_async().await;
    let completion = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body(completion_body(&["bypassed"], &[]));
        })
        .await;

    let gateway = gateway_for(&server, |c| {
        c.proxy.http_proxy = "http://127.0.0.1:1".to_string();
        c.proxy.no_proxy = "127.0.0.1,localhost".to_string();
    });
    let outcome = gateway
        .search(SearchRequest::new("rust"), &NoopProgress)
        .await
        .expect("no_proxy host should connect directly");

    completion.assert_async().await;
    assert_eq!(outcome.into_text(), "bypassed");
}

#[tokio::test]
async fn test_search_direct_failure_for_no_proxy_host_is_not_proxy_failure() {
    let server = MockServer::start_async().await;

    // Port 9 is closed; the host is on the bypass list so the proxy is never used
    let gateway = gateway_for(&server, |c| {
        c.perplexity.api_url = "http://127.0.0.1:9/chat/completions".to_string();
        c.perplexity.timeout = 5.0;
        c.proxy.http_proxy = "http://127.0.0.1:1".to_string();
        c.proxy.no_proxy = "127.0.0.1".to_string();
    });
    let progress = RecordingProgress::new();
    let err = gateway
        .search(SearchRequest::new("rust"), &progress)
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::Unexpected(_)), "got {err:?}");
    assert!(!progress
        .events()
        .iter()
        .any(|(_, msg)| msg.contains("disabling the proxy")));
}

#[tokio::test]
async fn test_dropping_search_abandons_in_flight_request() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .delay(Duration::from_secs(10))
                .body(completion_body(&["too late"], &[]));
        })
        .await;

    let gateway = gateway_for(&server, |c| c.perplexity.timeout = 30.0);
    let started = std::time::Instant::now();
    let result = tokio::time::timeout(
        Duration::from_millis(300),
        gateway.search(SearchRequest::new("rust"), &NoopProgress),
    )
    .await;

    assert!(result.is_err(), "search should still be waiting on upstream");
    assert!(started.elapsed() < Duration::from_secs(3));
}
