//! End-to-end fetch scenarios against a local mock server: plain bodies,
//! HTTP errors, timeout retries, file sinks and the prefix pipeline.

mod common;

use std::sync::Arc;
use std::time::Duration;

use armature_core::{FetchOptions, HttpMethod, NetError, NetState, ProgressHandle};
use armature_fetch::PrefixHandler;
use common::{engine_with, quiet_engine, CaptureDebugger, EventTrace};
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn no_retry_options() -> FetchOptions {
    FetchOptions::default().timeout_secs(10).retry_timeouts(0)
}

#[tokio::test]
async fn plain_get_buffers_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello from the mock"))
        .mount(&server)
        .await;

    let engine = quiet_engine();
    let trace = EventTrace::default();
    let report = engine
        .fetch(
            HttpMethod::Get,
            &server.uri(),
            false,
            false,
            None,
            Some(trace.progressor()),
            None,
            None,
            None,
            Some(no_retry_options()),
        )
        .await
        .unwrap();

    assert_eq!(report.event.event_state, NetState::Finished);
    assert!(report.event.event_success);
    assert_eq!(report.event.meta_retry_attempt, 1);
    assert!(report.event.size >= 0);
    assert_eq!(report.content().as_deref(), Some("hello from the mock"));
    assert_eq!(trace.terminal_count(), 1);
}

#[tokio::test]
async fn http_404_finishes_without_failing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/does-not-exist"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;

    let engine = quiet_engine();
    let trace = EventTrace::default();
    let err = engine
        .fetch(
            HttpMethod::Get,
            &format!("{}/does-not-exist", server.uri()),
            false,
            false,
            None,
            Some(trace.progressor()),
            None,
            None,
            None,
            Some(no_retry_options()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, NetError::HttpStatus(404)));
    let last = trace.last();
    assert_eq!(last.state, NetState::Finished);
    assert_eq!(last.status, 404);
    assert!(!last.success);
    assert_eq!(trace.terminal_count(), 1);
}

#[tokio::test]
async fn timeouts_consume_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(20)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let engine = quiet_engine();
    let trace = EventTrace::default();
    let err = engine
        .fetch(
            HttpMethod::Get,
            &server.uri(),
            false,
            false,
            None,
            Some(trace.progressor()),
            None,
            None,
            None,
            Some(FetchOptions::default().timeout_secs(1).retry_timeouts(2)),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    let attempts: Vec<u32> = trace.observed().iter().map(|o| o.attempt).collect();
    assert_eq!(attempts.iter().max(), Some(&3));
    // Attempts strictly increase across retry notifications.
    let retries: Vec<u32> = trace
        .observed()
        .iter()
        .filter(|o| o.state == NetState::Retry)
        .map(|o| o.attempt)
        .collect();
    assert_eq!(retries, vec![2, 3]);
}

#[tokio::test]
async fn non_timeout_errors_do_not_retry() {
    // Nothing listens here; connections are refused outright.
    let engine = quiet_engine();
    let err = engine
        .fetch(
            HttpMethod::Get,
            "http://127.0.0.1:1/",
            false,
            false,
            None,
            None,
            None,
            None,
            None,
            Some(FetchOptions::default().timeout_secs(10).retry_timeouts(2)),
        )
        .await
        .unwrap_err();

    assert!(!err.is_timeout());
    // A retry would have allocated a second event id.
    assert_eq!(engine.state().indexes.current("netevent"), Some(1));
}

#[tokio::test]
async fn zero_timeout_disables_retries() {
    let engine = quiet_engine();
    let _ = engine
        .fetch(
            HttpMethod::Get,
            "http://127.0.0.1:1/",
            false,
            false,
            None,
            None,
            None,
            None,
            None,
            Some(FetchOptions::default().timeout_secs(0).retry_timeouts(5)),
        )
        .await
        .unwrap_err();

    assert_eq!(engine.state().indexes.current("netevent"), Some(1));
}

#[tokio::test]
async fn stream_to_file_writes_every_byte_once() {
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let expected_sha = hex::encode(Sha256::digest(&payload));

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let capture = Arc::new(CaptureDebugger::default());
    let engine = engine_with(capture.clone());
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("blob.bin");

    let trace = EventTrace::default();
    let report = engine
        .fetch(
            HttpMethod::Get,
            &format!("{}/blob", server.uri()),
            true,
            true,
            Some(out.clone()),
            Some(trace.progressor()),
            None,
            None,
            None,
            Some(no_retry_options()),
        )
        .await
        .unwrap();

    let written = std::fs::read(&out).unwrap();
    assert_eq!(written.len(), payload.len());
    assert_eq!(hex::encode(Sha256::digest(&written)), expected_sha);
    assert_eq!(report.event.transferred, payload.len() as i64);
    assert_eq!(report.event.event_state, NetState::Finished);

    // Close emitted the terminal datagram exactly once.
    assert_eq!(capture.count_signal("net:stop.update"), 1);
    assert_eq!(trace.terminal_count(), 1);
}

#[tokio::test]
async fn double_close_emits_one_stop_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("short"))
        .mount(&server)
        .await;

    let capture = Arc::new(CaptureDebugger::default());
    let engine = engine_with(capture.clone());
    let trace = EventTrace::default();

    let mut report = engine
        .fetch(
            HttpMethod::Get,
            &server.uri(),
            true,
            false,
            None,
            Some(trace.progressor()),
            None,
            None,
            None,
            Some(no_retry_options()),
        )
        .await
        .unwrap();

    use armature_core::ProgressHandle;
    report.close().await.unwrap();
    report.close().await.unwrap();

    assert_eq!(capture.count_signal("net:stop.update"), 1);
    assert_eq!(trace.terminal_count(), 1);
}

#[tokio::test]
async fn transferred_never_exceeds_size() {
    let payload = vec![7u8; 64 * 1024];
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload))
        .mount(&server)
        .await;

    let engine = quiet_engine();
    let trace = EventTrace::default();
    let _ = engine
        .fetch(
            HttpMethod::Get,
            &server.uri(),
            false,
            false,
            None,
            Some(trace.progressor()),
            None,
            None,
            None,
            Some(no_retry_options().buffer_size(4096)),
        )
        .await
        .unwrap();

    for o in trace.observed() {
        if o.size > 0 {
            assert!(o.transferred <= o.size, "{} > {}", o.transferred, o.size);
        }
    }
}

#[tokio::test]
async fn prefix_parser_returning_empty_preserves_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>full original body</html>"),
        )
        .mount(&server)
        .await;

    let engine = quiet_engine();
    engine.register_prefix_handler(PrefixHandler {
        name: "noop".into(),
        prefix_len: 10,
        content_type_contains: "text/html".into(),
        needs_content: false,
        filter_for_urls: Vec::new(),
        validator: Arc::new(|_, _| true),
        parser: Arc::new(|_, _| Ok(String::new())),
    });

    let report = engine
        .fetch(
            HttpMethod::Get,
            &server.uri(),
            false,
            false,
            None,
            None,
            None,
            None,
            None,
            Some(no_retry_options().enable_prefix_handler("noop")),
        )
        .await
        .unwrap();

    // The peeked bytes were logically un-consumed.
    assert_eq!(
        report.content().as_deref(),
        Some("<html>full original body</html>")
    );
    assert!(!report.event.interrupted);
}

#[tokio::test]
async fn prefix_rewrite_restarts_against_the_new_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>interstitial</html>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/real"))
        .respond_with(ResponseTemplate::new(200).set_body_string("the actual payload"))
        .mount(&server)
        .await;

    let engine = quiet_engine();
    let target = format!("{}/real", server.uri());
    {
        let target = target.clone();
        engine.register_prefix_handler(PrefixHandler {
            name: "interstitial".into(),
            prefix_len: 6,
            content_type_contains: "text/html".into(),
            needs_content: true,
            filter_for_urls: vec!["/landing".into()],
            validator: Arc::new(|peek, _| peek.starts_with(b"<html>")),
            parser: Arc::new(move |_, _| Ok(target.clone())),
        });
    }

    let trace = EventTrace::default();
    let report = engine
        .fetch(
            HttpMethod::Get,
            &format!("{}/landing", server.uri()),
            false,
            false,
            None,
            Some(trace.progressor()),
            None,
            None,
            None,
            Some(no_retry_options().enable_prefix_handler("interstitial")),
        )
        .await
        .unwrap();

    assert_eq!(report.content().as_deref(), Some("the actual payload"));
    assert!(!report.event.interrupted);
    // The interrupted notification fired on the first request's event.
    assert!(trace.observed().iter().any(|o| o.state == NetState::Transfer));
}

#[tokio::test]
async fn cancellation_fails_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&server)
        .await;

    let token = tokio_util::sync::CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let engine = quiet_engine();
    let err = engine
        .fetch(
            HttpMethod::Get,
            &server.uri(),
            false,
            false,
            None,
            None,
            None,
            None,
            None,
            Some(FetchOptions::default().timeout_secs(30).retry_timeouts(0).cancel(token)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, NetError::Cancelled));
}

#[tokio::test]
async fn throttling_coalesces_transfer_updates_only() {
    let payload = vec![1u8; 512 * 1024];
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload))
        .mount(&server)
        .await;

    let engine = quiet_engine();
    let trace = EventTrace::default();
    let _ = engine
        .fetch(
            HttpMethod::Get,
            &server.uri(),
            false,
            false,
            None,
            Some(trace.progressor()),
            None,
            None,
            None,
            Some(
                no_retry_options()
                    .buffer_size(1024)
                    .progressor_interval_ms(10_000),
            ),
        )
        .await
        .unwrap();

    let observed = trace.observed();
    // With a huge interval at most one Transfer notification slips
    // through, but the state changes all arrive.
    let transfers = observed.iter().filter(|o| o.state == NetState::Transfer).count();
    assert!(transfers <= 1, "saw {transfers} transfer notifications");
    assert!(observed.iter().any(|o| o.state == NetState::Established));
    assert!(observed.iter().any(|o| o.state == NetState::Responded));
    assert!(observed.iter().any(|o| o.state == NetState::Finished));
}
