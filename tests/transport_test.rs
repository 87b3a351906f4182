use std::io::Read;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sdk_transport::transport::{RetryContext, Transport, TransportRequest};
use sdk_transport::{NetworkErrorKind, TransportError};

fn fast_transport() -> Transport {
    Transport::builder()
        .app_name("integration-tests")
        .http_timeout(Some(Duration::from_secs(10)))
        .retry_backoff(|_: &RetryContext| Duration::ZERO)
        .build()
        .expect("transport should build")
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v0.10/task_list"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v0.10/task_list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"DATA": []})))
        .mount(&server)
        .await;

    let url = format!("{}/v0.10/task_list", server.uri());
    let status = tokio::task::spawn_blocking(move || {
        let response = fast_transport()
            .request(TransportRequest::get(url))
            .expect("request should succeed");
        let body: serde_json::Value = response.json().expect("json body");
        assert_eq!(body, json!({"DATA": []}));
        response.status_code()
    })
    .await
    .expect("spawn_blocking should succeed");

    assert_eq!(status, 200);
    let received = server.received_requests().await.unwrap_or_default();
    assert_eq!(received.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_after_zero_is_honored() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/throttled"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/throttled"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let url = format!("{}/throttled", server.uri());
    let status = tokio::task::spawn_blocking(move || {
        // default backoff: the Retry-After override must replace it
        Transport::builder()
            .build()
            .expect("transport should build")
            .request(TransportRequest::get(url))
            .expect("request should succeed")
            .status_code()
    })
    .await
    .expect("spawn_blocking should succeed");

    assert_eq!(status, 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn query_params_and_json_body_reach_the_server() {
    let server = MockServer::start().await;
    let payload = json!({"DATA_TYPE": "mkdir", "path": "/~/new dir"});

    Mock::given(method("POST"))
        .and(path("/operation/mkdir"))
        .and(query_param("limit", "10"))
        .and(query_param("filter", "type:dir"))
        .and(header("content-type", "application/json"))
        .and(header("accept", "application/json"))
        .and(body_json(payload.clone()))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"code": "DirectoryCreated"})))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/operation/mkdir", server.uri());
    let status = tokio::task::spawn_blocking(move || {
        fast_transport()
            .request(
                TransportRequest::post(url)
                    .query_param("limit", 10)
                    .query_param("filter", "type:dir")
                    .query_param("marker", serde_json::Value::Null)
                    .body(payload),
            )
            .expect("request should succeed")
            .status_code()
    })
    .await
    .expect("spawn_blocking should succeed");

    assert_eq!(status, 202);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_returned_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"code": "ClientError.NotFound", "message": "no such task"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let err = tokio::task::spawn_blocking(move || {
        let response = fast_transport()
            .request(TransportRequest::get(url))
            .expect("a 404 is still a response");
        assert_eq!(response.status_code(), 404);
        response.error_for_status().expect_err("404 is an API error")
    })
    .await
    .expect("spawn_blocking should succeed");

    match err {
        TransportError::Api { status, code, message, .. } => {
            assert_eq!(status, 404);
            assert_eq!(code, "ClientError.NotFound");
            assert_eq!(message, "no such task");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_return_last_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let url = format!("{}/always-failing", server.uri());
    let status = tokio::task::spawn_blocking(move || {
        let transport = Transport::builder()
            .max_retries(2)
            .retry_backoff(|_: &RetryContext| Duration::ZERO)
            .build()
            .expect("transport should build");
        transport
            .request(TransportRequest::get(url))
            .expect("exhausting retries on a response is not an error")
            .status_code()
    })
    .await
    .expect("spawn_blocking should succeed");

    assert_eq!(status, 500);
}

#[tokio::test(flavor = "multi_thread")]
async fn redirects_can_be_disabled() {
    let server = MockServer::start().await;
    let target = format!("{}/target", server.uri());

    Mock::given(method("GET"))
        .and(path("/moved"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", target.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/target"))
        .respond_with(ResponseTemplate::new(200).set_body_string("arrived"))
        .mount(&server)
        .await;

    let url = format!("{}/moved", server.uri());
    let (followed, held) = tokio::task::spawn_blocking(move || {
        let transport = fast_transport();
        let followed = transport
            .request(TransportRequest::get(url.clone()))
            .expect("request should succeed");
        let held = transport
            .request(TransportRequest::get(url).allow_redirects(false))
            .expect("request should succeed");
        (
            (followed.status_code(), followed.text()),
            held.status_code(),
        )
    })
    .await
    .expect("spawn_blocking should succeed");

    assert_eq!(followed, (200, Some("arrived".to_string())));
    assert_eq!(held, 302);
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_body_is_read_lazily() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_string("line one\nline two\n"))
        .mount(&server)
        .await;

    let url = format!("{}/download", server.uri());
    let body = tokio::task::spawn_blocking(move || {
        let response = fast_transport()
            .request(TransportRequest::get(url).stream(true))
            .expect("request should succeed");
        assert!(response.is_streaming());
        assert!(response.body_bytes().is_none());
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .expect("body should be readable");
        body
    })
    .await
    .expect("spawn_blocking should succeed");

    assert_eq!(body, "line one\nline two\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_refused_becomes_network_error() {
    // reserve a port, then free it so nothing is listening there
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("bind ephemeral port");
    let url = format!("http://{addr}/unreachable");

    let err = tokio::task::spawn_blocking(move || {
        let transport = Transport::builder()
            .max_retries(1)
            .retry_backoff(|_: &RetryContext| Duration::ZERO)
            .build()
            .expect("transport should build");
        transport
            .request(TransportRequest::get(url))
            .expect_err("nothing is listening")
    })
    .await
    .expect("spawn_blocking should succeed");

    assert!(matches!(err, TransportError::Network { .. }));
    assert_eq!(err.network_kind(), Some(NetworkErrorKind::Connection));
}
