use aoai_core::config::model::Endpoint;
use aoai_core::credential::{AccessToken, CredentialError, CredentialProvider, StaticCredential};
use aoai_core::ClientFactory;
use aoai_loadbalance::EndpointPool;
use aoai_relay::relay::handler::types::{TIMEOUT_MESSAGE, UNEXPECTED_MESSAGE};
use aoai_relay::{InboundRequest, LoadBalancedHandler};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_VERSION: &str = "2024-05-01-preview";

// gzip("hello world")，存储块，无压缩
const GZIP_HELLO_WORLD: &[u8] = &[
    0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x01, 0x0b, 0x00, 0xf4, 0xff, 0x68,
    0x65, 0x6c, 0x6c, 0x6f, 0x20, 0x77, 0x6f, 0x72, 0x6c, 0x64, 0x85, 0x11, 0x4a, 0x0d, 0x0b, 0x00,
    0x00, 0x00,
];

fn create_handler(endpoints: Vec<Endpoint>, credential: Arc<dyn CredentialProvider>) -> Arc<LoadBalancedHandler> {
    create_handler_with_timeout(endpoints, credential, Duration::from_secs(5))
}

fn create_handler_with_timeout(
    endpoints: Vec<Endpoint>,
    credential: Arc<dyn CredentialProvider>,
    read_timeout: Duration,
) -> Arc<LoadBalancedHandler> {
    let pool = EndpointPool::new(endpoints).unwrap();
    let client = ClientFactory::with_timeouts(Duration::from_secs(2), read_timeout).unwrap();
    Arc::new(LoadBalancedHandler::new(pool, credential, client))
}

fn relay_credential() -> Arc<dyn CredentialProvider> {
    Arc::new(StaticCredential::new("relay-token"))
}

fn inbound(method: Method, path: &str, query: &[(&str, &str)], body: &'static [u8]) -> InboundRequest {
    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("client-facing.example.com"));
    headers.insert("authorization", HeaderValue::from_static("Bearer client-supplied"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
    headers.insert("x-ms-client-request-id", HeaderValue::from_static("req-1"));

    InboundRequest::new(
        method,
        path,
        headers,
        query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        Bytes::from_static(body),
    )
}

async fn read_body(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

async fn read_json(response: Response) -> Value {
    serde_json::from_slice(&read_body(response).await).unwrap()
}

/// 启动一个本地axum上游，返回base URL
async fn spawn_upstream(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_request_rewriting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .and(query_param("api-version", API_VERSION))
        .and(query_param("foo", "bar"))
        .and(header("authorization", "Bearer relay-token"))
        .and(header("x-ms-client-request-id", "req-1"))
        .and(body_bytes(b"{\"messages\":[]}".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let handler = create_handler(
        vec![Endpoint::new(server.uri(), "gpt-4o", API_VERSION)],
        relay_credential(),
    );
    let request = inbound(
        Method::POST,
        "/chat/completions",
        &[("api-version", "1999-01-01"), ("foo", "bar")],
        b"{\"messages\":[]}",
    );

    let response = handler.handle_request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, Bytes::from_static(b"ok"));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let upstream = &received[0];

    // 客户端的 host 和认证信息不会被转发
    let host = upstream.headers.get("host").unwrap().to_str().unwrap();
    assert_ne!(host, "client-facing.example.com");
    assert_eq!(upstream.headers.get_all("authorization").iter().count(), 1);
    assert_ne!(upstream.headers.get("connection").map(|v| v.as_bytes()), Some(&b"keep-alive"[..]));

    let api_versions: Vec<_> = upstream
        .url
        .query_pairs()
        .filter(|(k, _)| k == "api-version")
        .map(|(_, v)| v.into_owned())
        .collect();
    assert_eq!(api_versions, vec![API_VERSION.to_string()]);
}

#[tokio::test]
async fn test_root_path_and_methods() {
    let server = MockServer::start().await;
    Mock::given(path("/openai/deployments/gpt-4o/"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let handler = create_handler(
        vec![Endpoint::new(server.uri(), "gpt-4o", API_VERSION)],
        relay_credential(),
    );

    for m in [Method::GET, Method::DELETE] {
        let response = handler.clone().handle_request(inbound(m, "/", &[], b"")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn test_upstream_status_and_headers_pass_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(serde_json::json!({"error": {"code": "429"}})),
        )
        .mount(&server)
        .await;

    let handler = create_handler(
        vec![Endpoint::new(server.uri(), "gpt-4o", API_VERSION)],
        relay_credential(),
    );

    for query in [&[][..], &[("stream", "true")][..]] {
        let response = handler
            .clone()
            .handle_request(inbound(Method::POST, "/chat/completions", query, b"{}"))
            .await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "7");
        assert_eq!(read_json(response).await["error"]["code"], "429");
    }
}

#[tokio::test]
async fn test_gzip_upstream_is_decoded_and_header_removed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .insert_header("content-type", "text/plain")
                .set_body_bytes(GZIP_HELLO_WORLD),
        )
        .mount(&server)
        .await;

    let handler = create_handler(
        vec![Endpoint::new(server.uri(), "gpt-4o", API_VERSION)],
        relay_credential(),
    );

    for query in [&[][..], &[("stream", "true")][..]] {
        let response = handler
            .clone()
            .handle_request(inbound(Method::POST, "/chat/completions", query, b"{}"))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("content-encoding").is_none());
        assert!(response.headers().get("content-length").is_none());
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(read_body(response).await, Bytes::from_static(b"hello world"));
    }
}

#[tokio::test]
async fn test_upstream_timeout_returns_504() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let handler = create_handler_with_timeout(
        vec![Endpoint::new(server.uri(), "gpt-4o", API_VERSION)],
        relay_credential(),
        Duration::from_millis(300),
    );

    for query in [&[][..], &[("stream", "true")][..]] {
        let response = handler
            .clone()
            .handle_request(inbound(Method::POST, "/chat/completions", query, b"{}"))
            .await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = read_json(response).await;
        assert_eq!(body["error"], TIMEOUT_MESSAGE);
        assert!(body.get("details").is_none());
    }
}

#[tokio::test]
async fn test_transport_error_returns_500_with_details() {
    let handler = create_handler(
        vec![Endpoint::new("http://127.0.0.1:1", "gpt-4o", API_VERSION)],
        relay_credential(),
    );

    let response = handler
        .handle_request(inbound(Method::POST, "/chat/completions", &[], b"{}"))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json(response).await;
    assert_eq!(body["error"], UNEXPECTED_MESSAGE);
    assert!(!body["details"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_dot_segment_path_rejected_before_forwarding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicU32::new(0));
    let handler = create_handler(
        vec![Endpoint::new(server.uri(), "gpt-4o", API_VERSION)],
        Arc::new(CountingCredential { calls: calls.clone() }),
    );

    for path in ["/../../x", "/chat/%2e%2E/%2e%2e/x"] {
        let response = handler
            .clone()
            .handle_request(inbound(Method::POST, path, &[], b"{}"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(response).await["error"].as_str().unwrap().contains(".."));
    }
    // 不会为被拒绝的请求获取令牌
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

struct BrokenCredential;

#[async_trait]
impl CredentialProvider for BrokenCredential {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        Err(CredentialError::NotConfigured("no identity".to_string()))
    }
}

#[tokio::test]
async fn test_credential_failure_returns_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let handler = create_handler(
        vec![Endpoint::new(server.uri(), "gpt-4o", API_VERSION)],
        Arc::new(BrokenCredential),
    );

    let response = handler
        .handle_request(inbound(Method::POST, "/chat/completions", &[], b"{}"))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json(response).await;
    assert!(body["details"].as_str().unwrap().contains("no identity"));
}

struct CountingCredential {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl CredentialProvider for CountingCredential {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessToken::new(format!("token-{n}"), None))
    }
}

#[tokio::test]
async fn test_fresh_token_for_every_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicU32::new(0));
    let handler = create_handler(
        vec![Endpoint::new(server.uri(), "gpt-4o", API_VERSION)],
        Arc::new(CountingCredential { calls: calls.clone() }),
    );

    for _ in 0..3 {
        let response = handler
            .clone()
            .handle_request(inbound(Method::POST, "/chat/completions", &[], b"{}"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let tokens: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.headers.get("authorization").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(tokens, vec!["Bearer token-1", "Bearer token-2", "Bearer token-3"]);
}

#[tokio::test]
async fn test_requests_spread_across_pool() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    for server in [&first, &second] {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    let handler = create_handler(
        vec![
            Endpoint::new(first.uri(), "gpt-4o", API_VERSION),
            Endpoint::new(second.uri(), "gpt-4o", API_VERSION),
        ],
        relay_credential(),
    );

    for _ in 0..60 {
        handler
            .clone()
            .handle_request(inbound(Method::POST, "/chat/completions", &[], b"{}"))
            .await;
    }

    let first_count = first.received_requests().await.unwrap().len();
    let second_count = second.received_requests().await.unwrap().len();
    assert_eq!(first_count + second_count, 60);
    assert!(first_count > 0 && second_count > 0);
}

#[tokio::test]
async fn test_streaming_relays_chunks_incrementally() {
    let chunks = ["data: one\n\n", "data: two\n\n", "data: three\n\n", "data: [DONE]\n\n"];
    let app = Router::new().route(
        "/openai/deployments/gpt-4o/chat/completions",
        axum::routing::post(move || async move {
            let stream = futures::stream::iter(chunks).then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok::<_, Infallible>(Bytes::from_static(chunk.as_bytes()))
            });
            ([("content-type", "text/event-stream")], Body::from_stream(stream)).into_response()
        }),
    );
    let base_url = spawn_upstream(app).await;

    let handler = create_handler(vec![Endpoint::new(base_url, "gpt-4o", API_VERSION)], relay_credential());

    let start = Instant::now();
    let response = handler
        .handle_request(inbound(Method::POST, "/chat/completions", &[("stream", "true")], b"{}"))
        .await;
    // 响应头在上游发完之前就已返回
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "text/event-stream");

    let mut body = response.into_body().into_data_stream();
    let mut received = Vec::new();
    let mut arrivals = Vec::new();
    while let Some(frame) = body.next().await {
        received.extend_from_slice(&frame.unwrap());
        arrivals.push(start.elapsed());
    }

    assert_eq!(received, chunks.concat().into_bytes());
    assert!(arrivals.len() > 1, "body arrived as a single block");
    assert!(arrivals[arrivals.len() - 1] - arrivals[0] >= Duration::from_millis(200));
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_client_disconnect_releases_upstream() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    let app = Router::new().route(
        "/openai/deployments/gpt-4o/chat/completions",
        axum::routing::post(move || {
            let guard = DropFlag(flag.clone());
            async move {
                let stream = futures::stream::unfold(guard, |guard| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok::<_, Infallible>(Bytes::from_static(b"data: tick\n\n")), guard))
                });
                Body::from_stream(stream).into_response()
            }
        }),
    );
    let base_url = spawn_upstream(app).await;

    let handler = create_handler(vec![Endpoint::new(base_url, "gpt-4o", API_VERSION)], relay_credential());
    let response = handler
        .handle_request(inbound(Method::POST, "/chat/completions", &[("stream", "true")], b"{}"))
        .await;

    let mut body = response.into_body().into_data_stream();
    assert!(body.next().await.unwrap().is_ok());
    drop(body);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !dropped.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "upstream stream was not released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
