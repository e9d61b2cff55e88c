//! Integration tests against an in-process mock proxy

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use testproxy_shim::config::{Mode, ShimConfig};
use testproxy_shim::protocol;
use testproxy_shim::session::{ControlOptions, ProxyController, ProxySessionConfig, SessionState};
use testproxy_shim::transport::{
    InterceptingTransport, NetworkTransport, RoutedTransport, Transport,
};
use testproxy_shim::{InterceptError, ShimError};

/// A request as seen by the mock proxy
#[derive(Debug, Clone)]
struct Captured {
    method: String,
    path_and_query: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// How the mock proxy answers control calls
#[derive(Debug, Clone)]
struct Behavior {
    recording_id: Option<&'static str>,
    start_status: StatusCode,
    stop_status: StatusCode,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            recording_id: Some("abc123"),
            start_status: StatusCode::OK,
            stop_status: StatusCode::OK,
        }
    }
}

struct MockProxy {
    addr: SocketAddr,
    captured: Arc<Mutex<Vec<Captured>>>,
}

impl MockProxy {
    async fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));

        let state = Arc::clone(&captured);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&state);
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        let behavior = behavior.clone();
                        async move { handle(req, &state, &behavior).await }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, captured }
    }

    fn requests(&self) -> Vec<Captured> {
        self.captured.lock().unwrap().clone()
    }

    fn session(&self, mode: Mode) -> ProxySessionConfig {
        ProxySessionConfig::new(
            "127.0.0.1",
            self.addr.port(),
            mode,
            PathBuf::from("/recordings/tables.json"),
        )
    }
}

async fn handle(
    req: Request<Incoming>,
    captured: &Mutex<Vec<Captured>>,
    behavior: &Behavior,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();
    let path = parts.uri.path().to_string();

    captured.lock().unwrap().push(Captured {
        method: parts.method.to_string(),
        path_and_query: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default(),
        headers: parts.headers,
        body,
    });

    let mut response = Response::builder();
    if path.ends_with("/start") {
        response = response.status(behavior.start_status);
        if let Some(id) = behavior.recording_id {
            response = response.header(protocol::RECORDING_ID, id);
        }
    } else if path.ends_with("/stop") {
        response = response.status(behavior.stop_status);
    } else {
        response = response.status(StatusCode::OK);
    }

    Ok(response.body(Full::new(Bytes::from_static(b"{\"value\":[]}"))).unwrap())
}

fn controller() -> ProxyController {
    ProxyController::new(ControlOptions {
        scheme: "http".to_string(),
        ..ControlOptions::default()
    })
    .unwrap()
}

fn network() -> NetworkTransport {
    NetworkTransport::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

fn get(url: &str) -> Request<Bytes> {
    Request::builder()
        .method("GET")
        .uri(url)
        .body(Bytes::new())
        .unwrap()
}

#[tokio::test]
async fn test_start_stores_recording_id() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let mut session = proxy.session(Mode::Record);

    let id = controller().start(&mut session).await.unwrap();

    assert_eq!(id, "abc123");
    assert_eq!(session.recording_id(), Some("abc123"));
    assert_eq!(session.state(), SessionState::Started);

    let requests = proxy.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path_and_query, "/record/start");

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body[protocol::RECORDING_FILE], "/recordings/tables.json");
}

#[tokio::test]
async fn test_record_session_end_to_end() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let controller = controller();
    let mut session = proxy.session(Mode::Record);

    let id = controller.start(&mut session).await.unwrap();
    let transport = InterceptingTransport::new(&session, network()).unwrap();

    let response = transport
        .send(get("http://storage.example.com/table1/entity1?$select=Name"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"{\"value\":[]}");

    controller.stop(&mut session).await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);

    let requests = proxy.requests();
    assert_eq!(requests.len(), 3);

    let data = &requests[1];
    assert_eq!(data.path_and_query, "/table1/entity1?$select=Name");
    assert_eq!(data.header(protocol::RECORDING_ID), Some(id.as_str()));
    assert_eq!(data.header(protocol::RECORDING_MODE), Some("record"));
    assert_eq!(
        data.header(protocol::UPSTREAM_BASE_URI),
        Some("http://storage.example.com/table1")
    );
    assert_eq!(data.header("content-type"), Some(protocol::JSON_CONTENT_TYPE));

    let stop = &requests[2];
    assert_eq!(stop.path_and_query, "/record/stop");
    assert_eq!(stop.header(protocol::RECORDING_ID), Some("abc123"));
    assert_eq!(stop.header(protocol::RECORDING_SAVE), Some("true"));
}

#[tokio::test]
async fn test_playback_session_paths() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let controller = controller();
    let mut session = proxy.session(Mode::Playback);

    controller.start(&mut session).await.unwrap();
    let transport = InterceptingTransport::new(&session, network()).unwrap();
    transport
        .send(get("http://storage.example.com/Tables"))
        .await
        .unwrap();
    controller.stop(&mut session).await.unwrap();

    let requests = proxy.requests();
    assert_eq!(requests[0].path_and_query, "/playback/start");
    assert_eq!(requests[1].header(protocol::RECORDING_MODE), Some("playback"));
    assert_eq!(
        requests[1].header(protocol::UPSTREAM_BASE_URI),
        Some("http://storage.example.com")
    );
    assert_eq!(requests[2].path_and_query, "/playback/stop");
}

#[tokio::test]
async fn test_stop_without_save_directive() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let controller = ProxyController::new(ControlOptions {
        scheme: "http".to_string(),
        save_recording: false,
        ..ControlOptions::default()
    })
    .unwrap();
    let mut session = proxy.session(Mode::Record);

    controller.start(&mut session).await.unwrap();
    controller.stop(&mut session).await.unwrap();

    let requests = proxy.requests();
    assert_eq!(requests[1].header(protocol::RECORDING_SAVE), Some("false"));
}

#[tokio::test]
async fn test_stop_before_start_makes_no_call() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let mut session = proxy.session(Mode::Record);

    let err = controller().stop(&mut session).await.unwrap_err();

    assert!(matches!(err, ShimError::SessionState(_)));
    assert!(proxy.requests().is_empty());
}

#[tokio::test]
async fn test_send_before_start_is_rejected() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let session = proxy.session(Mode::Record);

    let result = InterceptingTransport::new(&session, network());

    assert!(matches!(result, Err(ShimError::SessionState(_))));
    assert!(proxy.requests().is_empty());
}

#[tokio::test]
async fn test_start_missing_header_is_protocol_error() {
    let proxy = MockProxy::spawn(Behavior {
        recording_id: None,
        ..Behavior::default()
    })
    .await;
    let mut session = proxy.session(Mode::Record);

    let err = controller().start(&mut session).await.unwrap_err();

    assert!(matches!(err, ShimError::ProxyProtocol(_)));
    assert_eq!(session.state(), SessionState::Unstarted);
}

#[tokio::test]
async fn test_start_error_status_is_protocol_error() {
    let proxy = MockProxy::spawn(Behavior {
        start_status: StatusCode::INTERNAL_SERVER_ERROR,
        ..Behavior::default()
    })
    .await;
    let mut session = proxy.session(Mode::Record);

    let err = controller().start(&mut session).await.unwrap_err();
    assert!(matches!(err, ShimError::ProxyProtocol(_)));
}

#[tokio::test]
async fn test_failed_stop_is_reported_once() {
    let proxy = MockProxy::spawn(Behavior {
        stop_status: StatusCode::BAD_REQUEST,
        ..Behavior::default()
    })
    .await;
    let controller = controller();
    let mut session = proxy.session(Mode::Record);

    controller.start(&mut session).await.unwrap();
    let err = controller.stop(&mut session).await.unwrap_err();
    assert!(matches!(err, ShimError::ProxyProtocol(_)));

    // No automatic retry, and a second stop is refused locally
    let again = controller.stop(&mut session).await.unwrap_err();
    assert!(matches!(again, ShimError::SessionState(_)));
    assert_eq!(proxy.requests().len(), 2);
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let controller = controller();
    let mut session = proxy.session(Mode::Record);

    controller.start(&mut session).await.unwrap();
    let err = controller.start(&mut session).await.unwrap_err();

    assert!(matches!(err, ShimError::SessionState(_)));
    assert_eq!(proxy.requests().len(), 1);
}

#[tokio::test]
async fn test_concurrent_sends_share_transport() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let controller = controller();
    let mut session = proxy.session(Mode::Record);

    controller.start(&mut session).await.unwrap();
    let transport = Arc::new(InterceptingTransport::new(&session, network()).unwrap());

    let mut handles = Vec::new();
    for i in 0..8 {
        let transport = Arc::clone(&transport);
        handles.push(tokio::spawn(async move {
            transport
                .send(get(&format!("http://storage.example.com/table1/entity{i}")))
                .await
                .map(|r| r.status())
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), StatusCode::OK);
    }

    controller.stop(&mut session).await.unwrap();

    let data: Vec<_> = proxy
        .requests()
        .into_iter()
        .filter(|r| r.path_and_query.starts_with("/table1/"))
        .collect();
    assert_eq!(data.len(), 8);
    assert!(data
        .iter()
        .all(|r| r.header(protocol::RECORDING_ID) == Some("abc123")));
}

#[tokio::test]
async fn test_upstream_errors_pass_through() {
    // Nothing listens on port 1
    let mut session = ProxySessionConfig::new("127.0.0.1", 1, Mode::Record, "rec.json");
    session.attach("abc123").unwrap();

    let transport = InterceptingTransport::new(&session, network()).unwrap();
    let err = transport
        .send(get("http://storage.example.com/table1/entity1"))
        .await
        .unwrap_err();

    let upstream = err.into_upstream().expect("network error is passed through");
    assert!(upstream.is_connect());
}

#[tokio::test]
async fn test_relative_request_is_redirect_error() {
    let mut session = ProxySessionConfig::new("127.0.0.1", 1, Mode::Record, "rec.json");
    session.attach("abc123").unwrap();

    let transport = InterceptingTransport::new(&session, network()).unwrap();
    let err = transport.send(get("/table1/entity1")).await.unwrap_err();

    assert!(matches!(
        err,
        InterceptError::Redirect(ShimError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_routed_transport_direct_when_disabled() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let config = ShimConfig::default();

    let transport = RoutedTransport::from_config(&config, None, network()).unwrap();
    assert!(!transport.is_proxied());

    let url = format!("http://{}/table1/entity1", proxy.addr);
    transport.send(get(&url)).await.unwrap();

    let requests = proxy.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header(protocol::RECORDING_ID), None);
    assert_eq!(requests[0].header(protocol::UPSTREAM_BASE_URI), None);
}

#[tokio::test]
async fn test_routed_transport_from_env_style_config() {
    let proxy = MockProxy::spawn(Behavior::default()).await;
    let port = proxy.addr.port().to_string();
    let config = ShimConfig::from_lookup(|key| match key {
        "USE_PROXY" => Some("true".to_string()),
        "PROXY_HOST" => Some("127.0.0.1".to_string()),
        "PROXY_PORT" => Some(port.clone()),
        "PROXY_MODE" => Some("record".to_string()),
        "PROXY_SCHEME" => Some("http".to_string()),
        "PROXY_RECORDING_FILE" => Some("/recordings/tables.json".to_string()),
        _ => None,
    })
    .unwrap();

    let controller = ProxyController::from_config(&config).unwrap();
    let mut session = config.session_config().unwrap();
    controller.start(&mut session).await.unwrap();

    let transport = RoutedTransport::from_config(&config, Some(&session), network()).unwrap();
    assert!(transport.is_proxied());
    transport
        .send(get("http://storage.example.com/table1/entity1"))
        .await
        .unwrap();

    controller.stop(&mut session).await.unwrap();

    let requests = proxy.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[1].header(protocol::UPSTREAM_BASE_URI),
        Some("http://storage.example.com/table1")
    );
    assert_eq!(requests.first().unwrap().path_and_query, "/record/start");
    assert_eq!(requests.last().unwrap().path_and_query, "/record/stop");
}
