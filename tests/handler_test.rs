use std::{
    collections::HashMap,
    sync::{atomic::AtomicBool, Arc},
};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::post,
    Router,
};
use http_body_util::BodyExt;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use rpc_balancer::{
    app_state::{AppState, RouterState, RuntimeBackend},
    config::{BackendConfig, HealthCheckConfig},
    demo_health::HealthState,
    handlers::{extract_rpc_method, proxy},
    mock::MockKeyStore,
};
use tower::ServiceExt; // for oneshot

async fn start_mock_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let app = Router::new().route("/", post(|| async { "{\"jsonrpc\":\"2.0\",\"result\":\"ok\",\"id\":1}" }));
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn build_state(backends: Vec<RuntimeBackend>) -> Arc<AppState> {
    let https = HttpsConnector::new();
    let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(https);
    let keystore = Arc::new(MockKeyStore::new());

    let labels: Vec<String> = backends.iter().map(|b| b.config.label.clone()).collect();
    let health_state = Arc::new(HealthState::new(labels));

    let router_state = RouterState {
        backends,
        method_routes: HashMap::new(),
        health_state,
        proxy_timeout_secs: 5,
        health_check_config: HealthCheckConfig::default(),
    };

    Arc::new(AppState {
        client,
        keystore,
        state: Arc::new(ArcSwap::new(Arc::new(router_state))),
    })
}

#[tokio::test]
async fn test_proxy_handler_success() {
    let backend_url = start_mock_backend().await;

    let backend = RuntimeBackend {
        config: BackendConfig {
            label: "mock-backend".to_string(),
            url: backend_url,
            ws_url: None,
            weight: 100,
        },
        healthy: Arc::new(AtomicBool::new(true)),
    };

    let state = build_state(vec![backend]);
    state.keystore.add_key("test-key", "tester", 100);

    let app = Router::new()
        .route("/", post(proxy))
        .with_state(state)
        .layer(middleware::from_fn(extract_rpc_method));

    let req = Request::builder()
        .method("POST")
        .uri("/?api-key=test-key")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body_str = String::from_utf8(body.to_vec()).unwrap();
    assert!(body_str.contains("result"));
}

#[tokio::test]
async fn test_proxy_handler_unauthorized() {
    let state = build_state(vec![]);
    // No keys added

    let app = Router::new()
        .route("/", post(proxy))
        .with_state(state)
        .layer(middleware::from_fn(extract_rpc_method));

    let req = Request::builder()
        .method("POST")
        .uri("/?api-key=wrong-key")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"jsonrpc":"2.0","method":"test","id":1}"#))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_proxy_handler_rate_limited() {
    let state = build_state(vec![]);
    state.keystore.add_key("limit-key", "tester", 10);
    state
        .keystore
        .rate_limited_keys
        .lock()
        .unwrap()
        .push("limit-key".to_string());

    let app = Router::new()
        .route("/", post(proxy))
        .with_state(state)
        .layer(middleware::from_fn(extract_rpc_method));

    let req = Request::builder()
        .method("POST")
        .uri("/?api-key=limit-key")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"jsonrpc":"2.0","method":"test","id":1}"#))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
