use std::{
    net::SocketAddr,
    sync::{atomic::AtomicBool, Arc},
};

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use clap::Parser;
use hyper_tls::HttpsConnector;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use tracing::info;

use rpc_balancer::{
    app_state::{AppState, RouterState, RuntimeBackend},
    config::load_config,
    demo_health::{health_check_loop, HealthState},
    handlers::{extract_rpc_method, health_endpoint, log_requests, proxy, track_metrics, ws_proxy},
    keystore::RedisKeyStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "JSON-RPC reverse proxy on top of rpc-balancer")]
struct Args {
    /// Path to the proxy's TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = load_config(&args.config).unwrap_or_else(|e| {
        panic!("failed to load config from {}: {}", args.config, e);
    });

    let https = HttpsConnector::new();
    let client = Client::builder(TokioExecutor::new()).build(https);

    let keystore = Arc::new(
        RedisKeyStore::new(&config.redis_url).expect("failed to connect to redis"),
    );

    let runtime_backends: Vec<RuntimeBackend> = config
        .backends
        .iter()
        .map(|b| RuntimeBackend {
            config: b.clone(),
            healthy: Arc::new(AtomicBool::new(true)),
        })
        .collect();

    let health_state = Arc::new(HealthState::new(
        runtime_backends.iter().map(|b| b.config.label.clone()).collect(),
    ));

    let router_state = RouterState {
        backends: runtime_backends.clone(),
        method_routes: config.method_routes.clone(),
        health_state: health_state.clone(),
        proxy_timeout_secs: config.proxy.timeout_secs,
        health_check_config: config.health_check.clone(),
    };

    let state = Arc::new(AppState {
        client: client.clone(),
        keystore,
        state: Arc::new(ArcSwap::from_pointee(router_state)),
    });

    tokio::spawn(health_check_loop(
        client,
        runtime_backends,
        health_state,
        config.health_check.clone(),
    ));

    let app = Router::new()
        .route("/", any(proxy))
        .route("/*path", any(proxy))
        .route("/ws", get(ws_proxy))
        .route("/health", get(health_endpoint))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn(extract_rpc_method));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await.unwrap(),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
