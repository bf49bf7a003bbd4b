use std::{
    collections::HashMap,
    sync::{atomic::AtomicBool, Arc},
};

use arc_swap::ArcSwap;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use rpc_balancer::{
    app_state::{AppState, RouterState, RuntimeBackend},
    config::{BackendConfig, HealthCheckConfig},
    demo_health::{BackendHealthStatus, HealthState},
    mock::MockKeyStore,
};

fn runtime_backend(label: &str, url: &str, weight: u32) -> RuntimeBackend {
    RuntimeBackend {
        config: BackendConfig {
            label: label.to_string(),
            url: url.to_string(),
            ws_url: None,
            weight,
        },
        healthy: Arc::new(AtomicBool::new(true)),
    }
}

fn create_test_state() -> AppState {
    let https = HttpsConnector::new();
    let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(https);
    let keystore = Arc::new(MockKeyStore::new());

    let backends = vec![
        runtime_backend("primary", "http://primary", 1),
        runtime_backend("secondary", "http://secondary", 1),
    ];

    let labels: Vec<String> = backends.iter().map(|b| b.config.label.clone()).collect();
    let health_state = Arc::new(HealthState::new(labels));

    let router_state = RouterState {
        backends,
        method_routes: HashMap::new(),
        health_state,
        proxy_timeout_secs: 10,
        health_check_config: HealthCheckConfig::default(),
    };

    AppState {
        client,
        keystore,
        state: Arc::new(ArcSwap::new(Arc::new(router_state))),
    }
}

#[test]
fn test_select_backend_weighted() {
    let state = create_test_state();

    let iterations = 1000;
    let mut primary_count = 0;
    let mut secondary_count = 0;

    for _ in 0..iterations {
        let (label, _) = state.select_backend(None).unwrap();
        if label == "primary" {
            primary_count += 1;
        } else {
            secondary_count += 1;
        }
    }

    // Both should be selected roughly 50%
    assert!(primary_count > 400);
    assert!(secondary_count > 400);
}

#[test]
fn test_select_backend_method_override() {
    let state = create_test_state();
    {
        let current = state.state.load();
        let mut next = (**current).clone();
        next.method_routes
            .insert("eth_call".to_string(), "secondary".to_string());
        state.state.store(Arc::new(next));
    }

    let (label, _) = state.select_backend(Some("eth_call")).unwrap();
    assert_eq!(label, "secondary");
}

#[test]
fn test_select_backend_unhealthy_fallback() {
    let state = create_test_state();
    let mut status = BackendHealthStatus::default();
    status.healthy = false;
    state.state.load().health_state.update_status("primary", status);

    for backend in &state.state.load().backends {
        if backend.config.label == "primary" {
            backend.healthy.store(false, std::sync::atomic::Ordering::Relaxed);
        }
    }

    let (label, _) = state.select_backend(None).unwrap();
    assert_eq!(label, "secondary");
}
