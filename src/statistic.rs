//! Observability endpoint: `GET /balancer/statistic?name=<NAME>` returns a
//! JSON array of per-backend url/alive/success/failure, or a plain-text
//! "not found" line when no balancer is registered under that name.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;

use crate::manager::Manager;
use crate::util::with_scheme;

#[derive(Serialize)]
struct BackendStat {
    url: String,
    alive: bool,
    success: u64,
    failure: u64,
}

pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/balancer/statistic", get(index_handler))
        .with_state(manager)
}

async fn index_handler(
    State(manager): State<Arc<Manager>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let name = params.get("name").cloned().unwrap_or_default();

    let Some(balancer) = manager.get(&name).await else {
        return (
            StatusCode::OK,
            format!("not found balancer {name}\n"),
        )
            .into_response();
    };

    let pool = balancer.backends();
    let mut result = Vec::new();
    pool.range(|_, backend| {
        result.push(BackendStat {
            url: with_scheme(&backend.url),
            alive: backend.state.alive(),
            success: backend.stats.success(),
            failure: backend.stats.failure(),
        });
        true
    });

    axum::Json(json!(result)).into_response()
}

/// Starts the statistics server on `port`, bound to all interfaces.
/// Runs forever; intended to be spawned as its own task.
pub async fn serve(manager: Arc<Manager>, port: u16) -> std::io::Result<()> {
    let app = router(manager);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
