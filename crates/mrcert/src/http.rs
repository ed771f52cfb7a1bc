use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;

use mrcert_ca::http::CaApiDoc;
use mrcert_ca::CaCore;
use mrcert_common::error::ErrorCode;
use mrcert_common::http::error_response;

#[derive(Clone)]
struct AppState {
    core: CaCore,
    storage_dir: PathBuf,
    started_at: Instant,
}

/// Full application router: health, status, schema and the CA routes.
pub(crate) fn app(core: CaCore, storage_dir: PathBuf, started_at: Instant) -> Router {
    let state = AppState {
        core: core.clone(),
        storage_dir,
        started_at,
    };

    Router::new()
        .route("/healthz", get(health))
        .route("/v1/status", get(status_handler))
        .route("/openapi.json", get(openapi_handler))
        .with_state(state)
        .merge(core.routes())
        .layer(CorsLayer::permissive())
}

pub(crate) async fn start_http(
    core: CaCore,
    listen: SocketAddr,
    storage_dir: PathBuf,
    cancel: CancellationToken,
    started_at: Instant,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("HTTP API listening on {}", listener.local_addr()?);

    axum::serve(listener, app(core, storage_dir, started_at))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    tracing::debug!("HTTP API stopped");
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let counts = match state.core.counts().await {
        Ok(counts) => counts,
        Err(e) => return error_response(ErrorCode::from(&e), e.to_string()),
    };
    let certificates: BTreeMap<String, usize> = counts
        .into_iter()
        .map(|(category, count)| (category.to_string(), count))
        .collect();

    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "storage_dir": state.storage_dir.display().to_string(),
        "certificates": certificates,
    }))
    .into_response()
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(CaApiDoc::openapi())
}
