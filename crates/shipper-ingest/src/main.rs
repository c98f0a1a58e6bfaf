//! HTTP ingestion sink: `POST /v1/effie/logs` persists a batch of shipped
//! documents to Postgres; `GET /metrics` exposes request counters.

mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use shipper_config::IngestConfig;
use shipper_db::PgPool;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use metrics::Metrics;

struct App {
    pool: PgPool,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Error)]
enum IngestError {
    #[error("empty request body")]
    EmptyBody,
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storing batch: {0}")]
    Db(#[from] shipper_db::DbError),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match self {
            IngestError::EmptyBody | IngestError::Json(_) => StatusCode::BAD_REQUEST,
            IngestError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg: IngestConfig = shipper_config::load().context("loading ingest config")?;
    init_tracing(cfg.debug);

    let pool = shipper_db::connect(&cfg.sql_connection_string, cfg.sql_max_connections)
        .await
        .context("connecting to database")?;
    shipper_db::bootstrap_schema(&pool)
        .await
        .context("bootstrapping schema")?;

    let app = Arc::new(App {
        pool,
        metrics: Arc::new(Metrics::new("shipper_ingest").context("registering metrics")?),
    });

    let router = Router::new()
        .route("/v1/effie/logs", post(post_logs))
        .route("/metrics", get(get_metrics))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                axum::middleware::from_fn_with_state(app.metrics.clone(), metrics::track_requests),
            ),
        )
        .with_state(app);

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "shipper-ingest listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("serving shipper-ingest")?;

    Ok(())
}

async fn post_logs(
    State(app): State<Arc<App>>,
    body: axum::body::Bytes,
) -> Result<StatusCode, IngestError> {
    if body.is_empty() {
        return Err(IngestError::EmptyBody);
    }

    let entries: Vec<Value> = serde_json::from_slice(&body)?;
    let capture_time = shipper_db::capture_time_now();
    let rows: Vec<(String, String)> = entries
        .iter()
        .map(|entry| shipper_db::extract_row(entry, &capture_time))
        .collect();

    let inserted = shipper_db::insert_batch(&app.pool, &rows).await?;
    tracing::info!(rows = inserted, "ingested batch");
    Ok(StatusCode::OK)
}

async fn get_metrics(State(app): State<Arc<App>>) -> impl IntoResponse {
    (StatusCode::OK, app.metrics.render())
}

fn init_tracing(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
