//! Search UI: renders a form, compiles the query grammar into SQL, and
//! lists matching documents; `GET /view` renders a single document in full.

mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipper_config::SearchConfig;
use shipper_db::PgPool;
use shipper_query::{clamp_limit, compile_projection, compile_query, validate_interval, ParseError, QueryError};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use metrics::Metrics;

/// Hardcoded default projection, matching the original UI's no-`f`-supplied
/// column list.
const DEFAULT_FIELDS: [&str; 2] = ["_meta.host", "message"];

/// Value substituted for a missing `m`, matching the original's
/// `getNumFromRequest` default of `0` — which then clamps up to
/// [`shipper_query::MIN_LIMIT`], not to any richer default page size.
const DEFAULT_PERPAGE: i64 = 0;

struct App {
    pool: PgPool,
    hb: Handlebars<'static>,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Error)]
enum SearchError {
    #[error("p must be a non-negative integer")]
    InvalidPage,
    #[error("m must be an integer")]
    InvalidPerPage,
    #[error("invalid query: {0}")]
    Query(#[from] ParseError),
    #[error("{0}")]
    Validation(#[from] QueryError),
    #[error("rendering template: {0}")]
    Template(#[from] handlebars::RenderError),
    #[error("database error: {0}")]
    Db(#[from] shipper_db::DbError),
    #[error("id must be a positive integer")]
    InvalidId,
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let status = match self {
            SearchError::InvalidPage
            | SearchError::InvalidPerPage
            | SearchError::InvalidId
            | SearchError::Query(_)
            | SearchError::Validation(_) => StatusCode::BAD_REQUEST,
            SearchError::Db(shipper_db::DbError::NotFound) => StatusCode::NOT_FOUND,
            SearchError::Db(_) | SearchError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    /// Page number. Validated (must be a non-negative integer) but not
    /// applied as an offset — the underlying listing query has no notion of
    /// pages, matching the original UI's behavior.
    p: Option<String>,
    /// Rows per page, clamped to `[MIN_LIMIT, MAX_LIMIT]`.
    m: Option<String>,
    /// A timespan of the shape `"<int> seconds|minutes|hours|days"`.
    /// Validated but, like `p`, not currently applied to the query.
    t: Option<String>,
    /// Comma-separated dotted projection fields.
    f: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ViewParams {
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RenderRow {
    cells: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg: SearchConfig = shipper_config::load().context("loading search config")?;
    init_tracing(cfg.debug);

    let pool = shipper_db::connect(&cfg.sql_connection_string, cfg.sql_max_connections)
        .await
        .context("connecting to database")?;

    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);
    hb.register_template_string("home", include_str!("templates/home.hbs"))
        .context("registering home template")?;
    hb.register_template_string("search", include_str!("templates/search.hbs"))
        .context("registering search template")?;
    hb.register_template_string("view", include_str!("templates/view.hbs"))
        .context("registering view template")?;

    let app = Arc::new(App {
        pool,
        hb,
        metrics: Arc::new(Metrics::new("shipper_search").context("registering metrics")?),
    });

    let router = Router::new()
        .route("/", get(get_home))
        .route("/search", get(get_search))
        .route("/view", get(get_view))
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
    tracing::info!(%addr, "shipper-search listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("serving shipper-search")?;

    Ok(())
}

async fn get_home(State(app): State<Arc<App>>) -> Result<Html<String>, SearchError> {
    let body = app.hb.render("home", &serde_json::json!({}))?;
    Ok(Html(body))
}

async fn get_search(
    State(app): State<Arc<App>>,
    Query(params): Query<SearchParams>,
) -> Result<Html<String>, SearchError> {
    let _page = parse_nonneg(params.p.as_deref())?;

    let perpage = match params.m.as_deref() {
        Some(raw) => raw.parse::<i64>().map_err(|_| SearchError::InvalidPerPage)?,
        None => DEFAULT_PERPAGE,
    };
    let limit = clamp_limit(perpage);

    if let Some(timespan) = params.t.as_deref().filter(|t| !t.is_empty()) {
        validate_interval(timespan)?;
    }

    let fields: Vec<String> = match params.f.as_deref().filter(|f| !f.is_empty()) {
        Some(raw) => raw.split(',').map(str::to_string).collect(),
        None => DEFAULT_FIELDS.iter().map(|s| s.to_string()).collect(),
    };
    let projection = compile_projection(&fields)?;

    let where_clause = compile_query(&params.q)?;
    let rows = shipper_db::search(
        &app.pool,
        &projection,
        where_clause
            .as_ref()
            .map(|(clause, params)| (clause.as_str(), params.as_slice())),
        limit,
    )
    .await?;

    let mut header = vec!["id".to_string(), "ts".to_string()];
    header.extend(fields.iter().cloned());

    let render_rows: Vec<RenderRow> = rows.iter().map(|row| to_render_row(row, &header)).collect();

    let body = app.hb.render(
        "search",
        &serde_json::json!({
            "query": params.q,
            "timespan": params.t.clone().unwrap_or_default(),
            "perpage": limit,
            "fields": header,
            "rows": render_rows,
        }),
    )?;
    Ok(Html(body))
}

async fn get_view(
    State(app): State<Arc<App>>,
    Query(params): Query<ViewParams>,
) -> Result<Html<String>, SearchError> {
    let id: i64 = params
        .id
        .as_deref()
        .ok_or(SearchError::InvalidId)?
        .parse()
        .ok()
        .filter(|id| *id > 0)
        .ok_or(SearchError::InvalidId)?;

    let (id, ts, doc) = shipper_db::view(&app.pool, id).await?;
    let body = app.hb.render(
        "view",
        &serde_json::json!({
            "id": id,
            "ts": ts.to_rfc3339(),
            "doc": serde_json::to_string_pretty(&doc).unwrap_or_default(),
        }),
    )?;
    Ok(Html(body))
}

async fn get_metrics(State(app): State<Arc<App>>) -> impl IntoResponse {
    (StatusCode::OK, app.metrics.render())
}

fn parse_nonneg(raw: Option<&str>) -> Result<i64, SearchError> {
    match raw.filter(|s| !s.is_empty()) {
        None => Ok(0),
        Some(raw) => {
            let value: i64 = raw.parse().map_err(|_| SearchError::InvalidPage)?;
            if value < 0 {
                return Err(SearchError::InvalidPage);
            }
            Ok(value)
        }
    }
}

fn value_to_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn to_render_row(row: &Value, header: &[String]) -> RenderRow {
    let cells = header.iter().map(|field| value_to_cell(row.get(field))).collect();
    RenderRow { cells }
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
