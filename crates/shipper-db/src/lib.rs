//! Postgres persistence for ingested documents, search, and retention.
//!
//! One connection pool, one table (`docs(id bigserial, ts timestamp, doc
//! jsonb)`), shared by the three services that touch the database: the
//! ingestion sink bulk-inserts through [`insert_batch`], the search UI reads
//! through [`search`]/[`view`], and the retention worker deletes through
//! [`delete_where_key_value`]/[`delete_older_than`].

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Row};
use thiserror::Error;

pub use shipper_types::MISSING_DOC_SENTINEL;
pub use sqlx::PgPool;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connecting to database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("bootstrapping schema: {0}")]
    Bootstrap(#[source] sqlx::Error),
    #[error("inserting batch: {0}")]
    Insert(#[source] sqlx::Error),
    #[error("running search query: {0}")]
    Search(#[source] sqlx::Error),
    #[error("row not found")]
    NotFound,
}

/// Open a connection pool against `connection_string`, capped at
/// `max_connections`. Mirrors the original's single `sql.Open` + `SetMaxOpenConns`.
pub async fn connect(connection_string: &str, max_connections: u32) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(connection_string)
        .await
        .map_err(DbError::Connect)
}

/// Create the `docs` table and its two indexes if they don't already exist.
/// Idempotent across restarts; this is bootstrap, not a migration.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("CREATE TABLE IF NOT EXISTS docs (id BIGSERIAL PRIMARY KEY, ts TIMESTAMP, doc JSONB)")
        .execute(pool)
        .await
        .map_err(DbError::Bootstrap)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS docs_id_idx ON docs (id)")
        .execute(pool)
        .await
        .map_err(DbError::Bootstrap)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS docs_doc_gin_idx ON docs USING GIN (doc)")
        .execute(pool)
        .await
        .map_err(DbError::Bootstrap)?;
    Ok(())
}

/// Extract the `(ts, doc)` pair the ingestion sink stores for one batch
/// entry, applying the per-row default policy: a missing or non-string
/// `ts` falls back to `capture_time`; a missing or non-string `doc` falls
/// back to [`MISSING_DOC_SENTINEL`].
pub fn extract_row(entry: &Value, capture_time: &str) -> (String, String) {
    let ts = entry
        .get("ts")
        .and_then(Value::as_str)
        .unwrap_or(capture_time)
        .to_string();
    let doc = entry
        .get("doc")
        .and_then(Value::as_str)
        .unwrap_or(MISSING_DOC_SENTINEL)
        .to_string();
    (ts, doc)
}

/// The ingest-side capture time, rendered in the same
/// `YYYY-MM-DD HH:MM:SS.fff` shape the shipper uses.
pub fn capture_time_now() -> String {
    DateTime::<Local>::from(std::time::SystemTime::now())
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// Escape one field for Postgres's `COPY ... FROM STDIN` text format:
/// backslash, tab, newline, and carriage return all need a backslash escape.
fn escape_copy_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for ch in field.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// Bulk-insert `rows` (already-extracted `(ts, doc)` pairs) into `docs` in
/// one transaction via `COPY ... FROM STDIN`, committing only if every row
/// streams cleanly. Any error rolls the transaction back wholly — a batch
/// commits wholly or not at all, never partially.
pub async fn insert_batch(pool: &PgPool, rows: &[(String, String)]) -> Result<u64, DbError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await.map_err(DbError::Insert)?;

    let mut buf = String::new();
    for (ts, doc) in rows {
        buf.push_str(&escape_copy_field(ts));
        buf.push('\t');
        buf.push_str(&escape_copy_field(doc));
        buf.push('\n');
    }

    let mut copy = tx
        .copy_in_raw("COPY docs (ts, doc) FROM STDIN")
        .await
        .map_err(DbError::Insert)?;
    copy.send(buf.into_bytes()).await.map_err(DbError::Insert)?;
    copy.finish().await.map_err(DbError::Insert)?;

    tx.commit().await.map_err(DbError::Insert)?;
    tracing::debug!(rows = rows.len(), "inserted batch");
    Ok(rows.len() as u64)
}

/// One row returned from [`search`] or [`view`]: `id`/`ts` plus every
/// projected field, as a JSON object (`row_to_json` over the compiled
/// projection — the only way to carry arbitrary, per-query column names
/// back out of a dynamically built `SELECT`).
pub type SearchRow = Value;

/// Run a compiled search query: `projection` is the select-list fragment
/// from [`shipper_query::compile_projection`], `where_clause` is the
/// optional `(sql, params)` pair from `shipper_query::compile_where`
/// (already validated, never raw user text), and `limit` must already be
/// clamped via `shipper_query::clamp_limit`.
pub async fn search(
    pool: &PgPool,
    projection: &str,
    where_clause: Option<(&str, &[String])>,
    limit: i64,
) -> Result<Vec<SearchRow>, DbError> {
    let mut sql = format!("SELECT {projection} FROM docs");
    let params: &[String] = match &where_clause {
        Some((clause, params)) => {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
            params
        }
        None => &[],
    };
    sql.push_str(" ORDER BY id DESC LIMIT ");
    sql.push_str(&limit.to_string());

    let wrapped = format!("SELECT row_to_json(t) FROM ({sql}) t");

    let mut query = sqlx::query_scalar::<_, Value>(&wrapped);
    for param in params {
        query = query.bind(param);
    }

    query.fetch_all(pool).await.map_err(DbError::Search)
}

/// Fetch a single row by id for the `/view` route: the full `doc` column,
/// no projection involved.
pub async fn view(pool: &PgPool, id: i64) -> Result<(i64, DateTime<Utc>, Value), DbError> {
    let row: PgRow = sqlx::query("SELECT id, ts, doc FROM docs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(DbError::Search)?
        .ok_or(DbError::NotFound)?;

    let id: i64 = row.try_get("id").map_err(DbError::Search)?;
    let ts: DateTime<Utc> = row.try_get("ts").map_err(DbError::Search)?;
    let doc: Value = row.try_get("doc").map_err(DbError::Search)?;
    Ok((id, ts, doc))
}

/// Delete every row where `doc#>>key_path = value` and older than
/// `interval` (a pre-validated Postgres `INTERVAL` literal), returning the
/// number of rows removed. `key_path` must already be the `{a,b}`
/// array-literal form from `shipper_query::path_to_pg_array`.
pub async fn delete_where_key_value(
    pool: &PgPool,
    key_path: &str,
    value: &str,
    interval: &str,
) -> Result<u64, DbError> {
    let sql = format!(
        "DELETE FROM docs WHERE doc#>>$1 = $2 AND ts < CURRENT_TIMESTAMP - INTERVAL '{interval}'"
    );
    let result = sqlx::query(&sql)
        .bind(key_path)
        .bind(value)
        .execute(pool)
        .await
        .map_err(DbError::Search)?;
    let count = result.rows_affected();
    tracing::info!(key_path, count, "deleted rows by key/value");
    Ok(count)
}

/// Delete every row older than `interval` regardless of key, returning the
/// number of rows removed.
pub async fn delete_older_than(pool: &PgPool, interval: &str) -> Result<u64, DbError> {
    let sql = format!("DELETE FROM docs WHERE ts < CURRENT_TIMESTAMP - INTERVAL '{interval}'");
    let result = sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(DbError::Search)?;
    let count = result.rows_affected();
    tracing::info!(count, "deleted rows older than interval");
    Ok(count)
}

/// Columns present in a raw [`PgRow`], useful to callers building their own
/// dynamic projections on top of [`search`]'s `row_to_json` output.
pub fn row_column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}
