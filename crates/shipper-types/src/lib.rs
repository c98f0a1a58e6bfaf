//! Shared domain types for the log pipeline.
//!
//! This crate defines the shapes that cross component boundaries:
//! - [`Document`] — one transformed log line, opaque JSON text
//! - [`Envelope`] — the wire shape of one entry in a delivered batch
//! - [`Row`] — a persisted database row as returned to the search UI
//! - [`JoinOp`] — boolean join between sibling nodes in an expression tree
//!
//! Everything here is intentionally thin: these are the types that get
//! serialized across a process boundary (HTTP, disk) or passed between the
//! tail worker, the batcher, and the delivery client. Component-internal
//! types (parsed expression trees, retry policies, registry handles) live in
//! their own crates.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// One transformed log line, as produced by the transform host (component A)
/// and consumed by the batcher (component E).
///
/// `doc` is opaque to every component except the transform host that
/// produced it and the ingestion sink that stores it: the pipeline never
/// parses it, only carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Local capture time, millisecond precision.
    pub ts: DateTime<Local>,
    /// The transformed document, as returned by the user's `t(...)` function.
    pub doc: String,
}

impl Document {
    pub fn new(ts: DateTime<Local>, doc: impl Into<String>) -> Self {
        Self { ts, doc: doc.into() }
    }

    /// Render `ts` in the wire format the ingestion sink expects:
    /// `YYYY-MM-DD HH:MM:SS.fff`.
    pub fn ts_string(&self) -> String {
        self.ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }

    pub fn into_envelope(self) -> Envelope {
        Envelope {
            ts: self.ts_string(),
            doc: self.doc,
        }
    }
}

/// Wire shape of one entry in a batched delivery: `{"ts": "...", "doc": "..."}`.
///
/// A batch posted by the shipper's delivery client (component F) is a JSON
/// array of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub ts: String,
    pub doc: String,
}

/// Sentinel used by the ingestion sink when an envelope's `doc` is missing
/// or not a string.
pub const MISSING_DOC_SENTINEL: &str = "<NO/DOC>";

/// A persisted row, as returned by the search UI's queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub doc: serde_json::Value,
}

/// Boolean join between two sibling nodes of an expression tree (component H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOp {
    And,
    Or,
}

impl JoinOp {
    /// The SQL keyword this join lowers to (component I).
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinOp::And => "AND",
            JoinOp::Or => "OR",
        }
    }
}
