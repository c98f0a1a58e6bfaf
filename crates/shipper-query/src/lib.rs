//! Search query grammar parser and SQL compiler.
//!
//! `key.path op value` comparisons joined by `&&`/`||` with parentheses,
//! compiled into a parameterized Postgres `WHERE` clause over a `jsonb`
//! column. See [`parser::parse`] for the grammar and [`compiler::compile_where`]
//! for the SQL it produces.

mod compiler;
mod parser;
mod token;

pub use compiler::{
    clamp_limit, compile_projection, compile_where, path_to_pg_array, validate_interval,
    QueryError, MAX_LIMIT, MIN_LIMIT,
};
pub use parser::{Comparison, Expr, GroupMember, ParseError};
pub use token::{LexError, Op};

/// Parse and compile a query string in one step. An empty query compiles to
/// `(None, vec![])`, leaving the caller to fall back to its empty-query
/// listing path rather than emitting a vacuous `WHERE TRUE`.
pub fn compile_query(input: &str) -> Result<Option<(String, Vec<String>)>, ParseError> {
    Ok(parser::parse(input)?.map(|expr| compiler::compile_where(&expr)))
}
