//! Compiles a parsed [`Expr`] into a parameterized Postgres `WHERE` clause,
//! and dotted projection paths into chained JSON-extraction SQL.
//!
//! Every value the caller supplies — path segments included — travels as a
//! bind parameter. The only thing ever interpolated directly into the SQL
//! string is the clamped row limit, which is validated as an integer before
//! it touches the query.

use shipper_types::JoinOp;

use crate::parser::{Expr, GroupMember};
use crate::token::Op;

pub const MIN_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid projection field `{0}`: must match ^[A-Za-z0-9_.]+$")]
    InvalidField(String),
    #[error("invalid timespan `{0}`: must match ^[0-9]+ (seconds|minutes|hours|days)$")]
    InvalidInterval(String),
}

const INTERVAL_UNITS: [&str; 4] = ["seconds", "minutes", "hours", "days"];

/// Clamp a requested row limit into `[MIN_LIMIT, MAX_LIMIT]`. Values below
/// the floor are raised, not rejected; this mirrors the original UI's
/// `max(min(n, 500), 10)` clamp rather than erroring on an out-of-range
/// request.
pub fn clamp_limit(requested: i64) -> i64 {
    requested.clamp(MIN_LIMIT, MAX_LIMIT)
}

/// Validate a Postgres `INTERVAL` literal of the shape `"<int> <unit>"`
/// where `<unit>` is one of `seconds`, `minutes`, `hours`, `days`, before it
/// is ever concatenated into SQL. Returns the input unchanged once
/// validated — callers interpolate it directly into `INTERVAL '...'`
/// because bind parameters cannot appear inside an `INTERVAL` literal.
pub fn validate_interval(timespan: &str) -> Result<&str, QueryError> {
    let mut parts = timespan.split(' ');
    let (count, unit) = match (parts.next(), parts.next(), parts.next()) {
        (Some(count), Some(unit), None) => (count, unit),
        _ => return Err(QueryError::InvalidInterval(timespan.to_string())),
    };

    if count.is_empty() || !count.chars().all(|c| c.is_ascii_digit()) {
        return Err(QueryError::InvalidInterval(timespan.to_string()));
    }
    if !INTERVAL_UNITS.contains(&unit) {
        return Err(QueryError::InvalidInterval(timespan.to_string()));
    }

    Ok(timespan)
}

/// Rewrite a dotted path (`a.b.c`) into the `{a,b,c}` array-literal form
/// used with Postgres's `#>>` JSON path-extract-as-text operator. Shared
/// between the search query compiler and the retention worker, which both
/// need the same key-to-SQL mapping.
pub fn path_to_pg_array(path: &str) -> String {
    format!("{{{}}}", path.replace('.', ","))
}

fn op_to_sql(op: Op) -> &'static str {
    match op {
        Op::Eq => "=",
        Op::Ne => "!=",
        Op::Lt => "<",
        Op::Le => "<=",
        Op::Gt => ">",
        Op::Ge => ">=",
        Op::Like => "LIKE",
        Op::NotLike => "NOT LIKE",
    }
}

fn value_for_op(op: Op, value: &str) -> String {
    match op {
        Op::Like | Op::NotLike => format!("%{value}%"),
        _ => value.to_string(),
    }
}

fn join_to_sql(join: JoinOp) -> &'static str {
    join.as_sql()
}

/// Compile a `WHERE`-clause body (without the leading `WHERE`) and its bind
/// parameters, in left-to-right positional order starting at `$1`.
pub fn compile_where(expr: &Expr) -> (String, Vec<String>) {
    let mut params = Vec::new();
    let sql = compile_expr(expr, &mut params);
    (sql, params)
}

fn compile_expr(expr: &Expr, params: &mut Vec<String>) -> String {
    match expr {
        Expr::Comparison(cmp) => {
            let path_param = path_to_pg_array(&cmp.path);
            let value_param = value_for_op(cmp.op, &cmp.value);
            params.push(path_param);
            let path_idx = params.len();
            params.push(value_param);
            let value_idx = params.len();
            format!("doc#>>${path_idx} {} ${value_idx}", op_to_sql(cmp.op))
        }
        Expr::Group(members) => {
            let mut out = String::from("(");
            for GroupMember { expr, join_after } in members {
                out.push_str(&compile_expr(expr, params));
                if let Some(join) = join_after {
                    out.push(' ');
                    out.push_str(join_to_sql(*join));
                    out.push(' ');
                }
            }
            out.push(')');
            out
        }
    }
}

/// Compile the `SELECT` projection list for a set of dotted field paths.
/// The first two columns, `id` and `ts`, are always present; each requested
/// field becomes a chained `doc->'seg'->...->>'leaf'` expression aliased to
/// its dotted name.
pub fn compile_projection(fields: &[String]) -> Result<String, QueryError> {
    let mut columns = vec!["id".to_string(), "ts".to_string()];

    for field in fields {
        if field.is_empty()
            || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(QueryError::InvalidField(field.clone()));
        }

        let segments: Vec<&str> = field.split('.').collect();
        let mut expr = String::from("doc");
        for (i, seg) in segments.iter().enumerate() {
            let arrow = if i + 1 == segments.len() { "->>" } else { "->" };
            expr.push_str(arrow);
            expr.push('\'');
            expr.push_str(&seg.replace('\'', "''"));
            expr.push('\'');
        }
        columns.push(format!("{expr} AS \"{field}\""));
    }

    Ok(columns.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn clamp_limit_raises_below_floor_and_caps_above_ceiling() {
        assert_eq!(clamp_limit(1), MIN_LIMIT);
        assert_eq!(clamp_limit(10_000), MAX_LIMIT);
        assert_eq!(clamp_limit(42), 42);
    }

    #[test]
    fn single_comparison_compiles_to_one_predicate() {
        let expr = parse("message=hello").unwrap().unwrap();
        let (sql, params) = compile_where(&expr);
        assert_eq!(sql, "doc#>>$1 = $2");
        assert_eq!(params, vec!["{message}".to_string(), "hello".to_string()]);
    }

    #[test]
    fn dotted_path_becomes_pg_array_literal() {
        let expr = parse("_meta.host=web-1").unwrap().unwrap();
        let (_sql, params) = compile_where(&expr);
        assert_eq!(params[0], "{_meta,host}");
    }

    #[test]
    fn and_or_group_wraps_in_parens_and_positions_joins() {
        let expr = parse("a=1 && b=2 || c=3").unwrap().unwrap();
        let (sql, params) = compile_where(&expr);
        assert_eq!(
            sql,
            "((doc#>>$1 = $2 AND doc#>>$3 = $4) OR doc#>>$5 = $6)"
        );
        assert_eq!(
            params,
            vec!["{a}", "1", "{b}", "2", "{c}", "3"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn like_and_not_like_lower_with_wildcards() {
        let expr = parse("message~oops").unwrap().unwrap();
        let (sql, params) = compile_where(&expr);
        assert_eq!(sql, "doc#>>$1 LIKE $2");
        assert_eq!(params[1], "%oops%");

        let expr = parse("message!~oops").unwrap().unwrap();
        let (sql, params) = compile_where(&expr);
        assert_eq!(sql, "doc#>>$1 NOT LIKE $2");
        assert_eq!(params[1], "%oops%");
    }

    #[test]
    fn projection_always_includes_id_and_ts() {
        let sql = compile_projection(&[]).unwrap();
        assert_eq!(sql, "id, ts");
    }

    #[test]
    fn projection_chains_dotted_segments() {
        let sql = compile_projection(&["_meta.host".to_string()]).unwrap();
        assert_eq!(sql, "id, ts, doc->'_meta'->>'host' AS \"_meta.host\"");
    }

    #[test]
    fn projection_rejects_invalid_field() {
        let err = compile_projection(&["bad-field".to_string()]).unwrap_err();
        assert!(matches!(err, QueryError::InvalidField(_)));
    }

    #[test]
    fn validate_interval_accepts_every_documented_unit() {
        for unit in ["seconds", "minutes", "hours", "days"] {
            let input = format!("30 {unit}");
            assert_eq!(validate_interval(&input).unwrap(), input);
        }
    }

    #[test]
    fn validate_interval_rejects_malformed_input() {
        assert!(validate_interval("30").is_err());
        assert!(validate_interval("thirty days").is_err());
        assert!(validate_interval("30 fortnights").is_err());
        assert!(validate_interval("30 days; DROP TABLE docs").is_err());
        assert!(validate_interval("-5 days").is_err());
    }

    #[test]
    fn path_to_pg_array_rewrites_dots_to_commas() {
        assert_eq!(path_to_pg_array("_meta.host"), "{_meta,host}");
        assert_eq!(path_to_pg_array("level"), "{level}");
    }

    proptest::proptest! {
        #[test]
        fn compile_where_never_panics_on_parseable_input(
            input in "[a-zA-Z0-9_.=!<>~&|() \"]{0,40}"
        ) {
            if let Ok(Some(expr)) = parse(&input) {
                let _ = compile_where(&expr);
            }
        }
    }
}
