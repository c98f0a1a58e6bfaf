//! Sandboxed per-line transform host.
//!
//! Each tail worker owns one [`TransformHost`], built from the shipper's
//! configured script bodies and compiled once (lazily, on the worker's
//! first line — construction is the expensive part). `rhai` is used
//! instead of a JS engine: it's pure Rust, has no FFI boundary, and its
//! `Engine::set_max_operations`/`set_max_call_levels` caps bound a single
//! script's CPU and call-stack use without needing a separate sandboxing
//! layer.

use rhai::{Engine, Scope, AST};
use thiserror::Error;

const MAX_OPERATIONS: u64 = 500_000;
const MAX_CALL_LEVELS: usize = 32;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("script failed to compile: {0}")]
    Compile(String),
    #[error("required function `{0}` is not defined")]
    MissingFunction(&'static str),
    #[error("calling `{function}` failed: {source}")]
    Call {
        function: &'static str,
        source: String,
    },
}

/// A compiled transform script, ready to run per line.
pub struct TransformHost {
    engine: Engine,
    ast: AST,
    has_legacy_parser: bool,
}

impl TransformHost {
    /// Compile the shipper's configured script bodies. `transformer_src`
    /// must define `t(host, file, group, line) -> string`. `message_parser_src`,
    /// when present and non-blank, must define `m(line) -> string` — if it
    /// does, `m`'s output is threaded into `t` as `line` instead of the
    /// original text, matching the original two-script configuration shape.
    pub fn compile(
        transformer_src: &str,
        message_parser_src: Option<&str>,
    ) -> Result<Self, TransformError> {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);

        let mut combined = String::new();
        let parser_present = message_parser_src
            .map(|src| !src.trim().is_empty())
            .unwrap_or(false);
        if let Some(parser_src) = message_parser_src {
            if parser_present {
                combined.push_str(parser_src);
                combined.push('\n');
            }
        }
        combined.push_str(transformer_src);

        let ast = engine
            .compile(&combined)
            .map_err(|err| TransformError::Compile(err.to_string()))?;

        if !ast.iter_functions().any(|f| f.name == "t") {
            return Err(TransformError::MissingFunction("t"));
        }
        let has_legacy_parser =
            parser_present && ast.iter_functions().any(|f| f.name == "m");

        Ok(Self {
            engine,
            ast,
            has_legacy_parser,
        })
    }

    /// Run the configured script(s) against one raw line, returning the
    /// transformed document text.
    pub fn transform(
        &self,
        host: &str,
        file: &str,
        group: &str,
        line: &str,
    ) -> Result<String, TransformError> {
        let mut scope = Scope::new();

        let effective_line = if self.has_legacy_parser {
            self.engine
                .call_fn::<String>(&mut scope, &self.ast, "m", (line.to_string(),))
                .map_err(|err| TransformError::Call {
                    function: "m",
                    source: err.to_string(),
                })?
        } else {
            line.to_string()
        };

        self.engine
            .call_fn::<String>(
                &mut scope,
                &self.ast,
                "t",
                (
                    host.to_string(),
                    file.to_string(),
                    group.to_string(),
                    effective_line,
                ),
            )
            .map_err(|err| TransformError::Call {
                function: "t",
                source: err.to_string(),
            })
    }
}
