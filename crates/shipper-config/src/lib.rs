//! YAML configuration loading for the log shipper's four services.
//!
//! Each binary (`shipper-ship`, `shipper-ingest`, `shipper-search`,
//! `shipper-retention`) has its own small config struct rather than sharing
//! one monolithic config — following each service's own `config.yaml`
//! loaded from the current directory. [`config_path`] resolves the file
//! location (`$CONFIG`, defaulting to `./config.yaml`); [`load`] reads and
//! parses it into any config type.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default configuration file name, relative to the process's working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Resolve the config file path: `$CONFIG` if set, else `./config.yaml`.
pub fn config_path() -> PathBuf {
    env::var_os("CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Read and parse a YAML config file at the resolved path.
pub fn load<T: for<'de> Deserialize<'de>>() -> Result<T> {
    load_from(&config_path())
}

/// Read and parse a YAML config file at an explicit path. Exposed mainly
/// for tests; services should prefer [`load`].
pub fn load_from<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))
}

/// One glob pattern the shipper tails, tagged with a group label that is
/// passed through to the transform host.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Input {
    pub group: String,
    pub pattern: String,
}

/// Configuration for the `shipper-ship` binary. Field names mirror the
/// original's YAML keys verbatim (`Debug`, `Target`, `MaxBatch`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShipConfig {
    #[serde(default)]
    pub debug: bool,
    /// Base URL of the ingestion sink; batches are POSTed to `{target}/v1/effie/logs`.
    pub target: String,
    pub max_batch: usize,
    /// Flush interval, in seconds.
    pub max_delay: u64,
    pub progress_file: PathBuf,
    /// Script source defining `t(host, file, group, line) -> string`.
    #[serde(rename = "JSTransformer")]
    pub js_transformer: String,
    /// Optional legacy preprocessor script, applied before `js_transformer`.
    #[serde(rename = "JSMessageParser", default)]
    pub js_message_parser: Option<String>,
    /// Discovery interval, in seconds.
    pub scan_frequency: u64,
    pub input: Vec<Input>,
}

/// Configuration for the `shipper-ingest` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestConfig {
    #[serde(default)]
    pub debug: bool,
    pub port: u16,
    pub sql_connection_string: String,
    #[serde(default = "default_sql_max_connections")]
    pub sql_max_connections: u32,
}

/// Configuration for the `shipper-search` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchConfig {
    #[serde(default)]
    pub debug: bool,
    pub port: u16,
    pub sql_connection_string: String,
    #[serde(default = "default_sql_max_connections")]
    pub sql_max_connections: u32,
}

fn default_sql_max_connections() -> u32 {
    5
}

/// One retention rule: delete documents where `doc.<key> == value` and older than `keep_for`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CleanupRule {
    pub key: String,
    pub value: String,
    /// A Postgres `INTERVAL` literal, e.g. `"30 days"`.
    pub keep_for: String,
}

/// Configuration for the `shipper-retention` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetentionConfig {
    #[serde(default)]
    pub debug: bool,
    pub sql_connection_string: String,
    #[serde(default)]
    pub run_as_daemon: bool,
    /// Sleep interval between daemon passes, in minutes.
    #[serde(default)]
    pub daemon_run_interval: u64,
    #[serde(default)]
    pub enable_max_age_cleaning: bool,
    /// A Postgres `INTERVAL` literal applied to every row regardless of key, when enabled.
    #[serde(default)]
    pub max_age_for_all: Option<String>,
    #[serde(default)]
    pub cleanup: Vec<CleanupRule>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn load_from_parses_ship_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
Debug: true
Target: "http://localhost:9000"
MaxBatch: 500
MaxDelay: 5
ProgressFile: "/tmp/progress.json"
JSTransformer: "function t(host, file, group, line) { return line; }"
ScanFrequency: 10
Input:
  - Group: app
    Pattern: "/var/log/app/*.log"
"#
        )
        .unwrap();

        let cfg: ShipConfig = load_from(file.path()).unwrap();
        assert!(cfg.debug);
        assert_eq!(cfg.target, "http://localhost:9000");
        assert_eq!(cfg.max_batch, 500);
        assert_eq!(cfg.input.len(), 1);
        assert_eq!(cfg.input[0].group, "app");
        assert!(cfg.js_message_parser.is_none());
    }

    #[test]
    fn load_from_parses_retention_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
SqlConnectionString: "postgres://localhost/docs"
Cleanup:
  - Key: "_meta.host"
    Value: "noisy-host"
    KeepFor: "7 days"
"#
        )
        .unwrap();

        let cfg: RetentionConfig = load_from(file.path()).unwrap();
        assert!(!cfg.run_as_daemon);
        assert!(!cfg.enable_max_age_cleaning);
        assert_eq!(cfg.cleanup.len(), 1);
        assert_eq!(cfg.cleanup[0].keep_for, "7 days");
    }

    #[test]
    fn load_from_honors_js_message_parser_rename() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
Debug: false
Target: "http://localhost:9000"
MaxBatch: 10
MaxDelay: 1
ProgressFile: "/tmp/progress.json"
JSTransformer: "function t(host, file, group, line) { return line; }"
JSMessageParser: "function m(line) { return line; }"
ScanFrequency: 10
Input: []
"#
        )
        .unwrap();

        let cfg: ShipConfig = load_from(file.path()).unwrap();
        assert_eq!(
            cfg.js_message_parser.as_deref(),
            Some("function m(line) { return line; }")
        );
    }

    #[test]
    fn load_from_parses_ingest_config_with_pascal_case_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
Port: 8080
SqlConnectionString: "postgres://localhost/docs"
"#
        )
        .unwrap();

        let cfg: IngestConfig = load_from(file.path()).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.sql_connection_string, "postgres://localhost/docs");
        assert_eq!(cfg.sql_max_connections, 5);
    }

    #[test]
    fn load_from_missing_file_errors_with_context() {
        let err = load_from::<ShipConfig>(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(err.to_string().contains("reading config file"));
    }

    #[test]
    #[serial]
    fn config_path_honors_env_override() {
        temp_env::with_var("CONFIG", Some("/tmp/custom-config.yaml"), || {
            assert_eq!(config_path(), PathBuf::from("/tmp/custom-config.yaml"));
        });
    }

    #[test]
    #[serial]
    fn config_path_defaults_when_unset() {
        temp_env::with_var_unset("CONFIG", || {
            assert_eq!(config_path(), PathBuf::from(DEFAULT_CONFIG_FILE));
        });
    }
}
