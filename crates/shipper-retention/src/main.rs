//! Retention worker: deletes documents past their configured retention
//! window, either once or in a looping daemon mode.

use std::time::Duration;

use anyhow::{Context, Result};
use shipper_config::RetentionConfig;
use shipper_db::PgPool;
use shipper_query::{path_to_pg_array, validate_interval};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg: RetentionConfig = shipper_config::load().context("loading retention config")?;
    init_tracing(cfg.debug);

    for rule in &cfg.cleanup {
        validate_interval(&rule.keep_for)
            .with_context(|| format!("cleanup rule for key `{}` has an invalid keep_for", rule.key))?;
    }
    if let Some(max_age) = cfg.max_age_for_all.as_deref() {
        validate_interval(max_age).context("max_age_for_all is invalid")?;
    }

    let pool = shipper_db::connect(&cfg.sql_connection_string, 1)
        .await
        .context("connecting to database")?;

    loop {
        run_pass(&pool, &cfg).await;

        if !cfg.run_as_daemon {
            break;
        }
        tracing::info!(minutes = cfg.daemon_run_interval, "sleeping until next pass");
        tokio::time::sleep(Duration::from_secs(cfg.daemon_run_interval * 60)).await;
    }

    tracing::info!("shutdown");
    Ok(())
}

async fn run_pass(pool: &PgPool, cfg: &RetentionConfig) {
    for rule in &cfg.cleanup {
        tracing::info!(key = %rule.key, value = %rule.value, keep_for = %rule.keep_for, "cleaning");
        let key = path_to_pg_array(&rule.key);
        match shipper_db::delete_where_key_value(pool, &key, &rule.value, &rule.keep_for).await {
            Ok(count) => tracing::info!(count, "cleaned"),
            Err(err) => tracing::error!(%err, "cleanup failed"),
        }
    }

    if cfg.enable_max_age_cleaning {
        let Some(max_age) = cfg.max_age_for_all.as_deref() else {
            tracing::warn!("enable_max_age_cleaning set but max_age_for_all missing, skipping");
            return;
        };
        tracing::info!(max_age_for_all = %max_age, "cleaning all");
        match shipper_db::delete_older_than(pool, max_age).await {
            Ok(count) => tracing::info!(count, "cleaned"),
            Err(err) => tracing::error!(%err, "blanket cleanup failed"),
        }
    } else {
        tracing::info!("max age cleaning disabled, skipping");
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
