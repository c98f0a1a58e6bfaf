//! HTTP delivery client for the log shipper.
//!
//! A batch is never dropped: [`DeliveryClient::deliver`] retries on a
//! constant delay until the sink accepts it (any 2xx response), driven by
//! [`shipper_retry::RetryExecutor`] configured with
//! [`shipper_retry::RetryPolicy::Forever`]. The call is blocking —
//! the batcher task runs it inside `tokio::task::spawn_blocking`.

use std::time::Duration;

use reqwest::blocking::Client;
use shipper_retry::{RetryExecutor, RetryPolicy};
use shipper_types::Envelope;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const LOGS_PATH: &str = "/v1/effie/logs";

/// A client that delivers batches of [`Envelope`]s to the ingestion sink.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    target: String,
    client: Client,
    retry: RetryExecutor,
}

impl DeliveryClient {
    /// `target` is the sink's base URL; batches are POSTed to
    /// `{target}/v1/effie/logs`.
    pub fn new(target: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            target: target.into(),
            client,
            retry: RetryExecutor::from_policy(RetryPolicy::Forever),
        }
    }

    /// Blocking. Retries every 5 seconds on any transport error or non-2xx
    /// response until the sink accepts the batch. Never returns `Err` —
    /// a batch that can't be delivered today is still owed tomorrow.
    pub fn deliver(&self, batch: &[Envelope]) {
        if batch.is_empty() {
            return;
        }

        let url = format!("{}{}", self.target.trim_end_matches('/'), LOGS_PATH);
        let body = match serde_json::to_vec(batch) {
            Ok(body) => body,
            Err(err) => {
                // Not retryable: the batch itself can't be serialized.
                tracing::error!(error = %err, "batch failed to serialize, dropping");
                return;
            }
        };

        let result = self.retry.run(|attempt| {
            let response = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send();

            match response {
                Ok(resp) if resp.status().is_success() => Ok(()),
                Ok(resp) => {
                    tracing::warn!(attempt, status = %resp.status(), url = %url, "delivery rejected, retrying");
                    Err(())
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, url = %url, "delivery failed, retrying");
                    Err(())
                }
            }
        });

        // RetryPolicy::Forever has max_attempts = u32::MAX; in practice this
        // never returns Err, but the executor's signature requires handling it.
        if result.is_err() {
            tracing::error!(url = %url, "exhausted delivery retries (unreachable under Forever policy)");
        }
    }
}
