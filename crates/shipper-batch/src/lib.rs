//! Batching and flush-on-timer delivery.
//!
//! A single task owns the ingress channel and is the sole writer of the
//! checkpoint file (per spec, single-writer by construction). It grows a
//! buffer up to `max_batch` documents, delivering and checkpointing
//! whichever trigger fires first: the buffer filling up, or the flush
//! timer ticking with anything in the buffer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use shipper_checkpoint::CheckpointStore;
use shipper_delivery::DeliveryClient;
use shipper_registry::TailRegistry;
use shipper_types::Document;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Run the batcher until the channel closes or `shutdown` is cancelled,
/// flushing whatever remains buffered before returning.
pub async fn run_batcher(
    mut receiver: mpsc::Receiver<Document>,
    max_batch: usize,
    max_delay: Duration,
    delivery: Arc<DeliveryClient>,
    checkpoint: Arc<CheckpointStore>,
    registry: Arc<TailRegistry>,
    shutdown: CancellationToken,
) {
    let mut buf: Vec<Document> = Vec::with_capacity(max_batch);
    let mut ticker = tokio::time::interval(max_delay);
    ticker.tick().await; // interval's first tick fires immediately; discard it

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                flush(&mut buf, &delivery, &checkpoint, &registry).await;
                return;
            }
            received = receiver.recv() => {
                match received {
                    Some(doc) => {
                        buf.push(doc);
                        if buf.len() >= max_batch {
                            flush(&mut buf, &delivery, &checkpoint, &registry).await;
                        }
                    }
                    None => {
                        flush(&mut buf, &delivery, &checkpoint, &registry).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buf.is_empty() {
                    flush(&mut buf, &delivery, &checkpoint, &registry).await;
                }
            }
        }
    }
}

async fn flush(
    buf: &mut Vec<Document>,
    delivery: &Arc<DeliveryClient>,
    checkpoint: &Arc<CheckpointStore>,
    registry: &Arc<TailRegistry>,
) {
    if buf.is_empty() {
        return;
    }

    let batch = std::mem::take(buf);
    let count = batch.len();
    let envelopes: Vec<_> = batch.into_iter().map(Document::into_envelope).collect();

    let delivery = delivery.clone();
    tokio::task::spawn_blocking(move || delivery.deliver(&envelopes))
        .await
        .expect("delivery task panicked");

    save_checkpoint(checkpoint, registry).await;
    tracing::info!(count, "flushed batch");
}

async fn save_checkpoint(checkpoint: &Arc<CheckpointStore>, registry: &Arc<TailRegistry>) {
    let offsets: BTreeMap<String, u64> = registry
        .snapshot()
        .into_iter()
        .map(|(path, handle)| (path.to_string_lossy().into_owned(), handle.current_offset()))
        .collect();

    let checkpoint = checkpoint.clone();
    let result = tokio::task::spawn_blocking(move || checkpoint.save(&offsets))
        .await
        .expect("checkpoint task panicked");

    if let Err(err) = result {
        tracing::error!(error = %err, "failed to save checkpoint");
    }
}
