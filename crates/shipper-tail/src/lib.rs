//! File tailing workers and the discovery loop that starts them.
//!
//! One [`spawn_tail_worker`] task per followed file (component C), driven
//! by [`run_discovery_loop`] (component D), which expands each configured
//! glob pattern on a fixed interval and starts a worker for every new
//! match. Both share state only through [`shipper_registry::TailRegistry`].

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use shipper_checkpoint::CheckpointStore;
use shipper_registry::{TailHandle, TailRegistry};
use shipper_transform::TransformHost;
use shipper_types::Document;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long a worker sleeps between polls once it has hit EOF.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TailError {
    #[error("opening {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("compiling transform script: {0}")]
    Transform(#[from] shipper_transform::TransformError),
}

/// Everything one tail worker needs that isn't already on its [`TailHandle`].
pub struct WorkerSpec {
    pub path: PathBuf,
    pub group: String,
    pub host: String,
    pub transformer_src: String,
    pub message_parser_src: Option<String>,
}

/// Spawn a blocking tail worker for `spec`, publishing transformed
/// documents to `sender` and tracking offset/cancellation through `handle`.
pub fn spawn_tail_worker(
    spec: WorkerSpec,
    handle: TailHandle,
    sender: mpsc::Sender<Document>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        if let Err(err) = run_tail_worker(&spec, &handle, &sender) {
            tracing::error!(path = %spec.path.display(), error = %err, "tail worker exiting");
        }
    })
}

fn run_tail_worker(
    spec: &WorkerSpec,
    handle: &TailHandle,
    sender: &mpsc::Sender<Document>,
) -> Result<(), TailError> {
    let mut transform: Option<TransformHost> = None;
    let mut file = open_at(&spec.path, handle.current_offset())?;
    let mut current_ino = inode_of(&spec.path);
    let mut reader = BufReader::new(file);

    loop {
        if handle.is_cancelled() {
            return Ok(());
        }

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                // EOF: check for rotation before sleeping.
                let new_ino = inode_of(&spec.path);
                if new_ino.is_some() && new_ino != current_ino {
                    tracing::info!(path = %spec.path.display(), "file rotated, reopening from offset 0");
                    file = open_at(&spec.path, 0)?;
                    current_ino = new_ino;
                    reader = BufReader::new(file);
                    handle.offset.store(0, Ordering::Release);
                    continue;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Ok(bytes_read) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if !trimmed.is_empty() {
                    if transform.is_none() {
                        let host = TransformHost::compile(
                            &spec.transformer_src,
                            spec.message_parser_src.as_deref(),
                        )?;
                        transform = Some(host);
                    }
                    let host_transform = transform.as_ref().expect("just compiled above");

                    match host_transform.transform(
                        &spec.host,
                        &spec.path.to_string_lossy(),
                        &spec.group,
                        trimmed,
                    ) {
                        Ok(doc) => {
                            let document = Document::new(Local::now(), doc);
                            if sender.blocking_send(document).is_err() {
                                return Ok(());
                            }
                        }
                        Err(err) => {
                            tracing::error!(path = %spec.path.display(), error = %err, "transform failed, dropping line");
                        }
                    }
                }

                let new_offset = handle.current_offset() + bytes_read as u64;
                handle.offset.store(new_offset, Ordering::Release);
            }
            Err(err) => {
                tracing::error!(path = %spec.path.display(), error = %err, "read error, stopping worker");
                return Ok(());
            }
        }
    }
}

fn open_at(path: &Path, offset: u64) -> Result<File, TailError> {
    let mut file = File::open(path).map_err(|source| TailError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if offset > 0 {
        let _ = file.seek(SeekFrom::Start(offset));
    }
    Ok(file)
}

#[cfg(unix)]
fn inode_of(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|meta| meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_path: &Path) -> Option<u64> {
    None
}

/// One glob pattern paired with the group label passed through to the
/// transform host.
#[derive(Debug, Clone)]
pub struct DiscoveryInput {
    pub group: String,
    pub pattern: String,
}

/// Run the discovery loop until `shutdown` is cancelled. On its first
/// tick, offsets are seeded from `checkpoint`; every tick after that
/// starts new files at offset 0.
pub async fn run_discovery_loop(
    registry: Arc<TailRegistry>,
    inputs: Vec<DiscoveryInput>,
    scan_frequency: Duration,
    checkpoint: Arc<CheckpointStore>,
    host: String,
    transformer_src: String,
    message_parser_src: Option<String>,
    sender: mpsc::Sender<Document>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(scan_frequency);
    let mut bootstrap = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        sweep_registry(&registry);

        let bootstrap_offsets = if bootstrap {
            checkpoint.load().unwrap_or_default()
        } else {
            Default::default()
        };

        for input in &inputs {
            let paths = match glob::glob(&input.pattern) {
                Ok(paths) => paths,
                Err(err) => {
                    tracing::error!(pattern = %input.pattern, error = %err, "invalid glob pattern");
                    continue;
                }
            };

            for entry in paths {
                let path = match entry {
                    Ok(path) => path,
                    Err(err) => {
                        tracing::warn!(error = %err, "glob entry error");
                        continue;
                    }
                };

                if registry.contains(&path) {
                    continue;
                }

                let offset = bootstrap_offsets
                    .get(&path.to_string_lossy().to_string())
                    .copied()
                    .unwrap_or(0);

                tracing::debug!(path = %path.display(), group = %input.group, offset, "starting tail worker");
                let handle = registry.insert(path.clone(), offset);

                let spec = WorkerSpec {
                    path,
                    group: input.group.clone(),
                    host: host.clone(),
                    transformer_src: transformer_src.clone(),
                    message_parser_src: message_parser_src.clone(),
                };
                spawn_tail_worker(spec, handle, sender.clone());
            }
        }

        bootstrap = false;
    }
}

/// Stop and remove any registered path that no longer exists on disk.
fn sweep_registry(registry: &TailRegistry) {
    for (path, handle) in registry.snapshot() {
        if std::fs::metadata(&path).is_err() {
            tracing::debug!(path = %path.display(), "tailed file vanished, removing");
            handle.cancel();
            registry.remove(&path);
        }
    }
}
