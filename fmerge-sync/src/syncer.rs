//! The sync worker pool
//!
//! Drains the squashed operation set with bounded parallelism. Deletions
//! run locally; transfers send a `FileRequest` and park on a per-path
//! barrier until the dispatcher feeds the matching `FileTransfer` back in.
//! Failures are contained per file: the completion callback reports them
//! and the remaining workers keep going.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filetime::FileTime;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use fmerge_merge::{FileOperation, FileOperationKind, OperationQueue, SortedOperationSet};
use fmerge_net::Connection;
use fmerge_proto::{FileTransferPayload, Message};
use fmerge_tree::{file_stats, FileKind};

/// Number of concurrently running sync workers.
pub const MAX_SYNC_WORKERS: usize = 8;

/// Total time a worker waits for one file transfer.
pub const FILE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Polling granularity of the transfer wait, for progress logging.
pub const TRANSFER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Called once per processed path with the outcome.
pub type CompletionCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Executes one session's operation set against the local tree.
pub struct Syncer {
    queue: Mutex<OperationQueue>,
    base: PathBuf,
    conn: Arc<Connection>,
    barriers: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    completion: CompletionCallback,
    error_count: AtomicUsize,
    debug_protocol: bool,
}

impl Syncer {
    pub fn new(
        operations: SortedOperationSet,
        base: impl Into<PathBuf>,
        conn: Arc<Connection>,
        completion: CompletionCallback,
        debug_protocol: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(OperationQueue::new(operations)),
            base: base.into(),
            conn,
            barriers: Mutex::new(HashMap::new()),
            completion,
            error_count: AtomicUsize::new(0),
            debug_protocol,
        })
    }

    /// Run the worker pool until the queue is drained.
    pub async fn perform_sync(self: Arc<Self>) {
        let mut workers = Vec::with_capacity(MAX_SYNC_WORKERS);
        for tid in 0..MAX_SYNC_WORKERS {
            let syncer = Arc::clone(&self);
            workers.push(tokio::spawn(async move { syncer.worker_loop(tid).await }));
        }
        for worker in workers {
            if let Err(err) = worker.await {
                error!("Sync worker panicked: {}", err);
            }
        }

        let leftover = self.barriers.lock().expect("barrier registry poisoned").len();
        if leftover != 0 {
            error!(
                "{} transfer barriers left after sync, this is a bug",
                leftover
            );
        }
    }

    /// Number of paths that failed to sync.
    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::SeqCst)
    }

    async fn worker_loop(self: Arc<Self>, tid: usize) {
        loop {
            let entry = self.queue.lock().expect("operation queue poisoned").pop();
            let Some((path, operations)) = entry else {
                return;
            };
            debug!("[worker {}] Processing {}", tid, path);

            // All operations of a path must succeed for its merged history
            // to be committed; otherwise the next run re-detects and
            // retries.
            let successful = self.process_file(&operations).await;
            if !successful {
                error!("File {} is in a conflicted state", path);
                self.error_count.fetch_add(1, Ordering::SeqCst);
            }
            (self.completion)(&path, successful);
        }
    }

    async fn process_file(&self, operations: &[FileOperation]) -> bool {
        for op in operations {
            let ok = match op.kind {
                FileOperationKind::Delete => self.delete_local(&op.path),
                FileOperationKind::Transfer => self.request_transfer(&op.path).await,
                FileOperationKind::CreateFolder => self.create_folder(&op.path),
                FileOperationKind::PlaceholderRevert => {
                    error!(
                        "Placeholder revert for {} survived squashing, this is a bug",
                        op.path
                    );
                    false
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn delete_local(&self, path: &str) -> bool {
        let full = self.base.join(path);
        let Some(stats) = file_stats(&full) else {
            error!("Cannot delete {}: does not exist", full.display());
            return false;
        };
        let result = if stats.kind.is_dir() {
            std::fs::remove_dir(&full)
        } else {
            std::fs::remove_file(&full)
        };
        if let Err(err) = result {
            error!("Failed to delete {}: {}", full.display(), err);
            return false;
        }
        true
    }

    fn create_folder(&self, path: &str) -> bool {
        let full = self.base.join(path);
        if let Err(err) = std::fs::create_dir_all(&full) {
            error!("Failed to create directory {}: {}", full.display(), err);
            return false;
        }
        true
    }

    /// Request one file from the peer and wait for the transfer to be
    /// applied. The barrier is registered before the request goes out, so
    /// the response can never arrive unsignalable.
    async fn request_transfer(&self, path: &str) -> bool {
        let (tx, mut rx) = oneshot::channel();
        self.barriers
            .lock()
            .expect("barrier registry poisoned")
            .insert(path.to_string(), tx);

        debug!("Requesting file {}", path);
        if let Err(err) = self
            .conn
            .send_message(&Message::FileRequest(path.to_string()))
            .await
        {
            error!("Failed to request {}: {}", path, err);
            self.remove_barrier(path);
            return false;
        }

        let poll_secs = TRANSFER_POLL_INTERVAL.as_secs();
        let attempts = FILE_TRANSFER_TIMEOUT.as_secs() / poll_secs;
        for attempt in 1..=attempts {
            match tokio::time::timeout(TRANSFER_POLL_INTERVAL, &mut rx).await {
                Ok(Ok(success)) => return success,
                Ok(Err(_)) => {
                    error!("Transfer barrier for {} was dropped", path);
                    self.remove_barrier(path);
                    return false;
                }
                Err(_) => info!(
                    "Waited {}s/{}s for {}",
                    attempt * poll_secs,
                    FILE_TRANSFER_TIMEOUT.as_secs(),
                    path
                ),
            }
        }

        error!("File transfer timed out for {}", path);
        self.remove_barrier(path);
        false
    }

    fn remove_barrier(&self, path: &str) {
        self.barriers
            .lock()
            .expect("barrier registry poisoned")
            .remove(path);
    }

    /// Fail every transfer still parked on a barrier. Called when the
    /// connection dies so workers do not sit out their full timeout.
    pub fn abort_pending_transfers(&self) {
        let mut barriers = self.barriers.lock().expect("barrier registry poisoned");
        for (path, tx) in barriers.drain() {
            warn!("Abandoning pending transfer for {}", path);
            let _ = tx.send(false);
        }
    }

    /// Apply an incoming transfer and wake the worker waiting for it.
    pub async fn submit_file_transfer(&self, payload: &FileTransferPayload) {
        if self.debug_protocol {
            debug!("Received data for {}", payload.path);
        }
        let ok = apply_transfer(&self.base, payload).await;

        let barrier = self
            .barriers
            .lock()
            .expect("barrier registry poisoned")
            .remove(&payload.path);
        match barrier {
            Some(tx) => {
                let _ = tx.send(ok);
            }
            None => warn!("Unsolicited file transfer for {}", payload.path),
        }
    }
}

/// Materialize one transfer payload under `base` and restore its
/// timestamps. Returns false on any failure; the caller reports it.
pub async fn apply_transfer(base: &Path, payload: &FileTransferPayload) -> bool {
    let full = base.join(&payload.path);

    if payload.kind == FileKind::Unknown {
        error!("Peer could not provide {}", payload.path);
        return false;
    }

    // Transfers normally arrive children-last, but an out-of-order arrival
    // must not fail: create the parent chain on demand.
    if let Some(parent) = full.parent() {
        if file_stats(parent).is_none() {
            warn!(
                "Out of order file transfer, creating missing parent for {}",
                payload.path
            );
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                error!("Failed to create directory {}: {}", parent.display(), err);
                return false;
            }
        }
    }

    match payload.kind {
        FileKind::Directory => {
            if let Err(err) = tokio::fs::create_dir_all(&full).await {
                error!("Failed to create directory {}: {}", full.display(), err);
                return false;
            }
        }
        FileKind::File => {
            if let Err(err) = tokio::fs::write(&full, &payload.body).await {
                error!("Failed to write {}: {}", full.display(), err);
                return false;
            }
        }
        FileKind::Link => {
            let target = match std::str::from_utf8(&payload.body) {
                Ok(target) => target.to_string(),
                Err(_) => {
                    error!("Symlink target for {} is not valid UTF-8", payload.path);
                    return false;
                }
            };
            // Replace whatever sits at the link path.
            if file_stats(&full).is_some() {
                if let Err(err) = tokio::fs::remove_file(&full).await {
                    error!("Failed to unlink {}: {}", full.display(), err);
                    return false;
                }
            }
            if let Err(err) = tokio::fs::symlink(&target, &full).await {
                error!("Failed to create symlink {}: {}", full.display(), err);
                return false;
            }
        }
        FileKind::Unknown => unreachable!("rejected above"),
    }

    // Timestamps are applied to the entry itself, never to a link target.
    let atime = FileTime::from_unix_time(payload.atime, 0);
    let mtime = FileTime::from_unix_time(payload.mtime, 0);
    if let Err(err) = filetime::set_symlink_file_times(&full, atime, mtime) {
        if payload.kind.is_dir() {
            // Directory mtimes are noise to the diff; not worth failing.
            warn!("Failed to set times on {}: {}", full.display(), err);
        } else {
            error!("Failed to set times on {}: {}", full.display(), err);
            return false;
        }
    }
    true
}

/// Build the `FileTransfer` payload answering a request for `path`.
///
/// A path that cannot be served yields the `Unknown`-kind failure payload,
/// which the requesting side records as a failed operation.
pub async fn load_transfer_payload(base: &Path, path: &str) -> FileTransferPayload {
    let full = base.join(path);
    let Some(stats) = file_stats(&full) else {
        error!("Peer requested a file that does not exist: {}", path);
        return FileTransferPayload::missing(path);
    };

    let body = match stats.kind {
        FileKind::Directory => bytes::Bytes::new(),
        FileKind::File => match tokio::fs::read(&full).await {
            Ok(data) => bytes::Bytes::from(data),
            Err(err) => {
                error!("Failed to read data for {}: {}", path, err);
                return FileTransferPayload::missing(path);
            }
        },
        FileKind::Link => match tokio::fs::read_link(&full).await {
            Ok(target) => bytes::Bytes::from(target.to_string_lossy().into_owned().into_bytes()),
            Err(err) => {
                error!("Failed to read link target for {}: {}", path, err);
                return FileTransferPayload::missing(path);
            }
        },
        FileKind::Unknown => {
            error!("Cannot serve {}: unknown file type", path);
            return FileTransferPayload::missing(path);
        }
    };

    FileTransferPayload {
        path: path.to_string(),
        kind: stats.kind,
        mtime: stats.mtime,
        atime: stats.atime,
        body,
    }
}
