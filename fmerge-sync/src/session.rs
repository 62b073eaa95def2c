//! The session state machine
//!
//! One driver task observes the current state, performs that state's
//! action, then waits for the next transition. Transitions come from the
//! driver itself or from message handlers running on the dispatch pool;
//! they flow through a watch channel so the driver never busy-polls.
//!
//! Lifecycle: `AwaitingVersion → SendTree → ResolvingConflicts →
//! SyncUserWait → SyncingFiles → Finished → Exiting`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fmerge_merge::{
    construct_operation_set, merge_change_sets, recombine_changes_by_file, sort_changes_by_file,
    squash_operations, translate_peer_resolutions, ConflictResolutionSet, SortedChangeSet,
    SortedOperationSet,
};
use fmerge_net::{Connection, MessageHandler};
use fmerge_proto::{FileTransferPayload, Message};
use fmerge_tree::{read_changelog, write_changelog, Change};

use crate::errors::{Result, SyncError};
use crate::resolver::ask_for_resolutions;
use crate::state::SessionState::{self, *};
use crate::syncer::{load_transfer_payload, CompletionCallback, Syncer};
use crate::ui::{PromptOutcome, UserInterface};
use crate::version::{check_peer_version, VersionCheck};

/// Immutable per-session configuration, captured at session start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The local sync root.
    pub root: PathBuf,
    /// Persistent instance id, exchanged in the version handshake.
    pub uuid: String,
    /// Our version string, `MAJOR.MINOR~` or `dev~<hash>`.
    pub version: String,
    /// Prompt before starting to modify the local tree.
    pub ask_confirmation: bool,
    /// Log every protocol message with its direction.
    pub debug_protocol: bool,
}

/// What the session accomplished, for the caller's exit-code policy.
#[derive(Debug, Clone, Copy)]
pub struct SyncReport {
    /// Number of paths that failed to sync. Zero means full success.
    pub error_count: usize,
}

#[derive(Default)]
struct SharedState {
    /// The peer's full change log, once received.
    peer_changes: Option<Vec<Change>>,
    /// Our own history; per-path entries are replaced with the merged
    /// history as operations complete, so persisting it records only what
    /// was actually applied.
    local_changes: SortedChangeSet,
    /// Active conflict resolutions, local or received from the peer.
    resolutions: ConflictResolutionSet,
    /// The merged target history.
    pending_changes: SortedChangeSet,
    /// The squashed operation set still to execute.
    pending_operations: SortedOperationSet,
}

/// One synchronization session with a connected peer.
pub struct SyncSession {
    config: SessionConfig,
    conn: Arc<Connection>,
    ui: Arc<dyn UserInterface>,
    state: watch::Sender<SessionState>,
    shared: Arc<Mutex<SharedState>>,
    syncer: Mutex<Option<Arc<Syncer>>>,
    peer_finished: AtomicBool,
    /// True while a version-mismatch prompt is on screen. The peer's
    /// version-ack must only cancel that prompt; an unconditional cancel
    /// would park a stale permit that eats the next unrelated prompt.
    version_prompt_active: AtomicBool,
    log_dirty: AtomicBool,
    error_count: AtomicUsize,
    fatal: Mutex<Option<SyncError>>,
}

impl SyncSession {
    pub fn new(
        config: SessionConfig,
        conn: Arc<Connection>,
        ui: Arc<dyn UserInterface>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            conn,
            ui,
            state: watch::Sender::new(AwaitingVersion),
            shared: Arc::new(Mutex::new(SharedState::default())),
            syncer: Mutex::new(None),
            peer_finished: AtomicBool::new(false),
            version_prompt_active: AtomicBool::new(false),
            log_dirty: AtomicBool::new(false),
            error_count: AtomicUsize::new(0),
            fatal: Mutex::new(None),
        })
    }

    pub fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Drive the session to completion.
    pub async fn run(self: Arc<Self>) -> Result<SyncReport> {
        self.conn.start(Arc::clone(&self) as Arc<dyn MessageHandler>);

        let mut state_rx = self.state.subscribe();
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                AwaitingVersion => {
                    info!("Checking version");
                    self.send_version().await?;
                }
                SendTree => {}
                ResolvingConflicts => self.run_merge().await?,
                SyncUserWait => {
                    if self.config.ask_confirmation {
                        self.confirm_sync().await?;
                    } else {
                        self.proceed_to_sync().await?;
                    }
                }
                SyncingFiles => self.run_sync().await?,
                Finished => info!("Waiting for peer to complete"),
                Exiting => return self.finish().await,
            }
            if state_rx.wait_for(|s| *s != state).await.is_err() {
                return Err(SyncError::Internal("state channel closed".to_string()));
            }
        }
    }

    fn set_state(&self, new: SessionState) {
        self.state.send_if_modified(|current| {
            // Exiting is terminal; late handler transitions must not undo it.
            if *current == new || *current == Exiting {
                return false;
            }
            debug!("Session state {} -> {}", current, new);
            *current = new;
            true
        });
    }

    async fn send_version(&self) -> Result<()> {
        let payload = format!("{};{}", self.config.version, self.config.uuid);
        self.conn.send_message(&Message::Version(payload)).await?;
        Ok(())
    }

    /// Merge both histories, prompting for conflict resolutions until the
    /// merge succeeds, then stage the resulting operation set.
    async fn run_merge(&self) -> Result<()> {
        let local_history = sort_changes_by_file(read_changelog(&self.config.root)?);
        {
            let mut shared = self.shared.lock().expect("session state poisoned");
            shared.local_changes = local_history;
        }

        loop {
            let (local, peer, resolutions) = {
                let shared = self.shared.lock().expect("session state poisoned");
                (
                    shared.local_changes.clone(),
                    sort_changes_by_file(shared.peer_changes.clone().unwrap_or_default()),
                    shared.resolutions.clone(),
                )
            };

            self.ui.start_progress("Merging");
            let (merged, conflicts) = merge_change_sets(&local, &peer, &resolutions);
            self.ui.complete_progress();
            if conflicts.is_empty() {
                let operations = squash_operations(&construct_operation_set(&local, &merged));
                info!("{} pending operations", operations.len());
                for (path, chain) in &operations {
                    for op in chain {
                        debug!("    {:<48} {}", path, op.kind);
                    }
                }
                {
                    let mut shared = self.shared.lock().expect("session state poisoned");
                    shared.pending_changes = merged;
                    shared.pending_operations = operations;
                }
                self.set_state(SyncUserWait);
                return Ok(());
            }

            warn!("Merge conflicts occurred for {} paths", conflicts.len());
            match ask_for_resolutions(&self.ui, &conflicts, &local, &peer).await {
                Some(user_resolutions) if !user_resolutions.is_empty() => {
                    {
                        let mut shared = self.shared.lock().expect("session state poisoned");
                        shared.resolutions = user_resolutions.clone();
                    }
                    // Mirror our decisions to the peer, with sides swapped.
                    self.conn
                        .send_message(&Message::ConflictResolutions(translate_peer_resolutions(
                            &user_resolutions,
                        )))
                        .await?;
                }
                _ => {
                    // The peer resolved first and cancelled our prompt; its
                    // resolutions are already stored. Retry with those.
                    debug!("Local conflict prompt cancelled");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn confirm_sync(&self) -> Result<()> {
        loop {
            match self
                .ui
                .prompt_choice("Start synchronization? (y/n)", &['y', 'n'])
                .await
            {
                PromptOutcome::Choice('y') => return self.proceed_to_sync().await,
                PromptOutcome::Choice(_) => {
                    info!("Synchronization declined");
                    self.set_state(Exiting);
                    return Ok(());
                }
                PromptOutcome::Cancelled => {
                    // Either the peer forced the transition or this was a
                    // stale cancellation; only re-prompt in the latter case.
                    if self.current_state() != SyncUserWait {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn proceed_to_sync(&self) -> Result<()> {
        if let Err(err) = self
            .conn
            .send_message(&Message::ExitingState(SyncUserWait.to_wire()))
            .await
        {
            // A close in this state is the peer declining; the disconnect
            // handler performs the transition.
            warn!("Could not announce sync start: {}", err);
            return Ok(());
        }
        self.set_state(SyncingFiles);
        Ok(())
    }

    /// Execute the staged operation set with the worker pool.
    async fn run_sync(&self) -> Result<()> {
        info!("Performing file sync. This may take a while...");
        let (operations, pending_changes) = {
            let shared = self.shared.lock().expect("session state poisoned");
            (
                shared.pending_operations.clone(),
                shared.pending_changes.clone(),
            )
        };

        let total = operations.len().max(1);
        self.ui.start_progress("Syncing");

        let shared = Arc::clone(&self.shared);
        let ui = Arc::clone(&self.ui);
        let progress = AtomicUsize::new(0);
        let completion: CompletionCallback = Arc::new(move |path, success| {
            if success {
                // Commit the merged history for this path; failed paths
                // keep their old history so the next run retries them.
                if let Some(history) = pending_changes.get(path) {
                    shared
                        .lock()
                        .expect("session state poisoned")
                        .local_changes
                        .insert(path.to_string(), history.clone());
                }
            }
            let done = progress.fetch_add(1, Ordering::SeqCst) + 1;
            ui.update_progress(done as f64 / total as f64);
        });

        let syncer = Syncer::new(
            operations,
            &self.config.root,
            Arc::clone(&self.conn),
            completion,
            self.config.debug_protocol,
        );
        *self.syncer.lock().expect("syncer slot poisoned") = Some(Arc::clone(&syncer));
        Arc::clone(&syncer).perform_sync().await;
        self.ui.complete_progress();
        self.log_dirty.store(true, Ordering::SeqCst);

        let errors = syncer.error_count();
        if errors > 0 {
            error!("{} errors encountered while syncing", errors);
            self.error_count.fetch_add(errors, Ordering::SeqCst);
        }

        if self.peer_finished.load(Ordering::SeqCst) {
            self.set_state(Exiting);
        } else {
            self.set_state(Finished);
            // The peer's completion notice may have landed between the
            // check and the transition.
            if self.peer_finished.load(Ordering::SeqCst) {
                self.set_state(Exiting);
            }
        }
        // Even if the notice cannot be delivered, the local results must
        // still be persisted at Exiting.
        if let Err(err) = self
            .conn
            .send_message(&Message::ExitingState(SyncingFiles.to_wire()))
            .await
        {
            error!("Failed to send completion notice: {}", err);
        }
        Ok(())
    }

    /// Persist the merged log and tear the connection down.
    async fn finish(&self) -> Result<SyncReport> {
        if self.log_dirty.load(Ordering::SeqCst) {
            let history = {
                let shared = self.shared.lock().expect("session state poisoned");
                recombine_changes_by_file(shared.local_changes.clone())
            };
            write_changelog(&self.config.root, &history)?;
            info!("Saved changes to disk");
        }
        self.conn.shutdown().await;

        if let Some(err) = self.fatal.lock().expect("fatal slot poisoned").take() {
            return Err(err);
        }
        Ok(SyncReport {
            error_count: self.error_count.load(Ordering::SeqCst),
        })
    }

    async fn handle_version_message(&self, payload: &str) {
        let mut parts = payload.splitn(2, ';');
        let peer_version = parts.next().unwrap_or("");
        let peer_uuid = parts.next().unwrap_or("");
        debug!("Peer is {} ({})", peer_version, peer_uuid);

        match check_peer_version(&self.config.version, peer_version) {
            VersionCheck::Match => {}
            VersionCheck::MinorMismatch { local, remote } => {
                warn!(
                    "Peer runs a different minor version (local {}, peer {})",
                    local, remote
                );
            }
            VersionCheck::Mismatch { reason } => {
                warn!("Version mismatch: {}", reason);
                self.ui.log(&format!("Version mismatch: {}", reason));
                self.ui.log(&format!(" Peer : {}", peer_version));
                self.ui.log(&format!(" Local: {}", self.config.version));
                self.version_prompt_active.store(true, Ordering::SeqCst);
                let outcome = self
                    .ui
                    .prompt_choice("Continue despite version mismatch? (y/n)", &['y', 'n'])
                    .await;
                self.version_prompt_active.store(false, Ordering::SeqCst);
                if outcome == PromptOutcome::Choice('n') {
                    self.set_state(Exiting);
                    return;
                }
                // 'y', or cancelled because the peer accepted first.
            }
        }

        self.set_state(SendTree);
        if let Err(err) = self
            .conn
            .send_message(&Message::ExitingState(AwaitingVersion.to_wire()))
            .await
        {
            error!("Failed to acknowledge version: {}", err);
        }
    }

    fn handle_changes_message(&self, changes: Vec<Change>) {
        if self.current_state() != SendTree {
            warn!("Received unexpected changes message from peer");
            return;
        }
        info!("Received {} changes from peer", changes.len());
        self.shared
            .lock()
            .expect("session state poisoned")
            .peer_changes = Some(changes);
        self.set_state(ResolvingConflicts);
    }

    async fn handle_file_request(&self, path: &str) {
        debug!("Peer requested file {}", path);
        let payload = load_transfer_payload(&self.config.root, path).await;
        if let Err(err) = self
            .conn
            .send_message(&Message::FileTransfer(payload))
            .await
        {
            error!("Failed to answer file request for {}: {}", path, err);
        }
    }

    async fn handle_file_transfer(&self, payload: FileTransferPayload) {
        if self.current_state() != SyncingFiles {
            error!(
                "File transfer for {} before the sync started",
                payload.path
            );
            return;
        }
        let syncer = self.syncer.lock().expect("syncer slot poisoned").clone();
        match syncer {
            Some(syncer) => syncer.submit_file_transfer(&payload).await,
            None => error!("File transfer arrived with no active syncer"),
        }
    }

    async fn handle_exiting_state(&self, raw: i32) {
        match SessionState::from_wire(raw) {
            Some(AwaitingVersion) => {
                // The peer accepted our version, possibly while we were
                // still prompting about theirs. Cancel only a prompt that
                // is actually pending.
                if self.version_prompt_active.load(Ordering::SeqCst) {
                    self.ui.cancel_prompt();
                }
                info!("Sending file tree");
                let changes = match read_changelog(&self.config.root) {
                    Ok(changes) => changes,
                    Err(err) => {
                        error!("Failed to read change log: {}", err);
                        return;
                    }
                };
                if let Err(err) = self.conn.send_message(&Message::Changes(changes)).await {
                    error!("Failed to send change log: {}", err);
                }
            }
            Some(SyncUserWait) => {
                self.ui.cancel_prompt();
                info!("Continuing (triggered by peer)...");
                self.set_state(SyncingFiles);
            }
            Some(SyncingFiles) => {
                self.peer_finished.store(true, Ordering::SeqCst);
                if self.current_state() == Finished {
                    self.set_state(Exiting);
                }
            }
            other => warn!("Received unexpected exit-state notice: {:?}", other),
        }
    }

    fn handle_resolutions(&self, resolutions: ConflictResolutionSet) {
        info!("Received conflict resolutions from peer:");
        for (path, resolution) in &resolutions {
            info!("    {}: {}", path, resolution);
        }
        self.shared
            .lock()
            .expect("session state poisoned")
            .resolutions = resolutions;
        // Stop asking locally; the peer resolved first.
        self.ui.cancel_prompt();
    }
}

#[async_trait]
impl MessageHandler for SyncSession {
    async fn handle_message(&self, message: Message) {
        match message {
            Message::Ignore => {}
            Message::Version(payload) => self.handle_version_message(&payload).await,
            Message::Changes(changes) => self.handle_changes_message(changes),
            Message::FileRequest(path) => self.handle_file_request(&path).await,
            Message::FileTransfer(payload) => self.handle_file_transfer(payload).await,
            Message::ExitingState(raw) => self.handle_exiting_state(raw).await,
            Message::ConflictResolutions(resolutions) => self.handle_resolutions(resolutions),
        }
    }

    async fn handle_disconnect(&self) {
        match self.current_state() {
            SyncUserWait => {
                // The peer declining the confirmation shows up as a close.
                info!("Operation cancelled by peer");
                self.ui.cancel_prompt();
                self.set_state(Exiting);
            }
            Finished => {
                // Tolerated after our own sync completed.
                debug!("Peer disconnected after completing its sync");
                self.set_state(Exiting);
            }
            Exiting => {}
            other => {
                error!("Peer disconnected unexpectedly in state {}", other);
                *self.fatal.lock().expect("fatal slot poisoned") =
                    Some(SyncError::UnexpectedDisconnect {
                        state: other.to_string(),
                    });
                // Unblock workers waiting on transfers that can never
                // arrive anymore.
                if let Some(syncer) = self.syncer.lock().expect("syncer slot poisoned").as_ref() {
                    syncer.abort_pending_transfers();
                }
                self.set_state(Exiting);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::HeadlessUi;
    use fmerge_net::{accept_peer, bind_listener};
    use tempfile::tempdir;
    use tokio::net::TcpStream;

    async fn session_pair(
        root_a: &std::path::Path,
        root_b: &std::path::Path,
    ) -> (Arc<SyncSession>, Arc<SyncSession>) {
        let listener = bind_listener(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move { accept_peer(&listener).await.unwrap().0 });
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let server = accept.await.unwrap();

        let config = |root: &std::path::Path, uuid: &str| SessionConfig {
            root: root.to_path_buf(),
            uuid: uuid.to_string(),
            version: "0.6~".to_string(),
            ask_confirmation: false,
            debug_protocol: false,
        };

        let a = SyncSession::new(
            config(root_a, "aaaa"),
            Connection::new(client, false),
            Arc::new(HeadlessUi::new()),
        );
        let b = SyncSession::new(
            config(root_b, "bbbb"),
            Connection::new(server, false),
            Arc::new(HeadlessUi::new()),
        );
        (a, b)
    }

    #[tokio::test]
    async fn test_empty_roots_session_completes() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let (a, b) = session_pair(dir_a.path(), dir_b.path()).await;

        let run_a = tokio::spawn(a.run());
        let run_b = tokio::spawn(b.run());

        let report_a = tokio::time::timeout(Duration::from_secs(10), run_a)
            .await
            .expect("session A timed out")
            .unwrap()
            .unwrap();
        let report_b = tokio::time::timeout(Duration::from_secs(10), run_b)
            .await
            .expect("session B timed out")
            .unwrap()
            .unwrap();

        assert_eq!(report_a.error_count, 0);
        assert_eq!(report_b.error_count, 0);
    }

    #[tokio::test]
    async fn test_exiting_state_is_terminal() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let (a, _b) = session_pair(dir_a.path(), dir_b.path()).await;

        a.set_state(Exiting);
        a.set_state(SyncingFiles);
        assert_eq!(a.current_state(), Exiting);
    }

    /// Counts cancellations so permit-leak regressions are visible, unlike
    /// the no-op cancel of the headless terminal.
    struct CancelCountingUi {
        cancels: AtomicUsize,
    }

    #[async_trait]
    impl UserInterface for CancelCountingUi {
        fn log(&self, _line: &str) {}

        async fn prompt_choice(&self, _prompt: &str, options: &[char]) -> PromptOutcome {
            PromptOutcome::Choice(options[0])
        }

        fn cancel_prompt(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        fn start_progress(&self, _label: &str) {}
        fn update_progress(&self, _fraction: f64) {}
        fn complete_progress(&self) {}
    }

    #[tokio::test]
    async fn test_version_ack_does_not_cancel_without_pending_prompt() {
        let dir_a = tempdir().unwrap();

        let listener = bind_listener(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { accept_peer(&listener).await.unwrap().0 });
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let _server = accept.await.unwrap();

        let ui = Arc::new(CancelCountingUi {
            cancels: AtomicUsize::new(0),
        });
        let session = SyncSession::new(
            SessionConfig {
                root: dir_a.path().to_path_buf(),
                uuid: "aaaa".to_string(),
                version: "0.6~".to_string(),
                ask_confirmation: false,
                debug_protocol: false,
            },
            Connection::new(client, false),
            ui.clone(),
        );

        // Versions matched, so no prompt is pending: the peer's ack must
        // not park a cancellation for a later prompt.
        session.handle_exiting_state(AwaitingVersion.to_wire()).await;
        assert_eq!(ui.cancels.load(Ordering::SeqCst), 0);

        // With a mismatch prompt on screen, the ack cancels it.
        session
            .version_prompt_active
            .store(true, Ordering::SeqCst);
        session.handle_exiting_state(AwaitingVersion.to_wire()).await;
        assert_eq!(ui.cancels.load(Ordering::SeqCst), 1);
    }
}
