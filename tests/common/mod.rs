//! Shared fixtures for the two-peer integration tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use filetime::FileTime;
use tokio::net::TcpStream;
use tokio::sync::Notify;

use fmerge::net::{accept_peer, bind_listener, Connection};
use fmerge::sync::{
    PromptOutcome, SessionConfig, SyncReport, SyncSession, UserInterface,
};
use fmerge::tree::{detect_changes, ChangeLogStore};

pub const SESSION_TIMEOUT: Duration = Duration::from_secs(20);

/// A terminal whose prompts never answer; they only return when cancelled.
/// Used to pin down which peer resolves a conflict first.
pub struct BlockingUi {
    cancel: Notify,
}

impl BlockingUi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancel: Notify::new(),
        })
    }
}

#[async_trait]
impl UserInterface for BlockingUi {
    fn log(&self, _line: &str) {}

    async fn prompt_choice(&self, _prompt: &str, _options: &[char]) -> PromptOutcome {
        self.cancel.notified().await;
        PromptOutcome::Cancelled
    }

    fn cancel_prompt(&self) {
        self.cancel.notify_one();
    }

    fn start_progress(&self, _label: &str) {}
    fn update_progress(&self, _fraction: f64) {}
    fn complete_progress(&self) {}
}

/// Scan a root and fold the detected changes into its persisted log, the
/// way a session startup does.
pub fn refresh_changelog(root: &Path) {
    let changes = detect_changes(root).expect("scan failed");
    ChangeLogStore::new(root)
        .append(&changes)
        .expect("append failed");
}

pub fn set_mtime(path: &Path, mtime: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(mtime, 0)).expect("set mtime failed");
}

pub fn set_symlink_mtime(path: &Path, mtime: i64) {
    let time = FileTime::from_unix_time(mtime, 0);
    filetime::set_symlink_file_times(path, time, time).expect("set link mtime failed");
}

/// Run a full session between two roots and return both reports.
pub async fn run_session_pair(
    root_a: &Path,
    root_b: &Path,
    ui_a: Arc<dyn UserInterface>,
    ui_b: Arc<dyn UserInterface>,
) -> (SyncReport, SyncReport) {
    refresh_changelog(root_a);
    refresh_changelog(root_b);

    let listener = bind_listener(0).await.expect("bind failed");
    let port = listener.local_addr().unwrap().port();

    let accept = tokio::spawn(async move { accept_peer(&listener).await.expect("accept failed").0 });
    let client = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect failed");
    let server = accept.await.unwrap();

    let config = |root: &Path, uuid: &str| SessionConfig {
        root: root.to_path_buf(),
        uuid: uuid.to_string(),
        version: "0.6~".to_string(),
        ask_confirmation: false,
        debug_protocol: false,
    };

    let session_a = SyncSession::new(config(root_a, "peer-a"), Connection::new(client, false), ui_a);
    let session_b = SyncSession::new(config(root_b, "peer-b"), Connection::new(server, false), ui_b);

    let run_a = tokio::spawn(session_a.run());
    let run_b = tokio::spawn(session_b.run());

    let report_a = tokio::time::timeout(SESSION_TIMEOUT, run_a)
        .await
        .expect("session A timed out")
        .unwrap()
        .expect("session A failed");
    let report_b = tokio::time::timeout(SESSION_TIMEOUT, run_b)
        .await
        .expect("session B timed out")
        .unwrap()
        .expect("session B failed");

    (report_a, report_b)
}
