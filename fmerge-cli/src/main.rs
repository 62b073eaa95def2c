use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{error, info};

use fmerge_net::{connect_to_peer, listen_for_peer, Connection, DEFAULT_PORT};
use fmerge_sync::{SessionConfig, SyncSession, UserInterface};
use fmerge_tree::{detect_changes, ChangeLogStore, STATE_DIR};

mod config;
mod terminal;

use config::{config_path, InstanceConfig};
use terminal::InteractiveUi;

/// The version exchanged during the handshake: `MAJOR.MINOR~` for releases,
/// `dev~<hash>` for development builds.
const FMERGE_VERSION: &str = "0.6~";

#[derive(Parser, Debug)]
#[command(name = "fmerge")]
#[command(version = FMERGE_VERSION, disable_version_flag = true)]
#[command(about = "Synchronizes file changes bidirectionally between two folders over the network")]
#[command(group(ArgGroup::new("mode").required(true).args(["server", "client"])))]
struct Cli {
    /// Output version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Start in server mode and wait for a peer
    #[arg(short, long)]
    server: bool,

    /// Start in client mode and connect to the given server address
    #[arg(short, long, value_name = "ADDR")]
    client: Option<String>,

    /// Do not prompt the user for confirmation (be careful!)
    #[arg(short = 'y')]
    assume_yes: bool,

    /// Enable protocol-level debug logging
    #[arg(short = 'd')]
    debug: bool,

    /// The folder to synchronize
    path: PathBuf,
}

fn main() -> ExitCode {
    // Usage errors exit with 1, not clap's default.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match run(cli) {
        Ok(sync_errors) if sync_errors == 0 => ExitCode::SUCCESS,
        Ok(sync_errors) => {
            error!("{} files failed to sync", sync_errors);
            ExitCode::from(1)
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<usize> {
    if !cli.path.is_dir() {
        bail!("Illegal starting folder {}", cli.path.display());
    }
    let root = cli
        .path
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", cli.path.display()))?;

    std::fs::create_dir_all(root.join(STATE_DIR))
        .with_context(|| format!("Cannot create {} directory", STATE_DIR))?;

    let cfg_path = config_path(&root);
    let instance = InstanceConfig::load_or_generate(&cfg_path)?;
    instance.save(&cfg_path)?;

    // Bring the change log up to date with the disk before talking to
    // anyone, so the exchanged history reflects the current tree.
    let scan_root = root.clone();
    let new_changes = tokio::task::spawn_blocking(move || detect_changes(&scan_root))
        .await
        .context("Scan task failed")??;
    info!("Detected {} new local changes", new_changes.len());
    ChangeLogStore::new(&root).append(&new_changes)?;

    let stream = match &cli.client {
        Some(addr) => {
            info!("Starting in client mode for \"{}\"", root.display());
            connect_to_peer(addr, DEFAULT_PORT).await?
        }
        None => {
            info!("Starting in server mode for \"{}\"", root.display());
            info!("Waiting for peer connections...");
            listen_for_peer(DEFAULT_PORT).await?.0
        }
    };

    let conn = Connection::new(stream, cli.debug);
    info!("Session established with {}", conn.peer_addr());

    let session_config = SessionConfig {
        root,
        uuid: instance.uuid,
        version: FMERGE_VERSION.to_string(),
        ask_confirmation: !cli.assume_yes,
        debug_protocol: cli.debug,
    };
    let ui: Arc<dyn UserInterface> = Arc::new(InteractiveUi::new());
    let session = SyncSession::new(session_config, conn, ui);

    let report = session.run().await?;
    Ok(report.error_count)
}
