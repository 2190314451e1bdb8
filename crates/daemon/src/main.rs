// vibegraph-syncd: runs one sync session against a SQLite snapshot file,
// driven by JSON-line commands on stdin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use vibegraph_common::types::ProjectId;
use vibegraph_sync::config::GlobalConfig;
use vibegraph_sync::control::{dispatch, ControlCommand, ControlReply};
use vibegraph_sync::feed::{FeedHub, SnapshotPoller};
use vibegraph_sync::runtime::spawn_session;
use vibegraph_sync::snapshot::SqliteSnapshotStore;

#[derive(Parser)]
#[command(name = "vibegraph-syncd", about = "Graph snapshot sync daemon")]
struct Args {
    /// Project to open (a new id is generated when omitted)
    #[arg(long)]
    project: Option<ProjectId>,
    /// Snapshot database (defaults to the configured path)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Config file (defaults to ~/.vibegraph/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from(path)
            .with_context(|| format!("failed to load config `{}`", path.display()))?,
        None => GlobalConfig::load(),
    };
    let db_path = args
        .db
        .or_else(|| config.database_path())
        .context("could not determine snapshot database path")?;
    let project_id = args.project.unwrap_or_default();

    // Appends from this and other processes reach the session through the
    // poller, so the store itself does not publish.
    let snapshots = Arc::new(SqliteSnapshotStore::open(&db_path)?);
    let hub = FeedHub::new();
    let poller = SnapshotPoller::new(snapshots.clone(), hub.clone())
        .with_interval(config.poll_interval())
        .spawn();

    let handle = spawn_session(config.session_config(), snapshots, Arc::new(hub));
    handle
        .open_project(project_id)
        .await
        .with_context(|| format!("failed to open project {project_id}"))?;
    info!(%project_id, db = %db_path.display(), "vibegraph-syncd ready");

    let mut views = handle.view();
    let printer = tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            print_line(&view);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match ControlCommand::parse(line) {
            Ok(ControlCommand::Quit) => break,
            Ok(command) => dispatch(&handle, command).await,
            Err(error) => {
                warn!(error = %error, "invalid command");
                ControlReply::Error { message: error.to_string() }
            }
        };
        print_line(&reply);
    }

    handle.shutdown().await;
    poller.shutdown().await;
    printer.abort();
    info!("vibegraph-syncd stopped");
    Ok(())
}

fn print_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(error) => warn!(error = %error, "failed to encode output line"),
    }
}
