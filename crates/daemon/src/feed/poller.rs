// Snapshot poller: turns a shared snapshot table into realtime events.
//
// Used when other processes append to the same database. Every tick the
// poller asks the store for snapshots newer than the last one it saw for
// each project that has subscribers, and publishes them to the hub. The
// first sighting of a project republishes its latest snapshot, so an append
// that lands between a subscriber's initial load and the first poll is not
// lost; subscribers already at that version drop it as stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vibegraph_common::sync::SnapshotEvent;
use vibegraph_common::types::{ProjectId, Version};

use super::FeedHub;
use crate::snapshot::{SnapshotStore, SnapshotStoreError};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

pub struct SnapshotPoller<S: SnapshotStore> {
    store: Arc<S>,
    hub: FeedHub,
    cursors: HashMap<ProjectId, Version>,
    interval: Duration,
}

impl<S: SnapshotStore> SnapshotPoller<S> {
    pub fn new(store: Arc<S>, hub: FeedHub) -> Self {
        Self { store, hub, cursors: HashMap::new(), interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn cursor(&self, project_id: ProjectId) -> Option<Version> {
        self.cursors.get(&project_id).copied()
    }

    /// Run a single polling pass. Returns the number of events published.
    pub async fn poll_once(&mut self) -> Result<usize, SnapshotStoreError> {
        let active = self.hub.active_projects();
        self.cursors.retain(|project_id, _| active.contains(project_id));

        let mut published = 0;
        for project_id in active {
            let Some(cursor) = self.cursors.get(&project_id).copied() else {
                let latest = self.store.latest(project_id).await?;
                let version = latest.as_ref().map_or(0, |snapshot| snapshot.version);
                debug!(%project_id, version, "poller tracking project");
                self.cursors.insert(project_id, version);
                if let Some(snapshot) = latest {
                    self.hub.publish(SnapshotEvent::from(snapshot));
                    published += 1;
                }
                continue;
            };

            for snapshot in self.store.list_after(project_id, cursor).await? {
                self.cursors.insert(project_id, snapshot.version);
                self.hub.publish(SnapshotEvent::from(snapshot));
                published += 1;
            }
        }
        Ok(published)
    }

    /// Spawn the polling loop onto the runtime.
    pub fn spawn(mut self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                if let Err(error) = self.poll_once().await {
                    warn!(error = %error, "snapshot poll failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {},
                    _ = shutdown_rx.changed() => {
                        debug!("snapshot poller shutting down");
                        break;
                    }
                }
            }
        });
        PollerHandle { task: Some(task), shutdown_tx }
    }
}

/// Handle for the poller task. Dropping it stops the loop.
pub struct PollerHandle {
    task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl PollerHandle {
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
