// In-memory snapshot store, used by tests and single-process setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use vibegraph_common::graph::GraphDocument;
use vibegraph_common::sync::SnapshotEvent;
use vibegraph_common::types::{ProjectId, Snapshot, Version};

use super::{AppendOutcome, SnapshotStore, SnapshotStoreError};
use crate::feed::FeedHub;

#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    projects: Mutex<HashMap<ProjectId, Vec<Snapshot>>>,
    feed: Option<FeedHub>,
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
    append_calls: AtomicUsize,
    latest_calls: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every successful append to `feed`.
    pub fn with_feed(feed: FeedHub) -> Self {
        Self { inner: Arc::new(MemoryInner { feed: Some(feed), ..MemoryInner::default() }) }
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` calls fail.
    pub fn fail_next(&self, count: usize) {
        self.inner.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of snapshots successfully appended across all projects.
    pub fn append_count(&self) -> usize {
        self.inner.append_calls.load(Ordering::SeqCst)
    }

    /// Number of `latest` reads served.
    pub fn latest_count(&self) -> usize {
        self.inner.latest_calls.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self, project_id: ProjectId) -> Vec<Snapshot> {
        self.with_projects(|projects| projects.get(&project_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), SnapshotStoreError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(SnapshotStoreError::Unavailable("store marked unavailable".into()));
        }
        let injected = self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SnapshotStoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn with_projects<R>(
        &self,
        f: impl FnOnce(&mut HashMap<ProjectId, Vec<Snapshot>>) -> R,
    ) -> Result<R, SnapshotStoreError> {
        let mut projects = self.inner.projects.lock().map_err(|_| SnapshotStoreError::Poisoned)?;
        Ok(f(&mut projects))
    }

    fn push(
        &self,
        project_id: ProjectId,
        expected_latest: Option<Version>,
        graph: &GraphDocument,
    ) -> Result<AppendOutcome, SnapshotStoreError> {
        self.check_available()?;

        let outcome = self.with_projects(|projects| {
            let history = projects.entry(project_id).or_default();
            let latest = history.last().map_or(0, |snapshot| snapshot.version);
            if let Some(expected) = expected_latest {
                if expected != latest {
                    return (AppendOutcome::VersionMismatch { latest: history.last().cloned() }, None);
                }
            }

            let snapshot = Snapshot {
                project_id,
                version: latest + 1,
                graph_data: graph.clone(),
                created_at: Utc::now(),
            };
            history.push(snapshot.clone());
            (AppendOutcome::Appended(snapshot.version), Some(snapshot))
        })?;

        let (outcome, appended) = outcome;
        if let Some(snapshot) = appended {
            self.inner.append_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(feed) = &self.inner.feed {
                feed.publish(SnapshotEvent::from(snapshot));
            }
        }
        Ok(outcome)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    async fn append(
        &self,
        project_id: ProjectId,
        graph: &GraphDocument,
    ) -> Result<Version, SnapshotStoreError> {
        match self.push(project_id, None, graph)? {
            AppendOutcome::Appended(version) => Ok(version),
            AppendOutcome::VersionMismatch { .. } => {
                Err(SnapshotStoreError::Unavailable("unconditional append was rejected".into()))
            }
        }
    }

    async fn append_if(
        &self,
        project_id: ProjectId,
        expected_latest: Version,
        graph: &GraphDocument,
    ) -> Result<AppendOutcome, SnapshotStoreError> {
        self.push(project_id, Some(expected_latest), graph)
    }

    async fn latest(&self, project_id: ProjectId) -> Result<Option<Snapshot>, SnapshotStoreError> {
        self.check_available()?;
        self.inner.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.with_projects(|projects| projects.get(&project_id).and_then(|h| h.last().cloned()))
    }

    async fn list_after(
        &self,
        project_id: ProjectId,
        after: Version,
    ) -> Result<Vec<Snapshot>, SnapshotStoreError> {
        self.check_available()?;
        self.with_projects(|projects| {
            projects
                .get(&project_id)
                .map(|history| history.iter().filter(|s| s.version > after).cloned().collect())
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::SnapshotFeed;
    use vibegraph_common::graph::{Node, NodeKind};

    fn graph(label: &str) -> GraphDocument {
        GraphDocument { nodes: vec![Node::new("n", NodeKind::Entity, label)], ..Default::default() }
    }

    #[tokio::test]
    async fn assigns_monotonic_versions_per_project() {
        let store = MemorySnapshotStore::new();
        let project_a = ProjectId::new();
        let project_b = ProjectId::new();

        assert_eq!(store.append(project_a, &graph("a1")).await.unwrap(), 1);
        assert_eq!(store.append(project_a, &graph("a2")).await.unwrap(), 2);
        assert_eq!(store.append(project_b, &graph("b1")).await.unwrap(), 1);

        let latest = store.latest(project_a).await.unwrap().expect("latest should exist");
        assert_eq!(latest.version, 2);
        assert_eq!(latest.graph_data, graph("a2"));
        assert_eq!(store.append_count(), 3);
    }

    #[tokio::test]
    async fn latest_of_unknown_project_is_none() {
        let store = MemorySnapshotStore::new();
        assert!(store.latest(ProjectId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_append_rejects_stale_expectation() {
        let store = MemorySnapshotStore::new();
        let project = ProjectId::new();

        assert_eq!(
            store.append_if(project, 0, &graph("first")).await.unwrap(),
            AppendOutcome::Appended(1)
        );

        let outcome = store.append_if(project, 0, &graph("stale")).await.unwrap();
        let AppendOutcome::VersionMismatch { latest } = outcome else {
            panic!("expected mismatch, got {outcome:?}");
        };
        assert_eq!(latest.map(|s| s.version), Some(1));
        assert_eq!(store.snapshots(project).len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = MemorySnapshotStore::new();
        let project = ProjectId::new();
        store.fail_next(1);

        assert!(matches!(
            store.append(project, &graph("x")).await,
            Err(SnapshotStoreError::Unavailable(_))
        ));
        assert_eq!(store.append(project, &graph("x")).await.unwrap(), 1);

        store.set_unavailable(true);
        assert!(store.latest(project).await.is_err());
        store.set_unavailable(false);
        assert!(store.latest(project).await.is_ok());
    }

    #[tokio::test]
    async fn appends_are_published_to_the_feed() {
        let hub = FeedHub::new();
        let store = MemorySnapshotStore::with_feed(hub.clone());
        let project = ProjectId::new();
        let mut sub = hub.subscribe(project);

        store.append(project, &graph("x")).await.unwrap();

        let event = sub.recv().await.expect("event should arrive");
        assert_eq!(event.version, 1);
        assert_eq!(event.graph_data, graph("x"));
    }

    #[tokio::test]
    async fn list_after_returns_newer_snapshots_in_order() {
        let store = MemorySnapshotStore::new();
        let project = ProjectId::new();
        for label in ["1", "2", "3"] {
            store.append(project, &graph(label)).await.unwrap();
        }

        let versions: Vec<_> =
            store.list_after(project, 1).await.unwrap().into_iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![2, 3]);
    }
}
