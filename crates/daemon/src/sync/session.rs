// Sync session: single owner of the active project's document and sync
// state.
//
// Every reaction (local edit, debounce tick, realtime event, write
// completion, conflict resolution) is a `&mut self` method, so no two of
// them can touch the document at once. Writes are split into
// `begin_*` (capture + status change) and `complete_write_at` (apply the
// outcome) so the storage I/O can run elsewhere.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use vibegraph_common::graph::patch::GraphPatch;
use vibegraph_common::graph::{GraphDocument, GraphError};
use vibegraph_common::sync::{ConflictData, ConflictResolution, SnapshotEvent, SyncStatus};
use vibegraph_common::types::{ProjectId, Version};

use super::debounce::{DebounceConfig, Debouncer};
use super::listener::{self, ListenerDecision};
use super::resolver::{plan_resolution, ResolutionPlan};
use super::writer::{PendingWrite, WriteKind, WriteMode, WriteOutcome};
use crate::feed::{SnapshotFeed, Subscription};
use crate::snapshot::{SnapshotStore, SnapshotStoreError};
use crate::store::{GraphEdit, GraphStore};

const DEFAULT_SAVED_DISPLAY: Duration = Duration::from_millis(2_000);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no project is open")]
    NoProject,

    #[error("there is no conflict to resolve")]
    NoConflict,

    #[error("a snapshot write is already in flight")]
    WriteInFlight,

    #[error("an unresolved conflict blocks autosave")]
    ConflictPending,

    #[error("sync session has shut down")]
    SessionClosed,

    #[error(transparent)]
    Storage(#[from] SnapshotStoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub debounce: DebounceConfig,
    /// How long `saved` stays on screen before dropping back to `idle`.
    pub saved_display: Duration,
    pub write_mode: WriteMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: DebounceConfig::default(),
            saved_display: DEFAULT_SAVED_DISPLAY,
            write_mode: WriteMode::default(),
        }
    }
}

/// Client-local sync state exposed to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub local_version: Version,
    pub last_local_mutation_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub conflict: Option<ConflictData>,
}

/// What `begin_resolution` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionStep {
    /// Resolved locally; no write needed.
    Adopted { version: Version },
    /// Run this write and hand the result to `complete_write_at`.
    Write(PendingWrite),
}

pub struct SyncSession<S: SnapshotStore, F: SnapshotFeed> {
    config: SessionConfig,
    snapshots: Arc<S>,
    feed: Arc<F>,
    project_id: Option<ProjectId>,
    store: GraphStore,
    local_version: Version,
    status: SyncStatus,
    conflict: Option<ConflictData>,
    debouncer: Debouncer<u64>,
    subscription: Option<Subscription>,
    epoch: u64,
    in_flight: Option<WriteKind>,
    last_attempted_revision: u64,
    last_saved_revision: u64,
    conflict_revision: u64,
    saved_at: Option<Instant>,
}

impl<S: SnapshotStore, F: SnapshotFeed> SyncSession<S, F> {
    pub fn new(config: SessionConfig, snapshots: Arc<S>, feed: Arc<F>) -> Self {
        Self {
            config,
            snapshots,
            feed,
            project_id: None,
            store: GraphStore::new(),
            local_version: 0,
            status: SyncStatus::Idle,
            conflict: None,
            debouncer: Debouncer::new(config.debounce),
            subscription: None,
            epoch: 0,
            in_flight: None,
            last_attempted_revision: 0,
            last_saved_revision: 0,
            conflict_revision: 0,
            saved_at: None,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &Arc<S> {
        &self.snapshots
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn document(&self) -> &GraphDocument {
        self.store.document()
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn local_version(&self) -> Version {
        self.local_version
    }

    pub fn conflict(&self) -> Option<&ConflictData> {
        self.conflict.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_write_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True while the debouncer holds an unsent save.
    pub fn has_pending_save(&self) -> bool {
        self.debouncer.is_armed()
    }

    pub fn last_saved_revision(&self) -> u64 {
        self.last_saved_revision
    }

    pub fn subscription_mut(&mut self) -> Option<&mut Subscription> {
        self.subscription.as_mut()
    }

    pub fn sync_state(&self) -> SyncState {
        SyncState {
            local_version: self.local_version,
            last_local_mutation_at: self.store.last_local_mutation_at(),
            status: self.status,
            conflict: self.conflict.clone(),
        }
    }

    // ── Project lifecycle ──────────────────────────────────────────

    /// Switch to `project_id`: tear down the previous project, subscribe to
    /// the new one and load its latest snapshot.
    pub async fn open_project(&mut self, project_id: ProjectId) -> Result<(), SyncError> {
        self.close();

        // Subscribe before loading so nothing appended in between is missed;
        // anything at or below the loaded version is dropped as stale.
        let subscription = self.feed.subscribe(project_id);
        let latest = self.snapshots.latest(project_id).await?;

        self.project_id = Some(project_id);
        self.subscription = Some(subscription);
        if let Some(snapshot) = latest {
            let problems = snapshot.graph_data.validate();
            if !problems.is_empty() {
                warn!(%project_id, version = snapshot.version, problems = problems.len(), "loaded snapshot has integrity problems");
            }
            self.store.replace_from_remote(snapshot.graph_data);
            self.local_version = snapshot.version;
        }

        info!(%project_id, local_version = self.local_version, "project opened");
        Ok(())
    }

    /// Cancel pending work and unsubscribe. In-flight writes that complete
    /// later are discarded.
    pub fn close(&mut self) {
        self.debouncer.cancel();
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(project_id) = self.project_id.take() {
            debug!(%project_id, "project closed");
        }

        self.epoch += 1;
        self.store = GraphStore::new();
        self.local_version = 0;
        self.status = SyncStatus::Idle;
        self.conflict = None;
        self.debouncer = Debouncer::new(self.config.debounce);
        self.in_flight = None;
        self.last_attempted_revision = 0;
        self.last_saved_revision = 0;
        self.conflict_revision = 0;
        self.saved_at = None;
    }

    // ── Local mutations ────────────────────────────────────────────

    pub fn edit(&mut self, edit: GraphEdit) -> Result<Option<String>, SyncError> {
        self.edit_at(Instant::now(), edit)
    }

    /// Apply a local edit and re-arm the autosave. Returns the id of a
    /// created node or edge.
    pub fn edit_at(&mut self, now: Instant, edit: GraphEdit) -> Result<Option<String>, SyncError> {
        if self.project_id.is_none() {
            return Err(SyncError::NoProject);
        }
        let created = self.store.apply_edit(edit)?;
        self.observe_at(now);
        Ok(created)
    }

    /// Apply an external-collaborator batch as one mutation. Returns false
    /// for an empty patch.
    pub fn apply_patch_at(&mut self, now: Instant, patch: &GraphPatch) -> Result<bool, SyncError> {
        if self.project_id.is_none() {
            return Err(SyncError::NoProject);
        }
        let changed = self.store.apply_patch(patch);
        self.observe_at(now);
        Ok(changed)
    }

    /// Re-arm the autosave if the document changed since the last write
    /// attempt. Autosave stays off while a conflict is open.
    pub fn observe_at(&mut self, now: Instant) {
        if self.project_id.is_none() || self.conflict.is_some() {
            return;
        }
        let revision = self.store.revision();
        if revision <= self.last_attempted_revision {
            return;
        }
        if self.debouncer.pending() == Some(&revision) {
            return;
        }
        self.debouncer.schedule_at(now, revision);
    }

    // ── Timers ─────────────────────────────────────────────────────

    /// Earliest instant at which `tick_at` has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let saved_reset = match (self.status, self.saved_at) {
            (SyncStatus::Saved, Some(at)) => Some(at + self.config.saved_display),
            _ => None,
        };
        match (self.debouncer.deadline(), saved_reset) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire what is due at `now`. Returns an autosave to execute when the
    /// debounce window has elapsed.
    pub fn tick_at(&mut self, now: Instant) -> Option<PendingWrite> {
        if let (SyncStatus::Saved, Some(at)) = (self.status, self.saved_at) {
            if now >= at + self.config.saved_display {
                self.status = SyncStatus::Idle;
                self.saved_at = None;
            }
        }

        self.debouncer.poll_at(now)?;
        match self.begin_write() {
            Ok(write) => Some(write),
            Err(error) => {
                // Edits made meanwhile re-arm the debouncer once the current
                // write completes.
                debug!(error = %error, "debounced save skipped");
                None
            }
        }
    }

    /// Run the pending save right away. Also retries the last unsaved
    /// revision after a failed write. While a write is in flight the
    /// pending save stays armed; call again once it completes.
    pub fn flush(&mut self) -> Option<PendingWrite> {
        if self.in_flight.is_some() {
            return None;
        }
        let pending = self.debouncer.flush().is_some();
        let retry = self.status == SyncStatus::Error
            && self.conflict.is_none()
            && self.store.revision() > self.last_saved_revision;
        if !pending && !retry {
            return None;
        }
        self.begin_write().ok()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Capture the current document for an autosave.
    pub fn begin_write(&mut self) -> Result<PendingWrite, SyncError> {
        if self.conflict.is_some() {
            return Err(SyncError::ConflictPending);
        }
        let graph = self.store.document().clone();
        let revision = self.store.revision();
        self.start_write(WriteKind::Autosave, graph, revision)
    }

    fn start_write(
        &mut self,
        kind: WriteKind,
        graph: GraphDocument,
        revision: u64,
    ) -> Result<PendingWrite, SyncError> {
        let project_id = self.project_id.ok_or(SyncError::NoProject)?;
        if self.in_flight.is_some() {
            return Err(SyncError::WriteInFlight);
        }

        self.in_flight = Some(kind);
        self.status = SyncStatus::Saving;
        self.saved_at = None;
        if kind == WriteKind::Autosave {
            self.last_attempted_revision = revision;
        }

        debug!(%project_id, kind = kind.as_str(), revision, local_version = self.local_version, "snapshot write started");
        Ok(PendingWrite {
            project_id,
            epoch: self.epoch,
            kind,
            local_version: self.local_version,
            graph,
            revision,
            mode: self.config.write_mode,
        })
    }

    /// Apply the result of `write.execute(..)`. Returns the new local
    /// version when a snapshot was appended.
    pub fn complete_write_at(
        &mut self,
        now: Instant,
        write: &PendingWrite,
        result: Result<WriteOutcome, SnapshotStoreError>,
    ) -> Result<Option<Version>, SyncError> {
        if write.epoch != self.epoch {
            debug!(project_id = %write.project_id, "discarding write completion from a closed project");
            return Ok(None);
        }
        self.in_flight = None;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                self.status = SyncStatus::Error;
                return Err(error.into());
            }
        };

        match outcome {
            WriteOutcome::Appended { version } => {
                self.local_version = version;
                match write.kind {
                    WriteKind::Autosave => {
                        self.last_saved_revision = self.last_saved_revision.max(write.revision);
                    }
                    WriteKind::KeepLocal => {
                        self.conflict = None;
                        self.last_attempted_revision = write.revision;
                        self.last_saved_revision = write.revision;
                        info!(project_id = %write.project_id, version, "conflict resolved by keeping local graph");
                    }
                    WriteKind::Merge => {
                        self.conflict = None;
                        self.store.replace_from_remote(write.graph.clone());
                        self.debouncer.cancel();
                        self.mark_synced();
                        info!(project_id = %write.project_id, version, "conflict resolved by merge");
                    }
                }
                self.mark_saved(now);
                self.observe_at(now);
                Ok(Some(version))
            }
            WriteOutcome::Conflict { remote_version, remote_graph } => {
                self.debouncer.cancel();
                self.conflict_revision = self.store.revision();
                self.conflict = Some(ConflictData {
                    local_version: self.local_version,
                    remote_version,
                    local_graph: self.store.document().clone(),
                    remote_graph,
                });
                self.status = SyncStatus::Conflict;
                Ok(None)
            }
        }
    }

    /// Forget an in-flight write whose result will never arrive.
    pub fn abandon_write(&mut self) {
        if self.in_flight.take().is_some() {
            self.status = SyncStatus::Error;
        }
    }

    /// Begin, execute and complete an autosave in one call.
    pub async fn save(&mut self) -> Result<Option<Version>, SyncError> {
        let write = self.begin_write()?;
        self.run_write(write).await
    }

    /// Execute a previously begun write inline.
    pub async fn run_write(&mut self, write: PendingWrite) -> Result<Option<Version>, SyncError> {
        let result = write.execute(self.snapshots.as_ref()).await;
        self.complete_write_at(Instant::now(), &write, result)
    }

    // ── Realtime ───────────────────────────────────────────────────

    pub fn handle_remote_event(&mut self, event: SnapshotEvent) -> ListenerDecision {
        let decision = listener::evaluate(
            &event,
            self.project_id,
            self.local_version,
            self.status,
            self.conflict.is_some(),
        );
        if !decision.is_apply() {
            debug!(project_id = %event.project_id, version = event.version, ?decision, "remote snapshot ignored");
            return decision;
        }

        info!(project_id = %event.project_id, version = event.version, "applying remote snapshot");
        self.store.replace_from_remote(event.graph_data);
        self.local_version = event.version;
        self.debouncer.cancel();
        self.mark_synced();
        if self.status == SyncStatus::Error {
            self.status = SyncStatus::Idle;
        }
        decision
    }

    /// Apply every event already queued on the subscription.
    pub fn drain_remote_events(&mut self) -> Vec<ListenerDecision> {
        let mut decisions = Vec::new();
        while let Some(event) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            decisions.push(self.handle_remote_event(event));
        }
        decisions
    }

    // ── Conflict resolution ────────────────────────────────────────

    pub fn begin_resolution(
        &mut self,
        now: Instant,
        strategy: ConflictResolution,
    ) -> Result<ResolutionStep, SyncError> {
        let conflict = self.conflict.as_ref().ok_or(SyncError::NoConflict)?;
        if self.in_flight.is_some() {
            return Err(SyncError::WriteInFlight);
        }
        info!(strategy = strategy.as_str(), remote_version = conflict.remote_version, "resolving conflict");

        match plan_resolution(conflict, strategy) {
            ResolutionPlan::Adopt { graph, version } => {
                self.store.replace_from_remote(graph);
                self.local_version = version;
                self.conflict = None;
                self.debouncer.cancel();
                self.mark_synced();
                self.mark_saved(now);
                Ok(ResolutionStep::Adopted { version })
            }
            ResolutionPlan::Persist { kind, graph } => {
                let revision = self.conflict_revision;
                self.start_write(kind, graph, revision).map(ResolutionStep::Write)
            }
        }
    }

    /// Resolve the open conflict, running any resulting write inline.
    pub async fn resolve_conflict(
        &mut self,
        strategy: ConflictResolution,
    ) -> Result<Version, SyncError> {
        match self.begin_resolution(Instant::now(), strategy)? {
            ResolutionStep::Adopted { version } => Ok(version),
            ResolutionStep::Write(write) => {
                let version = self.run_write(write).await?;
                Ok(version.unwrap_or(self.local_version))
            }
        }
    }

    fn mark_synced(&mut self) {
        let revision = self.store.revision();
        self.last_attempted_revision = revision;
        self.last_saved_revision = revision;
    }

    fn mark_saved(&mut self, now: Instant) {
        self.status = SyncStatus::Saved;
        self.saved_at = Some(now);
    }
}
