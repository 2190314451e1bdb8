// Session actor: runs a `SyncSession` on its own tokio task.
//
// The task owns the session outright and multiplexes four sources with
// `tokio::select!`: commands from `SessionHandle`, realtime events from the
// session's subscription, the completion of the in-flight snapshot write
// (spawned as a separate task), and the session's next timer deadline.
// Observers follow state through a `watch` channel carrying `SyncView`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};
use vibegraph_common::graph::patch::GraphPatch;
use vibegraph_common::graph::GraphDocument;
use vibegraph_common::sync::{ConflictData, ConflictResolution, SnapshotEvent, SyncStatus};
use vibegraph_common::types::{ProjectId, Version};

use crate::feed::{SnapshotFeed, Subscription};
use crate::snapshot::{SnapshotStore, SnapshotStoreError};
use crate::store::GraphEdit;
use crate::sync::{PendingWrite, ResolutionStep, SessionConfig, SyncError, SyncSession, WriteOutcome};

const COMMAND_BUFFER_SIZE: usize = 64;

type WriteReply = oneshot::Sender<Result<Option<Version>, SyncError>>;
type WriteResult = (PendingWrite, Result<WriteOutcome, SnapshotStoreError>);

/// Everything a UI needs to render the sync state.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncView {
    pub project_id: Option<ProjectId>,
    pub status: SyncStatus,
    pub local_version: Version,
    pub last_local_mutation_at: Option<DateTime<Utc>>,
    pub pending_save: bool,
    pub conflict: Option<ConflictData>,
    pub document: GraphDocument,
}

impl SyncView {
    fn capture<S: SnapshotStore, F: SnapshotFeed>(session: &SyncSession<S, F>) -> Self {
        Self {
            project_id: session.project_id(),
            status: session.status(),
            local_version: session.local_version(),
            last_local_mutation_at: session.store().last_local_mutation_at(),
            pending_save: session.has_pending_save(),
            conflict: session.conflict().cloned(),
            document: session.document().clone(),
        }
    }
}

enum Command {
    OpenProject { project_id: ProjectId, reply: oneshot::Sender<Result<(), SyncError>> },
    Edit { edit: GraphEdit, reply: oneshot::Sender<Result<Option<String>, SyncError>> },
    ApplyPatch { patch: GraphPatch, reply: oneshot::Sender<Result<bool, SyncError>> },
    Flush { reply: WriteReply },
    Resolve { strategy: ConflictResolution, reply: WriteReply },
    Shutdown,
}

struct InFlight {
    task: JoinHandle<WriteResult>,
    reply: Option<WriteReply>,
}

/// Handle to a running session task. Dropping it stops the task.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SyncView>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub async fn open_project(&self, project_id: ProjectId) -> Result<(), SyncError> {
        self.request(|reply| Command::OpenProject { project_id, reply }).await?
    }

    /// Apply a local edit; returns the id of a created node or edge.
    pub async fn edit(&self, edit: GraphEdit) -> Result<Option<String>, SyncError> {
        self.request(|reply| Command::Edit { edit, reply }).await?
    }

    pub async fn apply_patch(&self, patch: GraphPatch) -> Result<bool, SyncError> {
        self.request(|reply| Command::ApplyPatch { patch, reply }).await?
    }

    /// Save pending edits now and wait for the write. Returns the new
    /// version, or `None` when there was nothing to save.
    pub async fn flush(&self) -> Result<Option<Version>, SyncError> {
        self.request(|reply| Command::Flush { reply }).await?
    }

    pub async fn resolve_conflict(&self, strategy: ConflictResolution) -> Result<Version, SyncError> {
        self.request(|reply| Command::Resolve { strategy, reply })
            .await??
            .ok_or(SyncError::NoProject)
    }

    pub fn view(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    pub fn current(&self) -> SyncView {
        self.view.borrow().clone()
    }

    /// Stop the task, letting an in-flight write finish first.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| SyncError::SessionClosed)?;
        response.await.map_err(|_| SyncError::SessionClosed)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.try_send(Command::Shutdown);
        }
    }
}

pub fn spawn_session<S: SnapshotStore, F: SnapshotFeed>(
    config: SessionConfig,
    snapshots: Arc<S>,
    feed: Arc<F>,
) -> SessionHandle {
    let session = SyncSession::new(config, snapshots, feed);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
    let (view_tx, view_rx) = watch::channel(SyncView::capture(&session));

    let task = tokio::spawn(run_session(session, commands_rx, view_tx));
    SessionHandle { commands: commands_tx, view: view_rx, task: Some(task) }
}

async fn run_session<S: SnapshotStore, F: SnapshotFeed>(
    mut session: SyncSession<S, F>,
    mut commands: mpsc::Receiver<Command>,
    view_tx: watch::Sender<SyncView>,
) {
    let mut in_flight: Option<InFlight> = None;
    let mut deferred_flush: Option<WriteReply> = None;

    loop {
        publish_view(&view_tx, &session);
        let deadline = session.next_deadline().map(tokio::time::Instant::from_std);

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if matches!(command, Command::Shutdown) {
                    break;
                }
                handle_command(&mut session, &mut in_flight, &mut deferred_flush, command).await;
            }
            Some(event) = next_event(session.subscription_mut()) => {
                session.handle_remote_event(event);
            }
            (reply, joined) = join_in_flight(&mut in_flight) => {
                finish_write(&mut session, reply, joined);
                if let Some(reply) = deferred_flush.take() {
                    start_flush(&mut session, &mut in_flight, reply);
                }
            }
            () = sleep_until(deadline) => {
                if let Some(write) = session.tick_at(now()) {
                    in_flight = Some(spawn_write(session.snapshots(), write, None));
                }
            }
        }
    }

    if in_flight.is_some() {
        let (reply, joined) = join_in_flight(&mut in_flight).await;
        finish_write(&mut session, reply, joined);
    }
    if let Some(reply) = deferred_flush.take() {
        let _ = reply.send(Err(SyncError::SessionClosed));
    }
    session.close();
    publish_view(&view_tx, &session);
    info!("sync session stopped");
}

async fn handle_command<S: SnapshotStore, F: SnapshotFeed>(
    session: &mut SyncSession<S, F>,
    in_flight: &mut Option<InFlight>,
    deferred_flush: &mut Option<WriteReply>,
    command: Command,
) {
    match command {
        Command::OpenProject { project_id, reply } => {
            if let Some(waiter) = deferred_flush.take() {
                let _ = waiter.send(Err(SyncError::NoProject));
            }
            if let Some(previous) = in_flight.take() {
                previous.task.abort();
                if let Some(waiter) = previous.reply {
                    let _ = waiter.send(Err(SyncError::NoProject));
                }
            }
            let _ = reply.send(session.open_project(project_id).await);
        }
        Command::Edit { edit, reply } => {
            let _ = reply.send(session.edit_at(now(), edit));
        }
        Command::ApplyPatch { patch, reply } => {
            let _ = reply.send(session.apply_patch_at(now(), &patch));
        }
        Command::Flush { reply } if in_flight.is_some() => {
            // Runs once the current write completes; one waiter at a time.
            if deferred_flush.is_some() {
                let _ = reply.send(Err(SyncError::WriteInFlight));
            } else {
                *deferred_flush = Some(reply);
            }
        }
        Command::Flush { reply } => start_flush(session, in_flight, reply),
        Command::Resolve { strategy, reply } => match session.begin_resolution(now(), strategy) {
            Ok(ResolutionStep::Adopted { version }) => {
                let _ = reply.send(Ok(Some(version)));
            }
            Ok(ResolutionStep::Write(write)) => {
                *in_flight = Some(spawn_write(session.snapshots(), write, Some(reply)));
            }
            Err(error) => {
                let _ = reply.send(Err(error));
            }
        },
        Command::Shutdown => {}
    }
}

fn start_flush<S: SnapshotStore, F: SnapshotFeed>(
    session: &mut SyncSession<S, F>,
    in_flight: &mut Option<InFlight>,
    reply: WriteReply,
) {
    match session.flush() {
        Some(write) => *in_flight = Some(spawn_write(session.snapshots(), write, Some(reply))),
        None => {
            let _ = reply.send(Ok(None));
        }
    }
}

fn finish_write<S: SnapshotStore, F: SnapshotFeed>(
    session: &mut SyncSession<S, F>,
    reply: Option<WriteReply>,
    joined: Result<WriteResult, JoinError>,
) {
    let result = match joined {
        Ok((write, result)) => session.complete_write_at(now(), &write, result),
        Err(error) => {
            warn!(error = %error, "snapshot write task did not complete");
            session.abandon_write();
            Err(SyncError::SessionClosed)
        }
    };
    if let Some(reply) = reply {
        let _ = reply.send(result);
    } else if let Err(error) = result {
        debug!(error = %error, "autosave failed");
    }
}

fn spawn_write<S: SnapshotStore>(
    snapshots: &Arc<S>,
    write: PendingWrite,
    reply: Option<WriteReply>,
) -> InFlight {
    let snapshots = Arc::clone(snapshots);
    let task = tokio::spawn(async move {
        let result = write.execute(snapshots.as_ref()).await;
        (write, result)
    });
    InFlight { task, reply }
}

async fn join_in_flight(
    slot: &mut Option<InFlight>,
) -> (Option<WriteReply>, Result<WriteResult, JoinError>) {
    let Some(in_flight) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let joined = (&mut in_flight.task).await;
    let reply = slot.take().and_then(|in_flight| in_flight.reply);
    (reply, joined)
}

async fn next_event(subscription: Option<&mut Subscription>) -> Option<SnapshotEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

fn publish_view<S: SnapshotStore, F: SnapshotFeed>(
    view_tx: &watch::Sender<SyncView>,
    session: &SyncSession<S, F>,
) {
    let next = SyncView::capture(session);
    view_tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}
