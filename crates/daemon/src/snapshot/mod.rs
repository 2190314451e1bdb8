// Snapshot storage API consumed by the sync engine.
//
// Snapshots are append-only; the backend assigns versions (1, 2, 3, ...
// per project) so two clients can never pick the same number. Backends
// are abstracted via `SnapshotStore` for testing.

pub mod memory;
pub mod sqlite;

use std::future::Future;

use thiserror::Error;
use vibegraph_common::graph::GraphDocument;
use vibegraph_common::types::{ProjectId, Snapshot, Version};

pub use memory::MemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode or decode graph data: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt snapshot row: {0}")]
    Corrupt(String),

    #[error("snapshot store lock poisoned")]
    Poisoned,
}

/// Result of a conditional append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The snapshot was stored under this version.
    Appended(Version),
    /// The latest version was not the expected one; nothing was written.
    VersionMismatch { latest: Option<Snapshot> },
}

/// Abstraction over the server-side snapshot table.
///
/// All methods return `Send` futures so a write can run on its own task
/// while the session keeps processing realtime events.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Append a snapshot unconditionally; returns the assigned version.
    fn append(
        &self,
        project_id: ProjectId,
        graph: &GraphDocument,
    ) -> impl Future<Output = Result<Version, SnapshotStoreError>> + Send;

    /// Append only if the current latest version equals `expected_latest`
    /// (0 = no snapshot yet). Check and append happen atomically.
    fn append_if(
        &self,
        project_id: ProjectId,
        expected_latest: Version,
        graph: &GraphDocument,
    ) -> impl Future<Output = Result<AppendOutcome, SnapshotStoreError>> + Send;

    /// Latest snapshot by version, if any.
    fn latest(
        &self,
        project_id: ProjectId,
    ) -> impl Future<Output = Result<Option<Snapshot>, SnapshotStoreError>> + Send;

    /// Snapshots with a version greater than `after`, oldest first.
    fn list_after(
        &self,
        project_id: ProjectId,
        after: Version,
    ) -> impl Future<Output = Result<Vec<Snapshot>, SnapshotStoreError>> + Send;
}
