// Optimistic snapshot writer.
//
// A `PendingWrite` is a frozen copy of everything one persistence attempt
// needs. `execute` does the storage I/O and nothing else; the session
// applies the outcome afterwards, which lets realtime events keep flowing
// while the write is outstanding.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vibegraph_common::graph::GraphDocument;
use vibegraph_common::types::{ProjectId, Version};

use crate::snapshot::{AppendOutcome, SnapshotStore, SnapshotStoreError};

/// Retries of `append_if` when the store moved but not past our version.
const MAX_CONDITIONAL_ATTEMPTS: usize = 3;

/// How autosave guards against concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Atomic compare-and-append via `append_if`.
    #[default]
    ConditionalAppend,
    /// Read `latest`, compare, then `append`. Leaves a window between the
    /// read and the append in which another writer can slip in.
    CheckThenAppend,
}

impl WriteMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConditionalAppend => "conditional_append",
            Self::CheckThenAppend => "check_then_append",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Debounced save of local edits; subject to the version check.
    Autosave,
    /// Conflict resolution that overwrites remote with the local graph.
    KeepLocal,
    /// Conflict resolution that writes the merged graph.
    Merge,
}

impl WriteKind {
    pub const fn checks_version(self) -> bool {
        matches!(self, Self::Autosave)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Autosave => "autosave",
            Self::KeepLocal => "keep_local",
            Self::Merge => "merge",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Appended { version: Version },
    Conflict { remote_version: Version, remote_graph: GraphDocument },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub project_id: ProjectId,
    /// Session epoch at the time the write started.
    pub epoch: u64,
    pub kind: WriteKind,
    pub local_version: Version,
    pub graph: GraphDocument,
    /// Store revision the graph was captured at.
    pub revision: u64,
    pub mode: WriteMode,
}

impl PendingWrite {
    pub async fn execute<S: SnapshotStore>(
        &self,
        store: &S,
    ) -> Result<WriteOutcome, SnapshotStoreError> {
        let project_id = self.project_id;
        let result = if !self.kind.checks_version() {
            store
                .append(project_id, &self.graph)
                .await
                .map(|version| WriteOutcome::Appended { version })
        } else {
            match self.mode {
                WriteMode::ConditionalAppend => self.conditional_append(store).await,
                WriteMode::CheckThenAppend => self.check_then_append(store).await,
            }
        };

        match &result {
            Ok(WriteOutcome::Appended { version }) => {
                info!(%project_id, kind = self.kind.as_str(), version, "snapshot appended");
            }
            Ok(WriteOutcome::Conflict { remote_version, .. }) => {
                warn!(
                    %project_id,
                    local_version = self.local_version,
                    remote_version,
                    "remote snapshot is ahead; write skipped"
                );
            }
            Err(error) => {
                warn!(%project_id, kind = self.kind.as_str(), error = %error, "snapshot write failed");
            }
        }
        result
    }

    async fn check_then_append<S: SnapshotStore>(
        &self,
        store: &S,
    ) -> Result<WriteOutcome, SnapshotStoreError> {
        let latest = store.latest(self.project_id).await?;
        if let Some(remote) = latest.filter(|snapshot| snapshot.version > self.local_version) {
            return Ok(WriteOutcome::Conflict {
                remote_version: remote.version,
                remote_graph: remote.graph_data,
            });
        }

        let version = store.append(self.project_id, &self.graph).await?;
        Ok(WriteOutcome::Appended { version })
    }

    async fn conditional_append<S: SnapshotStore>(
        &self,
        store: &S,
    ) -> Result<WriteOutcome, SnapshotStoreError> {
        let mut expected = self.local_version;
        for _ in 0..MAX_CONDITIONAL_ATTEMPTS {
            match store.append_if(self.project_id, expected, &self.graph).await? {
                AppendOutcome::Appended(version) => return Ok(WriteOutcome::Appended { version }),
                AppendOutcome::VersionMismatch { latest } => {
                    let remote_version = latest.as_ref().map_or(0, |snapshot| snapshot.version);
                    if remote_version > self.local_version {
                        let remote_graph =
                            latest.map(|snapshot| snapshot.graph_data).unwrap_or_default();
                        return Ok(WriteOutcome::Conflict { remote_version, remote_graph });
                    }
                    // The store is behind what we have seen; we are still the
                    // newest writer, so append on top of whatever is there.
                    debug!(
                        project_id = %self.project_id,
                        local_version = self.local_version,
                        remote_version,
                        "remote behind local version, retrying conditional append"
                    );
                    expected = remote_version;
                }
            }
        }
        Err(SnapshotStoreError::Unavailable(format!(
            "conditional append did not settle after {MAX_CONDITIONAL_ATTEMPTS} attempts"
        )))
    }
}
