// Sync status, conflict payloads and realtime events exchanged between
// the sync engine and its UI / feed collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::GraphDocument;
use crate::types::{ProjectId, Snapshot, Version};

/// Persistence state shown by the status indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
    Conflict,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Error => "error",
            Self::Conflict => "conflict",
        }
    }
}

/// Divergence captured when the server moved past the client's version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    pub local_version: Version,
    pub remote_version: Version,
    pub local_graph: GraphDocument,
    pub remote_graph: GraphDocument,
}

/// User-selected way out of a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepLocal,
    LoadRemote,
    Merge,
}

impl ConflictResolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::LoadRemote => "load_remote",
            Self::Merge => "merge",
        }
    }
}

/// Realtime notification for a newly appended snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvent {
    pub project_id: ProjectId,
    pub version: Version,
    pub graph_data: GraphDocument,
    pub created_at: DateTime<Utc>,
}

impl From<Snapshot> for SnapshotEvent {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            project_id: snapshot.project_id,
            version: snapshot.version,
            graph_data: snapshot.graph_data,
            created_at: snapshot.created_at,
        }
    }
}
