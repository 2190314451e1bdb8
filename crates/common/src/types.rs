// Core domain types shared across all vibegraph crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::GraphDocument;

/// Snapshot version. Versions start at 1; 0 means "nothing persisted yet".
pub type Version = i64;

/// Identifier of the project whose graph is being edited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ProjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Immutable, append-only persisted copy of a project's graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub project_id: ProjectId,
    pub version: Version,
    pub graph_data: GraphDocument,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_parses_and_displays_as_uuid() {
        let id = ProjectId::new();
        let parsed: ProjectId = id.to_string().parse().expect("uuid should parse");
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ProjectId>().is_err());
    }

    #[test]
    fn project_id_serializes_transparently() {
        let id = ProjectId::new();
        let json = serde_json::to_string(&id).expect("id should serialize");
        assert_eq!(json, format!("\"{}\"", id.0));
    }
}
