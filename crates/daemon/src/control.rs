// Line-delimited JSON control protocol for `vibegraph-syncd`.
//
// One command object per stdin line, tagged by `cmd`:
//   {"cmd":"edit","edit":{"op":"add_node","node":{...}}}
//   {"cmd":"patch","patch":{"addedNodes":[...]}}
//   {"cmd":"flush"}
//   {"cmd":"resolve","strategy":"merge"}
//   {"cmd":"status"}
//   {"cmd":"quit"}

use serde::{Deserialize, Serialize};
use vibegraph_common::graph::patch::GraphPatch;
use vibegraph_common::sync::ConflictResolution;
use vibegraph_common::types::Version;

use crate::runtime::{SessionHandle, SyncView};
use crate::store::GraphEdit;
use crate::sync::SyncError;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    Edit { edit: GraphEdit },
    Patch { patch: GraphPatch },
    Flush,
    Resolve { strategy: ConflictResolution },
    Status,
    Quit,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Response line written for every command.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    Edited { created_id: Option<String> },
    Patched { changed: bool },
    Flushed { version: Option<Version> },
    Resolved { version: Version },
    Status { view: Box<SyncView> },
    Error { message: String },
}

impl From<SyncError> for ControlReply {
    fn from(error: SyncError) -> Self {
        Self::Error { message: error.to_string() }
    }
}

/// Run one command against the session. `Quit` is handled by the caller.
pub async fn dispatch(handle: &SessionHandle, command: ControlCommand) -> ControlReply {
    let result = match command {
        ControlCommand::Edit { edit } => {
            handle.edit(edit).await.map(|created_id| ControlReply::Edited { created_id })
        }
        ControlCommand::Patch { patch } => {
            handle.apply_patch(patch).await.map(|changed| ControlReply::Patched { changed })
        }
        ControlCommand::Flush => handle.flush().await.map(|version| ControlReply::Flushed { version }),
        ControlCommand::Resolve { strategy } => {
            handle.resolve_conflict(strategy).await.map(|version| ControlReply::Resolved { version })
        }
        ControlCommand::Status | ControlCommand::Quit => {
            Ok(ControlReply::Status { view: Box::new(handle.current()) })
        }
    };
    result.unwrap_or_else(ControlReply::from)
}
