// Realtime change listener: decides whether an appended snapshot from the
// feed may overwrite the local document.

use vibegraph_common::sync::{SnapshotEvent, SyncStatus};
use vibegraph_common::types::{ProjectId, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerDecision {
    /// Replace the local document with the event's graph.
    Apply,
    /// Event belongs to a project other than the active one.
    IgnoreForeignProject,
    /// Our own write echoed back, or an older snapshot.
    IgnoreStale,
    /// A write is in flight or a conflict is unresolved.
    IgnoreBusy,
}

impl ListenerDecision {
    pub const fn is_apply(self) -> bool {
        matches!(self, Self::Apply)
    }
}

pub fn evaluate(
    event: &SnapshotEvent,
    active_project: Option<ProjectId>,
    local_version: Version,
    status: SyncStatus,
    has_conflict: bool,
) -> ListenerDecision {
    if active_project != Some(event.project_id) {
        return ListenerDecision::IgnoreForeignProject;
    }
    if event.version <= local_version {
        return ListenerDecision::IgnoreStale;
    }
    if has_conflict || matches!(status, SyncStatus::Saving | SyncStatus::Conflict) {
        return ListenerDecision::IgnoreBusy;
    }
    ListenerDecision::Apply
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vibegraph_common::graph::GraphDocument;

    fn event(project_id: ProjectId, version: Version) -> SnapshotEvent {
        SnapshotEvent { project_id, version, graph_data: GraphDocument::new(), created_at: Utc::now() }
    }

    #[test]
    fn newer_event_applies_when_idle() {
        let project = ProjectId::new();
        for status in [SyncStatus::Idle, SyncStatus::Saved, SyncStatus::Error] {
            assert_eq!(evaluate(&event(project, 4), Some(project), 3, status, false), ListenerDecision::Apply);
        }
    }

    #[test]
    fn echo_and_older_events_are_stale() {
        let project = ProjectId::new();
        assert_eq!(
            evaluate(&event(project, 3), Some(project), 3, SyncStatus::Idle, false),
            ListenerDecision::IgnoreStale
        );
        assert_eq!(
            evaluate(&event(project, 1), Some(project), 3, SyncStatus::Idle, false),
            ListenerDecision::IgnoreStale
        );
    }

    #[test]
    fn saving_or_conflict_blocks_overwrite() {
        let project = ProjectId::new();
        assert_eq!(
            evaluate(&event(project, 9), Some(project), 3, SyncStatus::Saving, false),
            ListenerDecision::IgnoreBusy
        );
        assert_eq!(
            evaluate(&event(project, 9), Some(project), 3, SyncStatus::Conflict, true),
            ListenerDecision::IgnoreBusy
        );
        // A failed resolution leaves status=error but the conflict open.
        assert_eq!(
            evaluate(&event(project, 9), Some(project), 3, SyncStatus::Error, true),
            ListenerDecision::IgnoreBusy
        );
    }

    #[test]
    fn other_projects_and_closed_sessions_are_ignored() {
        let project = ProjectId::new();
        assert_eq!(
            evaluate(&event(ProjectId::new(), 9), Some(project), 0, SyncStatus::Idle, false),
            ListenerDecision::IgnoreForeignProject
        );
        assert_eq!(
            evaluate(&event(project, 9), None, 0, SyncStatus::Idle, false),
            ListenerDecision::IgnoreForeignProject
        );
    }
}
