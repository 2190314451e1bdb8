// Conflict resolver: turns a user's choice into either an adoption of
// remote state or a snapshot write.

use tracing::info;
use vibegraph_common::graph::GraphDocument;
use vibegraph_common::merge::merge_graphs_with_report;
use vibegraph_common::sync::{ConflictData, ConflictResolution};
use vibegraph_common::types::Version;

use super::writer::WriteKind;

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionPlan {
    /// Install `graph` at `version` locally; nothing is written.
    Adopt { graph: GraphDocument, version: Version },
    /// Append `graph` as a new snapshot without a version check.
    Persist { kind: WriteKind, graph: GraphDocument },
}

pub fn plan_resolution(conflict: &ConflictData, strategy: ConflictResolution) -> ResolutionPlan {
    match strategy {
        ConflictResolution::LoadRemote => ResolutionPlan::Adopt {
            graph: conflict.remote_graph.clone(),
            version: conflict.remote_version,
        },
        ConflictResolution::KeepLocal => {
            ResolutionPlan::Persist { kind: WriteKind::KeepLocal, graph: conflict.local_graph.clone() }
        }
        ConflictResolution::Merge => {
            let (graph, report) =
                merge_graphs_with_report(&conflict.local_graph, &conflict.remote_graph);
            info!(
                local_version = conflict.local_version,
                remote_version = conflict.remote_version,
                nodes = report.nodes,
                edges = report.edges,
                gaps = report.gaps,
                dropped_edges = report.dropped_edges,
                "merged conflicting graphs"
            );
            ResolutionPlan::Persist { kind: WriteKind::Merge, graph }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibegraph_common::graph::{Edge, Node, NodeKind};

    fn conflict() -> ConflictData {
        ConflictData {
            local_version: 1,
            remote_version: 2,
            local_graph: GraphDocument {
                nodes: vec![Node::new("A", NodeKind::Entity, "A"), Node::new("B", NodeKind::Entity, "B")],
                edges: vec![Edge::new("A-B", "A", "B")],
                gaps: vec![],
            },
            remote_graph: GraphDocument {
                nodes: vec![Node::new("B", NodeKind::Entity, "B"), Node::new("C", NodeKind::Process, "C")],
                edges: vec![Edge::new("B-C", "B", "C")],
                gaps: vec![],
            },
        }
    }

    #[test]
    fn load_remote_adopts_remote_version() {
        let conflict = conflict();
        assert_eq!(
            plan_resolution(&conflict, ConflictResolution::LoadRemote),
            ResolutionPlan::Adopt { graph: conflict.remote_graph.clone(), version: 2 }
        );
    }

    #[test]
    fn keep_local_persists_captured_local_graph() {
        let conflict = conflict();
        assert_eq!(
            plan_resolution(&conflict, ConflictResolution::KeepLocal),
            ResolutionPlan::Persist { kind: WriteKind::KeepLocal, graph: conflict.local_graph.clone() }
        );
    }

    #[test]
    fn merge_persists_union_of_both_sides() {
        let ResolutionPlan::Persist { kind, graph } =
            plan_resolution(&conflict(), ConflictResolution::Merge)
        else {
            panic!("merge should persist");
        };

        assert_eq!(kind, WriteKind::Merge);
        let node_ids: Vec<_> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        let edge_ids: Vec<_> = graph.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(node_ids, vec!["A", "B", "C"]);
        assert_eq!(edge_ids, vec!["A-B", "B-C"]);
    }
}
