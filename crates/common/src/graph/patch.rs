// Batch of graph changes produced outside the editor (chat assistant).
//
// A patch is applied as one atomic local mutation: removals first, then
// upserts by id, then gap resolutions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{Edge, EdgeId, Gap, GapId, GraphDocument, Node, NodeId, NodeKind, Position};

/// Node as proposed by an external collaborator; the position is optional
/// because the assistant rarely lays out the graph itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl From<Node> for PatchNode {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            kind: node.kind,
            label: node.label,
            description: node.description,
            position: Some(node.position),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphPatch {
    pub added_nodes: Vec<PatchNode>,
    pub added_edges: Vec<Edge>,
    pub added_gaps: Vec<Gap>,
    pub removed_node_ids: Vec<NodeId>,
    pub removed_edge_ids: Vec<EdgeId>,
    pub resolved_gap_ids: Vec<GapId>,
}

impl GraphPatch {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.added_gaps.is_empty()
            && self.removed_node_ids.is_empty()
            && self.removed_edge_ids.is_empty()
            && self.resolved_gap_ids.is_empty()
    }

    /// Apply the patch in place.
    ///
    /// Removing a node does not cascade to its edges; any edge left dangling
    /// is dropped the next time the document goes through a merge.
    pub fn apply_to(&self, doc: &mut GraphDocument) {
        if !self.removed_node_ids.is_empty() {
            let removed: HashSet<&str> = self.removed_node_ids.iter().map(String::as_str).collect();
            doc.nodes.retain(|node| !removed.contains(node.id.as_str()));
        }

        if !self.removed_edge_ids.is_empty() {
            let removed: HashSet<&str> = self.removed_edge_ids.iter().map(String::as_str).collect();
            doc.edges.retain(|edge| !removed.contains(edge.id.as_str()));
        }

        for incoming in &self.added_nodes {
            match doc.node_mut(&incoming.id) {
                Some(existing) => {
                    // Layout is owned by the editor; keep where the user put it.
                    existing.kind = incoming.kind;
                    existing.label = incoming.label.clone();
                    existing.description = incoming.description.clone();
                }
                None => doc.nodes.push(Node {
                    id: incoming.id.clone(),
                    kind: incoming.kind,
                    label: incoming.label.clone(),
                    description: incoming.description.clone(),
                    position: incoming.position.unwrap_or_else(Position::origin),
                }),
            }
        }

        for incoming in &self.added_edges {
            match doc.edges.iter_mut().find(|edge| edge.id == incoming.id) {
                Some(existing) => *existing = incoming.clone(),
                None => doc.edges.push(incoming.clone()),
            }
        }

        for incoming in &self.added_gaps {
            match doc.gap_mut(&incoming.id) {
                Some(existing) => *existing = incoming.clone(),
                None => doc.gaps.push(incoming.clone()),
            }
        }

        for gap_id in &self.resolved_gap_ids {
            if let Some(gap) = doc.gap_mut(gap_id) {
                gap.resolved = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Severity;
    use serde_json::json;

    fn base() -> GraphDocument {
        GraphDocument {
            nodes: vec![
                Node::new("a", NodeKind::Entity, "A").at(Position::new(5.0, 5.0)),
                Node::new("b", NodeKind::Entity, "B"),
            ],
            edges: vec![Edge::new("a-b", "a", "b")],
            gaps: vec![Gap::new("g1", "open question", Severity::Medium)],
        }
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(GraphPatch::default().is_empty());
        let patch = GraphPatch { resolved_gap_ids: vec!["g1".into()], ..Default::default() };
        assert!(!patch.is_empty());
    }

    #[test]
    fn upsert_keeps_existing_position() {
        let mut doc = base();
        let patch = GraphPatch {
            added_nodes: vec![PatchNode {
                id: "a".into(),
                kind: NodeKind::Process,
                label: "A2".into(),
                description: Some("renamed".into()),
                position: Some(Position::new(99.0, 99.0)),
            }],
            ..Default::default()
        };

        patch.apply_to(&mut doc);

        let node = doc.node("a").expect("node should remain");
        assert_eq!(node.label, "A2");
        assert_eq!(node.kind, NodeKind::Process);
        assert_eq!(node.position, Position::new(5.0, 5.0));
        assert_eq!(doc.nodes.len(), 2);
    }

    #[test]
    fn new_node_without_position_lands_at_origin() {
        let mut doc = base();
        let patch = GraphPatch {
            added_nodes: vec![PatchNode {
                id: "c".into(),
                kind: NodeKind::Gap,
                label: "C".into(),
                description: None,
                position: None,
            }],
            ..Default::default()
        };

        patch.apply_to(&mut doc);

        assert_eq!(doc.node("c").map(|node| node.position), Some(Position::origin()));
    }

    #[test]
    fn removals_run_before_upserts() {
        let mut doc = base();
        let patch = GraphPatch {
            removed_node_ids: vec!["a".into()],
            added_nodes: vec![PatchNode {
                id: "a".into(),
                kind: NodeKind::Entity,
                label: "A again".into(),
                description: None,
                position: None,
            }],
            ..Default::default()
        };

        patch.apply_to(&mut doc);

        let node = doc.node("a").expect("node should be re-added");
        assert_eq!(node.label, "A again");
        assert_eq!(node.position, Position::origin());
    }

    #[test]
    fn node_removal_leaves_edges_untouched() {
        let mut doc = base();
        let patch = GraphPatch { removed_node_ids: vec!["b".into()], ..Default::default() };

        patch.apply_to(&mut doc);

        assert!(doc.node("b").is_none());
        assert!(doc.edge("a-b").is_some());
    }

    #[test]
    fn edges_and_gaps_are_replaced_in_place() {
        let mut doc = base();
        let mut gap = Gap::new("g1", "clarified", Severity::Low);
        gap.related_node_ids = vec!["a".into()];
        let patch = GraphPatch {
            added_edges: vec![Edge::new("a-b", "b", "a").with_label("reversed")],
            added_gaps: vec![gap.clone()],
            removed_edge_ids: vec!["missing".into()],
            ..Default::default()
        };

        patch.apply_to(&mut doc);

        assert_eq!(doc.edges.len(), 1);
        assert_eq!(doc.edges[0].source, "b");
        assert_eq!(doc.gaps, vec![gap]);
    }

    #[test]
    fn resolves_listed_gaps_and_ignores_unknown_ids() {
        let mut doc = base();
        let patch = GraphPatch {
            resolved_gap_ids: vec!["g1".into(), "nope".into()],
            ..Default::default()
        };

        patch.apply_to(&mut doc);

        assert!(doc.gap("g1").is_some_and(|gap| gap.resolved));
    }

    #[test]
    fn parses_assistant_payload() {
        let patch: GraphPatch = serde_json::from_value(json!({
            "addedNodes": [{ "id": "n", "type": "entity", "label": "N" }],
            "removedEdgeIds": ["e1"]
        }))
        .expect("partial patch should parse");

        assert_eq!(patch.added_nodes.len(), 1);
        assert_eq!(patch.removed_edge_ids, vec!["e1".to_string()]);
        assert!(patch.added_gaps.is_empty());
    }
}
