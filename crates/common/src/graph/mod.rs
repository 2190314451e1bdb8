// Architecture graph model: nodes, edges and logic gaps.
//
// The JSON shape matches the `graph_data` column stored with every
// snapshot, so documents round-trip unchanged between clients.

pub mod patch;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type NodeId = String;
pub type EdgeId = String;
pub type GapId = String;

/// Errors raised by graph operations that reference missing or duplicate ids.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node `{0}` already exists")]
    DuplicateNode(NodeId),

    #[error("edge `{0}` already exists")]
    DuplicateEdge(EdgeId),

    #[error("node `{0}` does not exist")]
    UnknownNode(NodeId),

    #[error("edge `{0}` does not exist")]
    UnknownEdge(EdgeId),

    #[error("gap `{0}` does not exist")]
    UnknownGap(GapId),

    #[error("edge `{edge_id}` references missing node `{node_id}`")]
    DanglingEdge { edge_id: EdgeId, node_id: NodeId },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entity,
    Process,
    Gap,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub const fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Older snapshots may omit positions; those nodes land at the origin.
    #[serde(default)]
    pub position: Position,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            description: None,
            position: Position::origin(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRenderType {
    Default,
    #[default]
    Smoothstep,
    Step,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub render_type: EdgeRenderType,
}

impl Edge {
    pub fn new(
        id: impl Into<EdgeId>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            render_type: EdgeRenderType::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// True when both endpoints are contained in `node_ids`.
    pub fn is_anchored_in(&self, node_ids: &HashSet<&str>) -> bool {
        node_ids.contains(self.source.as_str()) && node_ids.contains(self.target.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A logic gap flagged in the architecture. `related_node_ids` is advisory
/// and never validated against the node set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub id: GapId,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub related_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub resolved: bool,
}

impl Gap {
    pub fn new(id: impl Into<GapId>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            severity,
            related_node_ids: Vec::new(),
            resolved: false,
        }
    }
}

/// Full graph state of one project at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub gaps: Vec<Gap>,
}

impl GraphDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.gaps.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.id == id)
    }

    pub fn gap(&self, id: &str) -> Option<&Gap> {
        self.gaps.iter().find(|gap| gap.id == id)
    }

    pub fn gap_mut(&mut self, id: &str) -> Option<&mut Gap> {
        self.gaps.iter_mut().find(|gap| gap.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|node| node.id.as_str()).collect()
    }

    /// Report duplicate node/edge ids and edges whose endpoints are missing.
    pub fn validate(&self) -> Vec<GraphError> {
        let mut problems = Vec::new();

        let mut seen_nodes = HashSet::new();
        for node in &self.nodes {
            if !seen_nodes.insert(node.id.as_str()) {
                problems.push(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        let mut seen_edges = HashSet::new();
        for edge in &self.edges {
            if !seen_edges.insert(edge.id.as_str()) {
                problems.push(GraphError::DuplicateEdge(edge.id.clone()));
            }
            for endpoint in [&edge.source, &edge.target] {
                if !seen_nodes.contains(endpoint.as_str()) {
                    problems.push(GraphError::DanglingEdge {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> GraphDocument {
        GraphDocument {
            nodes: vec![
                Node::new("a", NodeKind::Entity, "User").at(Position::new(10.0, 20.0)),
                Node::new("b", NodeKind::Process, "Checkout").with_description("pays"),
            ],
            edges: vec![Edge::new("a-b", "a", "b").with_label("starts")],
            gaps: vec![Gap::new("g1", "who refunds?", Severity::High)],
        }
    }

    #[test]
    fn serializes_to_stored_graph_data_shape() {
        let value = serde_json::to_value(sample()).expect("document should serialize");

        assert_eq!(value["nodes"][0]["type"], "entity");
        assert_eq!(value["nodes"][0]["position"], json!({ "x": 10.0, "y": 20.0 }));
        assert!(value["nodes"][0].get("description").is_none());
        assert_eq!(value["edges"][0]["type"], "smoothstep");
        assert_eq!(value["gaps"][0]["relatedNodeIds"], json!([]));
        assert_eq!(value["gaps"][0]["severity"], "high");
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let doc: GraphDocument = serde_json::from_value(json!({
            "nodes": [{ "id": "a", "type": "process", "label": "A" }],
            "edges": [{ "id": "e", "source": "a", "target": "a" }],
            "gaps": [{ "id": "g", "description": "d", "severity": "low", "relatedNodeIds": [] }]
        }))
        .expect("legacy payload should parse");

        assert_eq!(doc.nodes[0].position, Position::origin());
        assert_eq!(doc.edges[0].render_type, EdgeRenderType::Smoothstep);
        assert!(!doc.gaps[0].resolved);
    }

    #[test]
    fn empty_object_parses_as_empty_document() {
        let doc: GraphDocument = serde_json::from_str("{}").expect("empty payload should parse");
        assert!(doc.is_empty());
    }

    #[test]
    fn validate_accepts_consistent_document() {
        assert!(sample().validate().is_empty());
    }

    #[test]
    fn validate_reports_duplicates_and_dangling_edges() {
        let mut doc = sample();
        doc.nodes.push(Node::new("a", NodeKind::Entity, "dup"));
        doc.edges.push(Edge::new("b-z", "b", "z"));

        let problems = doc.validate();
        assert!(problems.contains(&GraphError::DuplicateNode("a".into())));
        assert!(problems.contains(&GraphError::DanglingEdge {
            edge_id: "b-z".into(),
            node_id: "z".into()
        }));
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn edge_anchoring_requires_both_endpoints() {
        let doc = sample();
        let ids = doc.node_ids();
        assert!(Edge::new("x", "a", "b").is_anchored_in(&ids));
        assert!(!Edge::new("x", "a", "c").is_anchored_in(&ids));
    }
}
