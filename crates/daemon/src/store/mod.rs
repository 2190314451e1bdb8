// In-memory graph document for the active project.
//
// All local edits go through `GraphStore` so that the mutation tracker
// is stamped as a side effect; there is no way to change the document
// silently. Remote state is installed with `replace_from_remote`, which
// leaves the tracker alone.

pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vibegraph_common::graph::patch::GraphPatch;
use vibegraph_common::graph::{
    Edge, EdgeId, EdgeRenderType, GraphDocument, GraphError, Node, NodeId, NodeKind, Position,
};

pub use tracker::MutationTracker;

/// Serializable local edit, used by the session runtime and the daemon's
/// command stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphEdit {
    AddNode { node: Node },
    UpdateNode { id: NodeId, label: String, description: Option<String> },
    DeleteNode { id: NodeId },
    MoveNode { id: NodeId, position: Position },
    AddEdge { source: NodeId, target: NodeId, label: Option<String> },
    DeleteEdge { id: EdgeId },
    ResolveGap { id: String },
    ApplyPatch { patch: GraphPatch },
}

#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    document: GraphDocument,
    tracker: MutationTracker,
    generation: u64,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &GraphDocument {
        &self.document
    }

    pub fn tracker(&self) -> &MutationTracker {
        &self.tracker
    }

    /// Revision of the last local mutation (0 when untouched).
    pub fn revision(&self) -> u64 {
        self.tracker.revision()
    }

    pub fn last_local_mutation_at(&self) -> Option<DateTime<Utc>> {
        self.tracker.last_local_mutation_at()
    }

    /// Count of every write to the document, local or remote.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Install a document that came from the server. Not a local mutation.
    pub fn replace_from_remote(&mut self, document: GraphDocument) {
        self.document = document;
        self.generation += 1;
    }

    pub fn apply_edit(&mut self, edit: GraphEdit) -> Result<Option<String>, GraphError> {
        match edit {
            GraphEdit::AddNode { node } => {
                let id = node.id.clone();
                self.insert_node(node).map(|()| Some(id))
            }
            GraphEdit::UpdateNode { id, label, description } => {
                self.update_node(&id, label, description).map(|()| None)
            }
            GraphEdit::DeleteNode { id } => self.delete_node(&id).map(|()| None),
            GraphEdit::MoveNode { id, position } => self.move_node(&id, position).map(|()| None),
            GraphEdit::AddEdge { source, target, label } => {
                self.add_edge(&source, &target, label).map(Some)
            }
            GraphEdit::DeleteEdge { id } => self.delete_edge(&id).map(|()| None),
            GraphEdit::ResolveGap { id } => self.resolve_gap(&id).map(|()| None),
            GraphEdit::ApplyPatch { patch } => {
                self.apply_patch(&patch);
                Ok(None)
            }
        }
    }

    /// Create a node with a fresh id and return that id.
    pub fn add_node(
        &mut self,
        kind: NodeKind,
        label: impl Into<String>,
        description: Option<String>,
        position: Position,
    ) -> NodeId {
        let node = Node {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            description,
            position,
        };
        let id = node.id.clone();
        self.document.nodes.push(node);
        self.touch();
        id
    }

    pub fn insert_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.document.contains_node(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.document.nodes.push(node);
        self.touch();
        Ok(())
    }

    /// Relabel a node. A `None` description keeps the current one.
    pub fn update_node(
        &mut self,
        id: &str,
        label: impl Into<String>,
        description: Option<String>,
    ) -> Result<(), GraphError> {
        let node =
            self.document.node_mut(id).ok_or_else(|| GraphError::UnknownNode(id.to_owned()))?;
        node.label = label.into();
        if description.is_some() {
            node.description = description;
        }
        self.touch();
        Ok(())
    }

    /// Remove a node together with every edge touching it.
    pub fn delete_node(&mut self, id: &str) -> Result<(), GraphError> {
        if !self.document.contains_node(id) {
            return Err(GraphError::UnknownNode(id.to_owned()));
        }
        self.document.nodes.retain(|node| node.id != id);
        self.document.edges.retain(|edge| edge.source != id && edge.target != id);
        self.touch();
        Ok(())
    }

    /// Drag updates count as mutations so positions survive a reload.
    pub fn move_node(&mut self, id: &str, position: Position) -> Result<(), GraphError> {
        let node =
            self.document.node_mut(id).ok_or_else(|| GraphError::UnknownNode(id.to_owned()))?;
        node.position = position;
        self.touch();
        Ok(())
    }

    /// Connect two existing nodes. Returns the generated edge id.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        label: Option<String>,
    ) -> Result<EdgeId, GraphError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let edge = Edge {
            id: format!("{source}-{target}-{}", &suffix[..8]),
            source: source.to_owned(),
            target: target.to_owned(),
            label,
            render_type: EdgeRenderType::Smoothstep,
        };
        let id = edge.id.clone();
        self.insert_edge(edge)?;
        Ok(id)
    }

    pub fn insert_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if self.document.edge(&edge.id).is_some() {
            return Err(GraphError::DuplicateEdge(edge.id));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !self.document.contains_node(endpoint) {
                return Err(GraphError::UnknownNode(endpoint.clone()));
            }
        }
        self.document.edges.push(edge);
        self.touch();
        Ok(())
    }

    pub fn delete_edge(&mut self, id: &str) -> Result<(), GraphError> {
        if self.document.edge(id).is_none() {
            return Err(GraphError::UnknownEdge(id.to_owned()));
        }
        self.document.edges.retain(|edge| edge.id != id);
        self.touch();
        Ok(())
    }

    pub fn resolve_gap(&mut self, id: &str) -> Result<(), GraphError> {
        let gap = self.document.gap_mut(id).ok_or_else(|| GraphError::UnknownGap(id.to_owned()))?;
        gap.resolved = true;
        self.touch();
        Ok(())
    }

    /// Apply an external batch as a single mutation. Returns false (and
    /// records nothing) for an empty patch.
    pub fn apply_patch(&mut self, patch: &GraphPatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        patch.apply_to(&mut self.document);
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.tracker.record();
        self.generation += 1;
    }
}
