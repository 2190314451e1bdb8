// Deterministic merge of two divergent graph documents.
//
// Three independent unions keyed by id; on collision the remote value
// wins. Edges whose endpoints did not survive the node union are dropped.
// Output order is first-insertion order: local ids first, then ids that
// only exist remotely, in remote order.

use std::collections::HashMap;

use crate::graph::{Edge, Gap, GraphDocument, Node};

/// Counts describing a merge, mostly for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub nodes: usize,
    pub edges: usize,
    pub gaps: usize,
    /// Edges removed because a source or target node is gone.
    pub dropped_edges: usize,
}

pub fn merge_graphs(local: &GraphDocument, remote: &GraphDocument) -> GraphDocument {
    merge_graphs_with_report(local, remote).0
}

pub fn merge_graphs_with_report(
    local: &GraphDocument,
    remote: &GraphDocument,
) -> (GraphDocument, MergeReport) {
    let nodes = union_by_id(&local.nodes, &remote.nodes, |node: &Node| node.id.as_str());

    let surviving = nodes.iter().map(|node| node.id.as_str()).collect();
    let mut edges = union_by_id(&local.edges, &remote.edges, |edge: &Edge| edge.id.as_str());
    let before = edges.len();
    edges.retain(|edge| edge.is_anchored_in(&surviving));
    let dropped_edges = before - edges.len();

    let gaps = union_by_id(&local.gaps, &remote.gaps, |gap: &Gap| gap.id.as_str());

    let report = MergeReport { nodes: nodes.len(), edges: edges.len(), gaps: gaps.len(), dropped_edges };
    (GraphDocument { nodes, edges, gaps }, report)
}

/// Insert `local` then `remote` into an id-keyed map that preserves the
/// position of the first insertion; later inserts overwrite the value.
fn union_by_id<T, F>(local: &[T], remote: &[T], key: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> &str,
{
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(local.len() + remote.len());
    let mut merged: Vec<T> = Vec::with_capacity(local.len() + remote.len());

    for item in local.iter().chain(remote) {
        match slots.get(key(item)) {
            Some(&index) => merged[index] = item.clone(),
            None => {
                slots.insert(key(item).to_owned(), merged.len());
                merged.push(item.clone());
            }
        }
    }

    merged
}
