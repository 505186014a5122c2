//! Ownership graph - parent/child edges between native objects.
//!
//! Uses `petgraph::StableDiGraph` with:
//! - Nodes: `NativeHandle` of every object that has, or had, a parent or children
//! - Edges: parent -> child
//!
//! Node indices stay valid across removals, so the handle map never needs
//! rebuilding. Each node has at most one incoming edge; the graph is a forest.
//!
//! The graph only stores structure. Which edges imply that a parent keeps
//! its child's wrapper alive is decided by the ownership arbiter.

use objbridge_core::{BridgeError, BridgeResult, NativeHandle, ReparentReason};
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;

/// Forest of native ownership relations.
#[derive(Debug, Default)]
pub struct OwnershipGraph {
    graph: StableDiGraph<NativeHandle, ()>,
    nodes: FxHashMap<NativeHandle, NodeIndex>,
}

impl OwnershipGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, handle: NativeHandle) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(&handle) {
            return idx;
        }
        let idx = self.graph.add_node(handle);
        self.nodes.insert(handle, idx);
        idx
    }

    /// Check that `child` may be placed under `parent`.
    ///
    /// Walks the ancestor chain of `parent` upward, at most `max_depth` steps.
    /// Reaching `child` means the edge would close a cycle.
    pub fn check_reparent(
        &self,
        child: NativeHandle,
        parent: NativeHandle,
        max_depth: usize,
    ) -> BridgeResult<()> {
        let reject = |reason| {
            Err(BridgeError::InvalidReparenting {
                child,
                parent,
                reason,
            })
        };

        if child == parent {
            return reject(ReparentReason::SelfParent);
        }

        let mut current = Some(parent);
        let mut depth = 0;
        while let Some(handle) = current {
            if handle == child {
                return reject(ReparentReason::Cycle);
            }
            if depth >= max_depth {
                return reject(ReparentReason::DepthExceeded);
            }
            depth += 1;
            current = self.parent(handle);
        }
        Ok(())
    }

    /// Place `child` under `parent`, replacing any previous parent.
    ///
    /// Returns the previous parent. Validates with [`check_reparent`] first
    /// and leaves the graph unchanged on error.
    ///
    /// [`check_reparent`]: OwnershipGraph::check_reparent
    pub fn set_parent(
        &mut self,
        child: NativeHandle,
        parent: NativeHandle,
        max_depth: usize,
    ) -> BridgeResult<Option<NativeHandle>> {
        self.check_reparent(child, parent, max_depth)?;

        let previous = self.clear_parent(child);
        let child_idx = self.node(child);
        let parent_idx = self.node(parent);
        self.graph.add_edge(parent_idx, child_idx, ());
        Ok(previous)
    }

    /// Detach `child` from its parent. Returns the former parent.
    pub fn clear_parent(&mut self, child: NativeHandle) -> Option<NativeHandle> {
        let child_idx = *self.nodes.get(&child)?;
        let edge = self
            .graph
            .edges_directed(child_idx, Direction::Incoming)
            .next()
            .map(|e| e.id())?;
        let (parent_idx, _) = self.graph.edge_endpoints(edge)?;
        self.graph.remove_edge(edge);
        let parent = self.graph.node_weight(parent_idx).copied();
        self.prune(child_idx);
        self.prune(parent_idx);
        parent
    }

    /// Current parent of `handle`.
    pub fn parent(&self, handle: NativeHandle) -> Option<NativeHandle> {
        let idx = *self.nodes.get(&handle)?;
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .next()
            .and_then(|p| self.graph.node_weight(p).copied())
    }

    /// Direct children of `handle` in the order they were attached.
    pub fn children(&self, handle: NativeHandle) -> Vec<NativeHandle> {
        let Some(&idx) = self.nodes.get(&handle) else {
            return Vec::new();
        };
        // petgraph walks adjacency lists newest first
        let mut children: Vec<NativeHandle> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter_map(|c| self.graph.node_weight(c).copied())
            .collect();
        children.reverse();
        children
    }

    /// Whether `handle` has any children.
    pub fn has_children(&self, handle: NativeHandle) -> bool {
        self.nodes.get(&handle).is_some_and(|&idx| {
            self.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .next()
                .is_some()
        })
    }

    /// `root` followed by all of its descendants, parents before children.
    ///
    /// Siblings appear in attachment order, which is also the order a
    /// cascading destruction visits them.
    pub fn descendants_preorder(&self, root: NativeHandle) -> Vec<NativeHandle> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            order.push(handle);
            let mut children = self.children(handle);
            children.reverse();
            stack.extend(children);
        }
        order
    }

    /// Remove `handle` and every edge touching it.
    ///
    /// Former children become roots. Returns them in attachment order.
    pub fn remove(&mut self, handle: NativeHandle) -> Vec<NativeHandle> {
        let orphans = self.children(handle);
        if let Some(idx) = self.nodes.remove(&handle) {
            let parent = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .next();
            self.graph.remove_node(idx);
            if let Some(parent) = parent {
                self.prune(parent);
            }
            for orphan in &orphans {
                if let Some(&orphan_idx) = self.nodes.get(orphan) {
                    self.prune(orphan_idx);
                }
            }
        }
        orphans
    }

    /// Number of objects currently taking part in an ownership relation.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no relations exist.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every relation.
    pub fn clear(&mut self) {
        self.graph.clear();
        self.nodes.clear();
    }

    // Remove isolated nodes so the graph only holds live relations.
    fn prune(&mut self, idx: NodeIndex) {
        if self.graph.neighbors_undirected(idx).next().is_some() {
            return;
        }
        if let Some(handle) = self.graph.remove_node(idx) {
            self.nodes.remove(&handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(addr: usize) -> NativeHandle {
        NativeHandle::from_addr(addr).unwrap()
    }

    const DEPTH: usize = 1024;

    #[test]
    fn set_and_query_parent() {
        let mut graph = OwnershipGraph::new();
        assert_eq!(graph.set_parent(h(2), h(1), DEPTH).unwrap(), None);
        assert_eq!(graph.parent(h(2)), Some(h(1)));
        assert_eq!(graph.children(h(1)), vec![h(2)]);
        assert!(graph.has_children(h(1)));
        assert_eq!(graph.parent(h(1)), None);
    }

    #[test]
    fn reparent_moves_child() {
        let mut graph = OwnershipGraph::new();
        graph.set_parent(h(3), h(1), DEPTH).unwrap();
        assert_eq!(graph.set_parent(h(3), h(2), DEPTH).unwrap(), Some(h(1)));
        assert!(graph.children(h(1)).is_empty());
        assert_eq!(graph.children(h(2)), vec![h(3)]);
    }

    #[test]
    fn children_keep_attachment_order() {
        let mut graph = OwnershipGraph::new();
        for addr in [5, 3, 9, 4] {
            graph.set_parent(h(addr), h(1), DEPTH).unwrap();
        }
        assert_eq!(graph.children(h(1)), vec![h(5), h(3), h(9), h(4)]);
    }

    #[test]
    fn self_parent_rejected() {
        let mut graph = OwnershipGraph::new();
        let err = graph.set_parent(h(1), h(1), DEPTH).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidReparenting {
                reason: ReparentReason::SelfParent,
                ..
            }
        ));
    }

    #[test]
    fn cycle_rejected_and_graph_unchanged() {
        let mut graph = OwnershipGraph::new();
        graph.set_parent(h(2), h(1), DEPTH).unwrap();
        graph.set_parent(h(3), h(2), DEPTH).unwrap();

        let err = graph.set_parent(h(1), h(3), DEPTH).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidReparenting {
                reason: ReparentReason::Cycle,
                ..
            }
        ));
        assert_eq!(graph.parent(h(1)), None);
        assert_eq!(graph.parent(h(3)), Some(h(2)));
    }

    #[test]
    fn depth_limit_enforced() {
        let mut graph = OwnershipGraph::new();
        for addr in 2..=5 {
            graph.set_parent(h(addr), h(addr - 1), DEPTH).unwrap();
        }
        // h(5) has ancestors 4, 3, 2, 1
        let err = graph.set_parent(h(100), h(5), 3).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidReparenting {
                reason: ReparentReason::DepthExceeded,
                ..
            }
        ));
        graph.set_parent(h(100), h(5), 5).unwrap();
    }

    #[test]
    fn preorder_visits_parents_first() {
        let mut graph = OwnershipGraph::new();
        graph.set_parent(h(2), h(1), DEPTH).unwrap();
        graph.set_parent(h(3), h(1), DEPTH).unwrap();
        graph.set_parent(h(4), h(2), DEPTH).unwrap();
        assert_eq!(
            graph.descendants_preorder(h(1)),
            vec![h(1), h(2), h(4), h(3)]
        );
    }

    #[test]
    fn remove_orphans_children_and_prunes() {
        let mut graph = OwnershipGraph::new();
        graph.set_parent(h(2), h(1), DEPTH).unwrap();
        graph.set_parent(h(3), h(2), DEPTH).unwrap();

        assert_eq!(graph.remove(h(2)), vec![h(3)]);
        assert_eq!(graph.parent(h(3)), None);
        assert!(graph.children(h(1)).is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn clear_parent_prunes_isolated_nodes() {
        let mut graph = OwnershipGraph::new();
        graph.set_parent(h(2), h(1), DEPTH).unwrap();
        assert_eq!(graph.clear_parent(h(2)), Some(h(1)));
        assert_eq!(graph.clear_parent(h(2)), None);
        assert_eq!(graph.len(), 0);
    }
}
