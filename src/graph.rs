//! Node graph - owns nodes, their ordered inputs, and the cached evaluation order

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use hashbrown::HashMap;
use petgraph::algo::{has_path_connecting, DfsSpace};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{NodeIndexable, Visitable};
use petgraph::Direction;

use crate::error::{Error, Result};
use crate::node::{NodeId, NodeState};

struct Slot<N> {
    id: NodeId,
    name: String,
    /// Ordered input list. Edges in the petgraph mirror these, one per entry.
    inputs: Vec<NodeId>,
    state: NodeState,
    /// Completed passes at the time the node was marked for removal
    marked_at: u64,
    /// Only `None` while the node is being processed
    payload: Option<N>,
}

type Inner<N> = StableDiGraph<Slot<N>, ()>;

/// A node that has gone through both phases of removal.
pub struct RetiredNode<N> {
    pub id: NodeId,
    pub name: String,
    pub node: N,
}

/// A directed acyclic graph of nodes keyed by [`NodeId`].
///
/// Edges run from an input to the node consuming it. Every node keeps its
/// inputs in connection order. The evaluation order is a topological sort,
/// computed lazily and cached until the next structural edit; ties are broken
/// by id (insertion order) so identical graphs always evaluate identically.
///
/// Removal is two-phase: [`remove_node`](Self::remove_node) only marks the node,
/// which drops it from the evaluation order but keeps it (and its buffers)
/// alive. [`retire`](Self::retire) frees it once a full pass has completed
/// since the mark.
///
/// The audio engine holds a `NodeGraph<Box<SoundNode>>`; the control thread
/// keeps a mirror with lightweight payloads for validation and introspection.
pub struct NodeGraph<N> {
    graph: Inner<N>,
    indices: HashMap<NodeId, NodeIndex>,

    order: Vec<NodeIndex>,
    order_ids: Vec<NodeId>,
    order_dirty: bool,

    // scratch for sorting and cycle checks, reserved up front
    in_degree: Vec<usize>,
    ready: BinaryHeap<Reverse<(NodeId, NodeIndex)>>,
    dfs: DfsSpace<NodeIndex, <Inner<N> as Visitable>::Map>,

    /// One past the largest id ever inserted
    high_water: u64,
    /// Completed evaluation passes
    passes: u64,
}

impl<N> NodeGraph<N> {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a graph with room for `nodes` nodes before any reallocation.
    pub fn with_capacity(nodes: usize) -> Self {
        let graph = Inner::with_capacity(nodes, nodes * 4);
        let dfs = DfsSpace::new(&graph);
        Self {
            graph,
            indices: HashMap::with_capacity(nodes),
            order: Vec::with_capacity(nodes),
            order_ids: Vec::with_capacity(nodes),
            order_dirty: false,
            in_degree: Vec::with_capacity(nodes),
            ready: BinaryHeap::with_capacity(nodes),
            dfs,
            high_water: 0,
            passes: 0,
        }
    }

    /// Number of nodes in the graph, including those pending removal.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.indices.contains_key(&id)
    }

    /// Number of completed evaluation passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Insert `node` consuming `inputs`, in order.
    ///
    /// Fails with [`Error::CycleDetected`] if the node lists itself as an input,
    /// and with [`Error::UnknownNode`] if an input is missing or pending removal.
    /// On failure the graph is unchanged.
    pub fn add_node(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        node: N,
        inputs: Vec<NodeId>,
    ) -> Result<()> {
        if self.indices.contains_key(&id) {
            return Err(Error::DuplicateNode(id));
        }
        for &input in &inputs {
            if input == id {
                return Err(Error::CycleDetected { from: id, to: id });
            }
            self.active_index(input)?;
        }

        let idx = self.graph.add_node(Slot {
            id,
            name: name.into(),
            inputs,
            state: NodeState::Active,
            marked_at: 0,
            payload: Some(node),
        });
        for i in 0..self.graph[idx].inputs.len() {
            let from = self.indices[&self.graph[idx].inputs[i]];
            self.graph.add_edge(from, idx, ());
        }

        self.indices.insert(id, idx);
        self.high_water = self.high_water.max(id.0 + 1);
        self.order_dirty = true;
        Ok(())
    }

    /// Append `from` to the inputs of `to`.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let from_idx = self.active_index(from)?;
        let to_idx = self.active_index(to)?;

        // `to` reaching `from` means the new edge would close a loop
        if from == to || has_path_connecting(&self.graph, to_idx, from_idx, Some(&mut self.dfs)) {
            return Err(Error::CycleDetected { from, to });
        }

        self.graph[to_idx].inputs.push(from);
        self.graph.add_edge(from_idx, to_idx, ());
        self.order_dirty = true;
        Ok(())
    }

    /// Remove the first occurrence of `from` from the inputs of `to`.
    ///
    /// Returns whether a connection was removed.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<bool> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;

        let inputs = &mut self.graph[to_idx].inputs;
        let Some(pos) = inputs.iter().position(|&i| i == from) else {
            return Ok(false);
        };
        inputs.remove(pos);

        if let Some(edge) = self.graph.find_edge(from_idx, to_idx) {
            self.graph.remove_edge(edge);
        }
        self.order_dirty = true;
        Ok(true)
    }

    /// Mark a node for removal (phase one).
    ///
    /// The node stops producing output and leaves the evaluation order, but
    /// stays allocated until [`retire`](Self::retire) sees a completed pass.
    /// Marking a node twice is a no-op.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let idx = self.index(id)?;
        let slot = &mut self.graph[idx];
        if slot.state == NodeState::Active {
            slot.state = NodeState::PendingRemoval;
            slot.marked_at = self.passes;
            self.order_dirty = true;
        }
        Ok(())
    }

    /// Free up to `limit` nodes whose removal has outlived a full pass (phase two).
    ///
    /// Each retired node is handed to `f` and its id is dropped from the
    /// input lists of its former consumers. Returns how many were retired.
    pub fn retire(&mut self, limit: usize, mut f: impl FnMut(RetiredNode<N>)) -> usize {
        let mut retired = 0;
        while retired < limit {
            let passes = self.passes;
            let found = self.graph.node_indices().find(|&idx| {
                let slot = &self.graph[idx];
                slot.state == NodeState::PendingRemoval && slot.marked_at < passes
            });
            let Some(idx) = found else { break };
            if let Some(node) = self.remove_slot(idx) {
                f(node);
            }
            retired += 1;
        }
        retired
    }

    /// Retire a node immediately, regardless of passes.
    ///
    /// Used by the control-thread mirror once the audio thread has
    /// acknowledged the removal.
    pub fn finalize(&mut self, id: NodeId) -> Option<RetiredNode<N>> {
        let idx = *self.indices.get(&id)?;
        self.remove_slot(idx)
    }

    fn remove_slot(&mut self, idx: NodeIndex) -> Option<RetiredNode<N>> {
        let slot = self.graph.remove_node(idx)?;
        self.indices.remove(&slot.id);

        let id = slot.id;
        for other in 0..self.graph.node_bound() {
            if let Some(s) = self.graph.node_weight_mut(NodeIndex::new(other)) {
                s.inputs.retain(|&i| i != id);
            }
        }
        self.order_dirty = true;

        slot.payload.map(|node| RetiredNode {
            id,
            name: slot.name,
            node,
        })
    }

    /// Lifetime state of `id`.
    ///
    /// Ids below the largest one ever inserted that are no longer present
    /// report [`NodeState::Removed`]; ids never seen report
    /// [`NodeState::Uninitialized`].
    pub fn state(&self, id: NodeId) -> NodeState {
        match self.indices.get(&id) {
            Some(&idx) => self.graph[idx].state,
            None if id.0 < self.high_water => NodeState::Removed,
            None => NodeState::Uninitialized,
        }
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        let idx = self.indices.get(&id)?;
        Some(&self.graph[*idx].name)
    }

    /// Ordered inputs of `id`.
    pub fn inputs(&self, id: NodeId) -> Option<&[NodeId]> {
        let idx = self.indices.get(&id)?;
        Some(&self.graph[*idx].inputs)
    }

    pub fn get(&self, id: NodeId) -> Option<&N> {
        let idx = self.indices.get(&id)?;
        self.graph[*idx].payload.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut N> {
        let idx = self.indices.get(&id)?;
        self.graph[*idx].payload.as_mut()
    }

    /// The cached evaluation order: every active node after all of its inputs.
    ///
    /// Recomputed only after a structural edit.
    pub fn evaluation_order(&mut self) -> &[NodeId] {
        self.refresh_order();
        &self.order_ids
    }

    /// Visit every active node in evaluation order, then count the pass.
    ///
    /// `f` receives the node and a view of its inputs' payloads.
    pub fn for_each_in_order(&mut self, mut f: impl FnMut(NodeId, &mut N, NodeInputs<'_, N>)) {
        self.refresh_order();

        for i in 0..self.order.len() {
            let idx = self.order[i];
            let Some(mut payload) = self.graph[idx].payload.take() else {
                continue;
            };

            let slot = &self.graph[idx];
            let inputs = NodeInputs {
                graph: &self.graph,
                indices: &self.indices,
                inputs: &slot.inputs,
            };
            f(slot.id, &mut payload, inputs);

            self.graph[idx].payload = Some(payload);
        }

        self.passes += 1;
    }

    /// Introspection: (id, name, state, connections) for every node.
    ///
    /// The returned iterator is lazy and can be cloned to restart it.
    pub fn node_info_list(&self) -> NodeInfoList<'_, N> {
        NodeInfoList {
            graph: &self.graph,
            next: 0,
            bound: self.graph.node_bound(),
        }
    }

    fn index(&self, id: NodeId) -> Result<NodeIndex> {
        self.indices.get(&id).copied().ok_or(Error::UnknownNode(id))
    }

    fn active_index(&self, id: NodeId) -> Result<NodeIndex> {
        let idx = self.index(id)?;
        if self.graph[idx].state != NodeState::Active {
            return Err(Error::UnknownNode(id));
        }
        Ok(idx)
    }

    /// Kahn's algorithm with a min-heap on ids for a deterministic tie-break.
    /// Nodes pending removal take part in the sort but are not emitted.
    fn refresh_order(&mut self) {
        if !self.order_dirty {
            return;
        }

        self.order.clear();
        self.order_ids.clear();
        self.ready.clear();
        self.in_degree.clear();
        self.in_degree.resize(self.graph.node_bound(), 0);

        for idx in self.graph.node_indices() {
            let degree = self.graph.neighbors_directed(idx, Direction::Incoming).count();
            self.in_degree[idx.index()] = degree;
            if degree == 0 {
                self.ready.push(Reverse((self.graph[idx].id, idx)));
            }
        }

        while let Some(Reverse((id, idx))) = self.ready.pop() {
            if self.graph[idx].state == NodeState::Active {
                self.order.push(idx);
                self.order_ids.push(id);
            }
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let degree = &mut self.in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    self.ready.push(Reverse((self.graph[next].id, next)));
                }
            }
        }

        self.order_dirty = false;
    }
}

impl<N> Default for NodeGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a node's inputs during [`NodeGraph::for_each_in_order`].
pub struct NodeInputs<'a, N> {
    graph: &'a Inner<N>,
    indices: &'a HashMap<NodeId, NodeIndex>,
    inputs: &'a [NodeId],
}

impl<N> Clone for NodeInputs<'_, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for NodeInputs<'_, N> {}

impl<'a, N> NodeInputs<'a, N> {
    /// Payloads of the active inputs, in connection order.
    pub fn iter(&self) -> impl Iterator<Item = &'a N> + 'a {
        let graph = self.graph;
        let indices = self.indices;
        let inputs = self.inputs;
        inputs
            .iter()
            .filter_map(move |id| indices.get(id))
            .map(move |&idx| &graph[idx])
            .filter(|slot| slot.state == NodeState::Active)
            .filter_map(|slot| slot.payload.as_ref())
    }
}

/// One entry of [`NodeGraph::node_info_list`].
#[derive(Clone, Copy, Debug)]
pub struct NodeInfo<'a> {
    pub id: NodeId,
    pub name: &'a str,
    pub state: NodeState,
    pub connections: &'a [NodeId],
}

/// Lazy iterator over [`NodeInfo`] entries.
pub struct NodeInfoList<'a, N> {
    graph: &'a Inner<N>,
    next: usize,
    bound: usize,
}

impl<N> Clone for NodeInfoList<'_, N> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph,
            next: self.next,
            bound: self.bound,
        }
    }
}

impl<'a, N> Iterator for NodeInfoList<'a, N> {
    type Item = NodeInfo<'a>;

    fn next(&mut self) -> Option<NodeInfo<'a>> {
        while self.next < self.bound {
            let idx = NodeIndex::new(self.next);
            self.next += 1;
            if let Some(slot) = self.graph.node_weight(idx) {
                return Some(NodeInfo {
                    id: slot.id,
                    name: &slot.name,
                    state: slot.state,
                    connections: &slot.inputs,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(n: u64) -> NodeId {
        NodeId(n)
    }

    fn position(order: &[NodeId], n: NodeId) -> usize {
        order.iter().position(|&x| x == n).unwrap()
    }

    #[test]
    fn inputs_come_before_consumers() {
        let mut g = NodeGraph::new();
        g.add_node(id(0), "out", (), vec![]).unwrap();
        g.add_node(id(1), "a", (), vec![]).unwrap();
        g.add_node(id(2), "b", (), vec![id(1)]).unwrap();
        g.connect(id(2), id(0)).unwrap();
        g.connect(id(1), id(0)).unwrap();

        let order = g.evaluation_order().to_vec();
        assert_eq!(order, vec![id(1), id(2), id(0)]);
    }

    #[test]
    fn ties_break_by_insertion_id() {
        let mut g = NodeGraph::new();
        for n in [4, 2, 9, 1] {
            g.add_node(id(n), "src", (), vec![]).unwrap();
        }
        assert_eq!(g.evaluation_order(), &[id(1), id(2), id(4), id(9)]);
    }

    #[test]
    fn connect_rejects_cycles_and_leaves_graph_unchanged() {
        let mut g = NodeGraph::new();
        g.add_node(id(0), "a", (), vec![]).unwrap();
        g.add_node(id(1), "b", (), vec![id(0)]).unwrap();
        g.add_node(id(2), "c", (), vec![id(1)]).unwrap();
        let before = g.evaluation_order().to_vec();

        let err = g.connect(id(2), id(0)).unwrap_err();
        assert!(matches!(err, Error::CycleDetected { from, to } if from == id(2) && to == id(0)));
        assert!(matches!(g.connect(id(1), id(1)), Err(Error::CycleDetected { .. })));
        assert_eq!(g.inputs(id(0)).unwrap(), &[] as &[NodeId]);
        assert_eq!(g.evaluation_order(), before.as_slice());
    }

    #[test]
    fn add_node_rejects_self_input_and_unknown_inputs() {
        let mut g = NodeGraph::new();
        g.add_node(id(0), "a", (), vec![]).unwrap();
        assert!(matches!(
            g.add_node(id(1), "b", (), vec![id(1)]),
            Err(Error::CycleDetected { .. })
        ));
        assert!(matches!(
            g.add_node(id(1), "b", (), vec![id(7)]),
            Err(Error::UnknownNode(n)) if n == id(7)
        ));
        assert!(matches!(
            g.add_node(id(0), "dup", (), vec![]),
            Err(Error::DuplicateNode(_))
        ));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn removal_is_two_phase() {
        let mut g = NodeGraph::new();
        g.add_node(id(0), "out", 0u32, vec![]).unwrap();
        g.add_node(id(1), "src", 1u32, vec![]).unwrap();
        g.connect(id(1), id(0)).unwrap();

        g.for_each_in_order(|_, _, _| {});
        g.remove_node(id(1)).unwrap();
        assert_eq!(g.state(id(1)), NodeState::PendingRemoval);
        assert_eq!(g.evaluation_order(), &[id(0)]);

        // no pass has completed since the mark
        assert_eq!(g.retire(usize::MAX, |_| {}), 0);
        assert_eq!(g.get(id(1)), Some(&1));

        let mut seen = Vec::new();
        g.for_each_in_order(|node, _, inputs| {
            seen.push((node, inputs.iter().count()));
        });
        // the pending input is skipped
        assert_eq!(seen, vec![(id(0), 0)]);

        let mut retired = Vec::new();
        assert_eq!(g.retire(usize::MAX, |r| retired.push(r.id)), 1);
        assert_eq!(retired, vec![id(1)]);
        assert_eq!(g.state(id(1)), NodeState::Removed);
        assert_eq!(g.inputs(id(0)).unwrap(), &[] as &[NodeId]);
        assert_eq!(g.state(id(42)), NodeState::Uninitialized);
    }

    #[test]
    fn disconnect_removes_one_connection() {
        let mut g = NodeGraph::new();
        g.add_node(id(0), "a", (), vec![]).unwrap();
        g.add_node(id(1), "b", (), vec![id(0), id(0)]).unwrap();
        assert!(g.disconnect(id(0), id(1)).unwrap());
        assert_eq!(g.inputs(id(1)).unwrap(), &[id(0)]);
        assert!(g.disconnect(id(0), id(1)).unwrap());
        assert!(!g.disconnect(id(0), id(1)).unwrap());
    }

    #[test]
    fn node_info_list_is_restartable() {
        let mut g = NodeGraph::new();
        g.add_node(id(0), "out", (), vec![]).unwrap();
        g.add_node(id(1), "tone", (), vec![]).unwrap();
        g.connect(id(1), id(0)).unwrap();

        let list = g.node_info_list();
        let first: Vec<_> = list.clone().map(|i| (i.id, i.name.to_string())).collect();
        let second: Vec<_> = list.map(|i| (i.id, i.name.to_string())).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);

        let out = g.node_info_list().find(|i| i.id == id(0)).unwrap();
        assert_eq!(out.connections, &[id(1)]);
    }

    proptest! {
        #[test]
        fn order_respects_edges_and_is_stable(
            edges in proptest::collection::vec((0u64..12, 0u64..12), 0..40)
        ) {
            let mut g = NodeGraph::new();
            for n in 0..12 {
                g.add_node(id(n), "n", (), vec![]).unwrap();
            }
            for (a, b) in edges {
                // rejected edges leave the graph as it was
                let _ = g.connect(id(a), id(b));
            }

            let order = g.evaluation_order().to_vec();
            prop_assert_eq!(order.len(), 12);
            for n in 0..12 {
                for &input in g.inputs(id(n)).unwrap() {
                    prop_assert!(position(&order, input) < position(&order, id(n)));
                }
            }
            prop_assert_eq!(g.evaluation_order(), order.as_slice());
        }
    }
}
