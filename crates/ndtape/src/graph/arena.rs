//! Arena storage behind a [`Graph`](super::Graph).
//!
//! Nodes, edges, split groups and trackers live in flat vectors and refer to
//! each other by index. The parent/child links between nodes and edges form
//! cycles, which the handles make harmless.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Instant;

use smallvec::SmallVec;

use crate::config::{AccumulationMode, Priority};
use crate::error::{GraphError, TensorError};
use crate::ops::Op;
use crate::scalar::Scalar;
use crate::tensor::Tensor;

/// Identifier of a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Get the internal index.
    pub fn index(&self) -> usize {
        self.0
    }

    /// Create a NodeId for testing purposes.
    #[cfg(test)]
    pub(crate) fn new_for_test(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(usize);

impl EdgeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SplitGroupId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackerId(usize);

/// Identifier of an engine: one independent recording and backward instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineId(pub(crate) usize);

impl EngineId {
    /// The engine every node starts on.
    pub const DEFAULT: EngineId = EngineId(0);

    pub fn index(&self) -> usize {
        self.0
    }
}

/// A (node, engine) pair: the unit the backward executor schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct StateKey {
    pub node: NodeId,
    pub engine: EngineId,
}

/// Backward progress of one node on one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackwardState {
    #[default]
    NotStarted,
    Started { at: Instant },
    Finished { started: Instant, finished: Instant },
}

/// An operand of a recorded step.
///
/// `position` is the tape length the producer had when the operand was
/// taken; the operand's gradient is the gradient of that value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Operand {
    pub producer: Option<StateKey>,
    pub position: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct TapeEntry {
    pub op: Op,
    pub operands: SmallVec<[Operand; 2]>,
    pub edge: EdgeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkKind {
    /// Created by `branch`; gradient joins the parent's upstream at the
    /// edge output.
    Ordinary,
    /// Sibling created by `do_parallel`; gradient joins the primary operand
    /// gradient of the edge.
    Parallel,
}

/// Connection of a dependent node to the edge it was branched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BranchLink {
    pub parent: NodeId,
    pub edge: EdgeId,
    /// Position on the parent's tape whose value seeded this node.
    pub position: usize,
    pub kind: LinkKind,
    pub engine: EngineId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SplitMember {
    pub group: SplitGroupId,
    pub index: usize,
}

/// Per-engine state of a node.
#[derive(Debug, Clone)]
pub(crate) struct EngineState<T: Scalar> {
    pub tape: Vec<TapeEntry>,
    pub current: Tensor<T>,
    pub seed_edge: EdgeId,
    pub phase: BackwardState,
    /// Positions below the cursor are still ahead of the traversal.
    pub cursor: usize,
    /// Gradient deposits not yet consumed, keyed by tape position.
    pub pending: BTreeMap<usize, Tensor<T>>,
    /// Deposits that arrived behind the traversal cursor.
    pub waiting: Vec<(usize, Tensor<T>)>,
    /// Gradient of the seed produced by the current pass.
    pub pass_gradient: Option<Tensor<T>>,
    /// Whether `pass_gradient` has been handed to the parent of a branch.
    pub delivered: bool,
    pub push_on_finish: bool,
    pub gradient: Option<Tensor<T>>,
    pub history: Vec<Tensor<T>>,
}

impl<T: Scalar> EngineState<T> {
    fn new(seed: &Tensor<T>, seed_edge: EdgeId) -> Self {
        Self {
            tape: Vec::new(),
            current: seed.clone(),
            seed_edge,
            phase: BackwardState::NotStarted,
            cursor: 0,
            pending: BTreeMap::new(),
            waiting: Vec::new(),
            pass_gradient: None,
            delivered: false,
            push_on_finish: false,
            gradient: None,
            history: Vec::new(),
        }
    }

    /// Shape of the value at tape position `position`.
    pub fn value_shape<'a>(&'a self, edges: &'a [EdgeData<T>], position: usize) -> &'a [usize] {
        match self.tape.get(position) {
            Some(entry) => edges[entry.edge.0].inputs[0].shape(),
            None => self.current.shape(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct NodeData<T: Scalar> {
    pub seed: Tensor<T>,
    pub engine: EngineId,
    pub priority: Priority,
    pub accumulation: AccumulationMode,
    pub link: Option<BranchLink>,
    pub split: Option<SplitMember>,
    pub tracker: TrackerId,
    /// Nodes linked to one of this node's edges (branches and parallel siblings).
    pub children: Vec<NodeId>,
    /// Groups created by splitting this node.
    pub split_groups: Vec<SplitGroupId>,
    pub states: HashMap<EngineId, EngineState<T>>,
}

#[derive(Debug)]
pub(crate) struct EdgeData<T: Scalar> {
    pub owner: NodeId,
    pub engine: EngineId,
    pub op: Option<Op>,
    pub inputs: Vec<Tensor<T>>,
    pub output: Tensor<T>,
    /// One accumulator per operand, shaped like the operand.
    pub grads: Vec<Tensor<T>>,
    pub branches: Vec<NodeId>,
    pub parallel: Vec<NodeId>,
}

/// Shared state of the siblings produced by one `split`.
#[derive(Debug)]
pub(crate) struct SplitGroup<T: Scalar> {
    pub origin: NodeId,
    pub engine: EngineId,
    /// Position on the origin's tape that was split.
    pub position: usize,
    pub axis: usize,
    pub piece_shape: Vec<usize>,
    pub members: Vec<NodeId>,
    pub slots: Vec<Option<Tensor<T>>>,
    pub counter: usize,
    pub fired: bool,
}

impl<T: Scalar> SplitGroup<T> {
    pub fn fan_out(&self) -> usize {
        self.members.len()
    }

    pub fn full_shape(&self) -> Vec<usize> {
        let mut shape = self.piece_shape.clone();
        shape[self.axis] *= self.fan_out();
        shape
    }

    pub fn offsets(&self, index: usize) -> Vec<usize> {
        let mut offsets = vec![0; self.piece_shape.len()];
        offsets[self.axis] = index * self.piece_shape[self.axis];
        offsets
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.counter = 0;
        self.fired = false;
    }
}

/// Bookkeeping shared by a root node and every node derived from it.
#[derive(Debug, Default)]
pub(crate) struct BranchTracker {
    /// Dependent nodes holding deposits, waiting for their parent to pull them.
    pub pending: BTreeSet<StateKey>,
    /// Low-priority nodes holding deposits.
    pub deferred: BTreeSet<StateKey>,
}

#[derive(Debug)]
pub(crate) struct Arena<T: Scalar> {
    pub nodes: Vec<NodeData<T>>,
    pub edges: Vec<EdgeData<T>>,
    pub groups: Vec<SplitGroup<T>>,
    pub trackers: Vec<BranchTracker>,
    pub engines: usize,
}

impl<T: Scalar> Arena<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            groups: Vec::new(),
            trackers: Vec::new(),
            engines: 1,
        }
    }

    pub fn new_engine(&mut self) -> EngineId {
        let id = EngineId(self.engines);
        self.engines += 1;
        id
    }

    pub fn new_tracker(&mut self) -> TrackerId {
        self.trackers.push(BranchTracker::default());
        TrackerId(self.trackers.len() - 1)
    }

    pub fn add_node(
        &mut self,
        seed: Tensor<T>,
        engine: EngineId,
        priority: Priority,
        accumulation: AccumulationMode,
        tracker: TrackerId,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            seed,
            engine,
            priority,
            accumulation,
            link: None,
            split: None,
            tracker,
            children: Vec::new(),
            split_groups: Vec::new(),
            states: HashMap::new(),
        });
        id
    }

    pub fn add_edge(
        &mut self,
        owner: NodeId,
        engine: EngineId,
        op: Option<Op>,
        inputs: Vec<Tensor<T>>,
        output: Tensor<T>,
    ) -> EdgeId {
        let grads = inputs.iter().map(Tensor::zeros_like).collect();
        self.edges.push(EdgeData {
            owner,
            engine,
            op,
            inputs,
            output,
            grads,
            branches: Vec::new(),
            parallel: Vec::new(),
        });
        EdgeId(self.edges.len() - 1)
    }

    pub fn add_group(&mut self, group: SplitGroup<T>) -> SplitGroupId {
        self.groups.push(group);
        SplitGroupId(self.groups.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> &NodeData<T> {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeData<T> {
        &mut self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &EdgeData<T> {
        &self.edges[id.0]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut EdgeData<T> {
        &mut self.edges[id.0]
    }

    pub fn group(&self, id: SplitGroupId) -> &SplitGroup<T> {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: SplitGroupId) -> &mut SplitGroup<T> {
        &mut self.groups[id.0]
    }

    pub fn tracker_mut(&mut self, id: TrackerId) -> &mut BranchTracker {
        &mut self.trackers[id.0]
    }

    /// Key of the node's active engine.
    pub fn active_key(&self, node: NodeId) -> StateKey {
        StateKey {
            node,
            engine: self.node(node).engine,
        }
    }

    /// Create the engine state on first use: current value is the seed.
    pub fn ensure_state(&mut self, key: StateKey) {
        if self.nodes[key.node.0].states.contains_key(&key.engine) {
            return;
        }
        let seed = self.nodes[key.node.0].seed.clone();
        let seed_edge = self.add_edge(key.node, key.engine, None, Vec::new(), seed.clone());
        let state = EngineState::new(&seed, seed_edge);
        self.nodes[key.node.0].states.insert(key.engine, state);
    }

    pub fn state(&mut self, key: StateKey) -> &EngineState<T> {
        self.ensure_state(key);
        &self.nodes[key.node.0].states[&key.engine]
    }

    pub fn state_mut(&mut self, key: StateKey) -> &mut EngineState<T> {
        self.ensure_state(key);
        self.nodes[key.node.0]
            .states
            .get_mut(&key.engine)
            .unwrap_or_else(|| unreachable!("engine state was just created"))
    }

    /// State if it exists, without creating it.
    pub fn peek_state(&self, key: StateKey) -> Option<&EngineState<T>> {
        self.nodes[key.node.0].states.get(&key.engine)
    }

    /// The branch link of a node, if it applies on `key.engine`.
    pub fn link_for(&self, key: StateKey) -> Option<BranchLink> {
        self.node(key.node).link.filter(|link| link.engine == key.engine)
    }

    /// The split membership of a node, if its group lives on `key.engine`.
    pub fn split_for(&self, key: StateKey) -> Option<SplitMember> {
        self.node(key.node)
            .split
            .filter(|member| self.group(member.group).engine == key.engine)
    }

    /// Check that `grad` has the shape of the value at `position`.
    pub fn check_gradient_shape(
        &mut self,
        key: StateKey,
        position: usize,
        grad: &Tensor<T>,
    ) -> Result<(), GraphError> {
        self.ensure_state(key);
        let state = &self.nodes[key.node.0].states[&key.engine];
        let expected = state.value_shape(&self.edges, position);
        if expected != grad.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: grad.shape().to_vec(),
            }
            .into());
        }
        Ok(())
    }
}
