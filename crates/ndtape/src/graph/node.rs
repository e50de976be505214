//! Node handles: forward recording, branching and backward entry points.

use std::collections::btree_map::Entry;
use std::fmt;
use std::ops::Range;

use smallvec::{SmallVec, smallvec};
use tracing::{debug, trace};

use super::arena::{
    Arena, BackwardState, BranchLink, EngineId, LinkKind, NodeId, Operand, SplitGroup, SplitMember, StateKey,
    TapeEntry,
};
use super::edge::Edge;
use super::{Graph, reset};
use crate::config::{AccumulationMode, Priority};
use crate::error::{GraphError, TensorError};
use crate::operations::split_axis;
use crate::ops::Op;
use crate::optim::Optimizer;
use crate::scalar::Scalar;
use crate::tensor::Tensor;

/// An operand of a forward step: another node or a constant tensor.
///
/// Gradients reach node operands at the tape position they had when the
/// step was recorded; constants only receive gradient in the edge's
/// accumulator.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a, T: Scalar> {
    Node(&'a Node<T>),
    Tensor(&'a Tensor<T>),
}

impl<'a, T: Scalar> From<&'a Node<T>> for Input<'a, T> {
    fn from(node: &'a Node<T>) -> Self {
        Input::Node(node)
    }
}

impl<'a, T: Scalar> From<&'a Tensor<T>> for Input<'a, T> {
    fn from(tensor: &'a Tensor<T>) -> Self {
        Input::Tensor(tensor)
    }
}

/// A mutable position in the graph.
///
/// Each forward call applies an operator to the node's current value,
/// records the step on the tape of the node's active engine and makes the
/// result the new current value.
#[derive(Clone)]
pub struct Node<T: Scalar> {
    graph: Graph<T>,
    id: NodeId,
}

impl<T: Scalar> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node").field("id", &self.id).finish()
    }
}

macro_rules! unary_ops {
    ($($(#[$meta:meta])* $name:ident => $op:expr;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self) -> Result<Edge<T>, GraphError> {
                self.apply($op, &[])
            }
        )*
    };
}

macro_rules! binary_ops {
    ($($(#[$meta:meta])* $name:ident => $op:expr;)*) => {
        $(
            $(#[$meta])*
            pub fn $name<'a>(&self, rhs: impl Into<Input<'a, T>>) -> Result<Edge<T>, GraphError>
            where
                T: 'a,
            {
                self.apply($op, &[rhs.into()])
            }
        )*
    };
}

impl<T: Scalar> Node<T> {
    pub(crate) fn new(graph: Graph<T>, id: NodeId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &Graph<T> {
        &self.graph
    }

    fn key(&self, arena: &Arena<T>) -> StateKey {
        arena.active_key(self.id)
    }

    /// Current value on the active engine.
    pub fn value(&self) -> Tensor<T> {
        let mut arena = self.graph.lock();
        let key = self.key(&arena);
        arena.state(key).current.clone()
    }

    pub fn seed(&self) -> Tensor<T> {
        self.graph.lock().node(self.id).seed.clone()
    }

    /// Gradient of the seed on the active engine, if a pass has produced one.
    pub fn gradient(&self) -> Option<Tensor<T>> {
        let arena = self.graph.lock();
        arena.peek_state(self.key(&arena))?.gradient.clone()
    }

    /// One entry per backward pass (accumulate mode only).
    pub fn gradient_history(&self) -> Vec<Tensor<T>> {
        let arena = self.graph.lock();
        arena
            .peek_state(self.key(&arena))
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }

    pub fn state(&self) -> BackwardState {
        let arena = self.graph.lock();
        arena
            .peek_state(self.key(&arena))
            .map(|state| state.phase)
            .unwrap_or_default()
    }

    /// Number of recorded steps on the active engine.
    pub fn tape_len(&self) -> usize {
        let arena = self.graph.lock();
        arena.peek_state(self.key(&arena)).map_or(0, |state| state.tape.len())
    }

    /// Whether this node is a branch whose gradient must arrive through its
    /// parent on the active engine.
    pub fn is_dependent(&self) -> bool {
        self.linked_parent().is_some()
    }

    fn linked_parent(&self) -> Option<NodeId> {
        let arena = self.graph.lock();
        arena.link_for(self.key(&arena)).map(|link| link.parent)
    }

    /// The node this one was branched from, if any.
    pub fn parent(&self) -> Option<Node<T>> {
        let arena = self.graph.lock();
        let parent = arena.node(self.id).link?.parent;
        Some(Node::new(self.graph.clone(), parent))
    }

    pub fn priority(&self) -> Priority {
        self.graph.lock().node(self.id).priority
    }

    pub fn set_priority(&self, priority: Priority) {
        self.graph.lock().node_mut(self.id).priority = priority;
    }

    pub fn accumulation_mode(&self) -> AccumulationMode {
        self.graph.lock().node(self.id).accumulation
    }

    pub fn set_accumulation_mode(&self, mode: AccumulationMode) {
        self.graph.lock().node_mut(self.id).accumulation = mode;
    }

    pub fn engine(&self) -> EngineId {
        self.graph.lock().node(self.id).engine
    }

    /// Switch the active engine. Steps recorded afterwards go to that
    /// engine's tape, which starts from the seed.
    pub fn set_engine(&self, engine: EngineId) {
        self.graph.lock().node_mut(self.id).engine = engine;
    }

    /// Record `op` with this node as the primary operand.
    ///
    /// # Errors
    ///
    /// Kernel precondition failures, `ForeignNode` for an operand from
    /// another graph, and `ConcurrentModification` if another thread
    /// recorded on this node while the kernel ran.
    pub fn apply<'a>(&self, op: Op, others: &[Input<'a, T>]) -> Result<Edge<T>, GraphError>
    where
        T: 'a,
    {
        let (key, position, inputs, operands) = {
            let mut arena = self.graph.lock();
            let key = self.key(&arena);
            let state = arena.state(key);
            let position = state.tape.len();
            let mut inputs = vec![state.current.clone()];
            let mut operands: SmallVec<[Operand; 2]> = smallvec![Operand {
                producer: Some(key),
                position,
            }];
            for other in others {
                match other {
                    Input::Node(node) => {
                        if !self.graph.same_graph(&node.graph) {
                            return Err(GraphError::ForeignNode { node: node.id });
                        }
                        let other_key = arena.active_key(node.id);
                        let state = arena.state(other_key);
                        inputs.push(state.current.clone());
                        operands.push(Operand {
                            producer: Some(other_key),
                            position: state.tape.len(),
                        });
                    }
                    Input::Tensor(tensor) => {
                        inputs.push((*tensor).clone());
                        operands.push(Operand {
                            producer: None,
                            position: 0,
                        });
                    }
                }
            }
            (key, position, inputs, operands)
        };

        let refs: Vec<&Tensor<T>> = inputs.iter().collect();
        let output = op.forward(&refs, self.graph.config().parallel_min_elements)?;

        let mut arena = self.graph.lock();
        if arena.state(key).tape.len() != position {
            return Err(GraphError::ConcurrentModification { node: self.id });
        }
        trace!(node = %self.id, op = op.name(), position, "record");
        let edge = arena.add_edge(key.node, key.engine, Some(op.clone()), inputs, output.clone());
        let state = arena.state_mut(key);
        state.tape.push(TapeEntry { op, operands, edge });
        state.current = output;
        Ok(Edge::new(self.graph.clone(), edge))
    }

    unary_ops! {
        /// Record a no-op step.
        identity => Op::Identity;
        neg => Op::Neg;
        square => Op::Square;
        sqrt => Op::Sqrt;
        exp => Op::Exp;
        /// Natural logarithm.
        ln => Op::Ln;
        sin => Op::Sin;
        cos => Op::Cos;
        tanh => Op::Tanh;
        sigmoid => Op::Sigmoid;
        relu => Op::Relu;
        transpose => Op::Transpose;
        /// Sum of all elements, giving shape `[1]`.
        sum_all => Op::SumAll;
    }

    binary_ops! {
        add => Op::Add;
        sub => Op::Sub;
        /// Elementwise product.
        mul => Op::Mul;
        div => Op::Div;
        /// Matrix product `self * rhs`.
        matmul => Op::MatMul;
    }

    pub fn pow(&self, exponent: f64) -> Result<Edge<T>, GraphError> {
        self.apply(Op::Pow(exponent), &[])
    }

    pub fn scale(&self, alpha: f64) -> Result<Edge<T>, GraphError> {
        self.apply(Op::Scale(alpha), &[])
    }

    pub fn add_scalar(&self, c: f64) -> Result<Edge<T>, GraphError> {
        self.apply(Op::AddScalar(c), &[])
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Edge<T>, GraphError> {
        self.apply(Op::Reshape(shape.to_vec()), &[])
    }

    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<Edge<T>, GraphError> {
        self.apply(Op::Slice(ranges.to_vec()), &[])
    }

    pub fn sum_axis(&self, axis: usize, keepdims: bool) -> Result<Edge<T>, GraphError> {
        self.apply(Op::SumAxis { axis, keepdims }, &[])
    }

    /// Concatenate `others` after the current value along `axis`.
    pub fn concat<'a>(&self, others: &[Input<'a, T>], axis: usize) -> Result<Edge<T>, GraphError>
    where
        T: 'a,
    {
        self.apply(Op::Concat { axis }, others)
    }

    /// Add a node derived from this one: same tracker and accumulation mode,
    /// default priority.
    pub(super) fn spawn_locked(&self, arena: &mut Arena<T>, seed: Tensor<T>, engine: EngineId) -> NodeId {
        let tracker = arena.node(self.id).tracker;
        let config = self.graph.config();
        let id = arena.add_node(seed, engine, config.default_priority, arena.node(self.id).accumulation, tracker);
        arena.ensure_state(StateKey { node: id, engine });
        id
    }

    /// Branch off the current value.
    ///
    /// The branch is seeded with the current value and linked to the last
    /// edge; its gradient joins this node's traversal at that edge. An
    /// identity step is recorded first if the tape is empty.
    pub fn branch(&self) -> Node<T> {
        let mut arena = self.graph.lock();
        let key = self.key(&arena);
        if arena.state(key).tape.is_empty() {
            let current = arena.state(key).current.clone();
            let edge = arena.add_edge(key.node, key.engine, Some(Op::Identity), vec![current.clone()], current);
            arena.state_mut(key).tape.push(TapeEntry {
                op: Op::Identity,
                operands: smallvec![Operand {
                    producer: Some(key),
                    position: 0,
                }],
                edge,
            });
        }
        let state = arena.state(key);
        let position = state.tape.len();
        let edge = state.tape[position - 1].edge;
        let value = state.current.clone();
        self.link_child(&mut arena, key, value, edge, position)
    }

    /// Branch off the seed itself, regardless of recorded steps.
    pub fn branch_from_seed(&self) -> Node<T> {
        let mut arena = self.graph.lock();
        let key = self.key(&arena);
        let edge = arena.state(key).seed_edge;
        let value = arena.node(self.id).seed.clone();
        self.link_child(&mut arena, key, value, edge, 0)
    }

    fn link_child(
        &self,
        arena: &mut Arena<T>,
        key: StateKey,
        value: Tensor<T>,
        edge: super::EdgeId,
        position: usize,
    ) -> Node<T> {
        let child = self.spawn_locked(arena, value, key.engine);
        arena.node_mut(child).link = Some(BranchLink {
            parent: self.id,
            edge,
            position,
            kind: LinkKind::Ordinary,
            engine: key.engine,
        });
        arena.edge_mut(edge).branches.push(child);
        arena.node_mut(self.id).children.push(child);
        debug!(parent = %self.id, branch = %child, position, "branch");
        Node::new(self.graph.clone(), child)
    }

    /// Split the current value into pieces of extent `group_size` along
    /// `axis`.
    ///
    /// The pieces are independent nodes sharing one split group. Once every
    /// piece has been back-propagated, their gradients are concatenated and
    /// delivered to this node.
    ///
    /// # Errors
    ///
    /// `InvalidAxis` for a bad axis, `NotDivisible` if the axis length is not
    /// a multiple of `group_size`.
    pub fn split(&self, group_size: usize, axis: usize) -> Result<Vec<Node<T>>, GraphError> {
        let mut arena = self.graph.lock();
        let key = self.key(&arena);
        let state = arena.state(key);
        let position = state.tape.len();
        let pieces = split_axis(&state.current, axis, group_size)?;
        if pieces.is_empty() {
            return Err(TensorError::InvalidArgument(format!("cannot split empty axis {axis}")).into());
        }

        let group = arena.add_group(SplitGroup {
            origin: self.id,
            engine: key.engine,
            position,
            axis,
            piece_shape: pieces[0].shape().to_vec(),
            members: Vec::with_capacity(pieces.len()),
            slots: vec![None; pieces.len()],
            counter: 0,
            fired: false,
        });
        let members: Vec<NodeId> = pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| {
                let member = self.spawn_locked(&mut arena, piece, key.engine);
                arena.node_mut(member).split = Some(SplitMember { group, index });
                member
            })
            .collect();
        arena.group_mut(group).members = members.clone();
        arena.node_mut(self.id).split_groups.push(group);
        debug!(node = %self.id, fan_out = members.len(), axis, "split");

        Ok(members
            .into_iter()
            .map(|id| Node::new(self.graph.clone(), id))
            .collect())
    }

    /// Add `upstream` to the gradient pending at the current value without
    /// running the backward pass.
    pub fn set_upstream(&self, upstream: Tensor<T>) -> Result<(), GraphError> {
        let mut arena = self.graph.lock();
        let key = self.key(&arena);
        let top = arena.state(key).tape.len();
        arena.check_gradient_shape(key, top, &upstream)?;
        match arena.state_mut(key).pending.entry(top) {
            Entry::Vacant(slot) => {
                slot.insert(upstream);
            }
            Entry::Occupied(mut slot) => slot.get_mut().add_assign(&upstream)?,
        }
        Ok(())
    }

    /// Back-propagate `upstream` from the current value and return the
    /// gradient of the seed.
    ///
    /// A node that already finished (and was not reset) returns its previous
    /// gradient without running again.
    ///
    /// # Errors
    ///
    /// `IllegalDirectBackOnBranch` if this node is a branch,
    /// `UnresolvedBranchGradient` if a branch with recorded steps receives
    /// no gradient, and kernel errors such as a mismatched upstream shape.
    pub fn back(&self, upstream: Tensor<T>) -> Result<Tensor<T>, GraphError> {
        if let Some(parent) = self.linked_parent() {
            return Err(GraphError::IllegalDirectBackOnBranch { node: self.id, parent });
        }
        if self.state() == BackwardState::NotStarted {
            self.set_upstream(upstream)?;
        }
        self.back_pending()
    }

    /// Back-propagate whatever upstream has been set with
    /// [`set_upstream`](Self::set_upstream).
    pub fn back_pending(&self) -> Result<Tensor<T>, GraphError> {
        let key = self.key(&self.graph.lock());
        self.graph.back(key)
    }

    /// Return to the not-started state, keeping the gradient snapshot.
    ///
    /// Cascades over every node connected to this one through branches,
    /// parallel siblings and split groups.
    pub fn reset_backpropagation(&self) {
        reset::reset(&mut self.graph.lock(), self.id, reset::ResetLevel::Backpropagation);
    }

    /// Like [`reset_backpropagation`](Self::reset_backpropagation), and also
    /// clear gradients, gradient history and edge accumulators.
    pub fn reset_gradient(&self) {
        reset::reset(&mut self.graph.lock(), self.id, reset::ResetLevel::Gradient);
    }

    /// Like [`reset_gradient`](Self::reset_gradient), and also clear the
    /// tapes so every connected node is back at its seed.
    pub fn reset(&self) {
        reset::reset(&mut self.graph.lock(), self.id, reset::ResetLevel::Full);
    }

    /// Apply the gradient of the active engine to the seed.
    ///
    /// Engines that have not recorded any steps see the new seed as their
    /// current value; the others keep their recorded values until reset.
    pub fn optimize<O: Optimizer<T>>(&self, optimizer: &mut O) -> Result<(), GraphError> {
        let mut arena = self.graph.lock();
        let key = self.key(&arena);
        let grad = arena
            .peek_state(key)
            .and_then(|state| state.gradient.clone())
            .ok_or(GraphError::NoGradient { node: self.id })?;

        let node = arena.node_mut(self.id);
        optimizer.update_weights(&mut node.seed, &grad)?;
        let seed = node.seed.clone();
        let mut seed_edges = Vec::new();
        for state in node.states.values_mut() {
            if state.tape.is_empty() {
                state.current = seed.clone();
            }
            seed_edges.push(state.seed_edge);
        }
        for edge in seed_edges {
            arena.edge_mut(edge).output = seed.clone();
        }
        Ok(())
    }
}
