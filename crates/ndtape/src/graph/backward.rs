//! The backward executor.
//!
//! A pass starts at one node and walks its tape from the newest step to the
//! seed. Every gradient is routed by tape position: a deposit names the node
//! and the position (the value after *k* steps) it is the gradient of, so a
//! node may appear as an operand of its own steps.
//!
//! ```text
//! run(node)
//!     for each step, newest first
//!         resolve branch children of the step's edge      (pull)
//!         add deposits pending at the step output
//!         resolve parallel siblings of the step's edge    (pull)
//!         op.backward → one gradient per operand
//!         deposit non-primary operand gradients           (push)
//!     fold seed-edge branches and deposits at position 0
//!     split group contribution, accumulation policy
//!     Finished → replay late deposits incrementally
//! ```
//!
//! Deposits into a node whose traversal already passed the position are
//! replayed as an incremental pass. A node still marked from an earlier pass
//! that no reset reached starts over the first time this pass touches it, so
//! every node completes at most once per pass. Back-propagation is linear in the
//! upstream gradient, so the final gradients do not depend on the order in
//! which branches complete.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use rayon::ThreadPool;
use smallvec::SmallVec;
use tracing::{debug, debug_span, trace, warn};

use super::arena::{Arena, BackwardState, EdgeId, LinkKind, SplitGroupId, StateKey, TapeEntry, TrackerId};
use crate::config::{AccumulationMode, GraphConfig, Priority};
use crate::error::GraphError;
use crate::ops::OperandGrads;
use crate::scalar::Scalar;
use crate::tensor::{Tensor, accumulate};

/// One backward pass over an arena. Holds the per-pass bookkeeping that is
/// discarded once the pass settles.
pub(crate) struct Executor<'a, T: Scalar> {
    pub(super) arena: &'a mut Arena<T>,
    config: &'a GraphConfig,
    pool: Option<&'a ThreadPool>,
    visited: BTreeSet<StateKey>,
    /// Nodes that had finished an earlier pass when this one reached them.
    stale: BTreeSet<StateKey>,
    pub(super) trackers: BTreeSet<TrackerId>,
    pub(super) groups: BTreeSet<SplitGroupId>,
}

impl<'a, T: Scalar> Executor<'a, T> {
    pub fn new(arena: &'a mut Arena<T>, config: &'a GraphConfig, pool: Option<&'a ThreadPool>) -> Self {
        Self {
            arena,
            config,
            pool,
            visited: BTreeSet::new(),
            stale: BTreeSet::new(),
            trackers: BTreeSet::new(),
            groups: BTreeSet::new(),
        }
    }

    /// Back-propagate the upstream gradient pending on `key`.
    ///
    /// Returns the node's gradient after the accumulation policy.
    pub fn back(mut self, key: StateKey) -> Result<Tensor<T>, GraphError> {
        let _span = debug_span!("backward", node = %key.node, engine = key.engine.index()).entered();

        if let Some(link) = self.arena.link_for(key) {
            return Err(GraphError::IllegalDirectBackOnBranch {
                node: key.node,
                parent: link.parent,
            });
        }

        let state = self.arena.state(key);
        match state.phase {
            BackwardState::Finished { .. } => {
                debug!("node already finished; returning previous gradient");
                return state
                    .gradient
                    .clone()
                    .ok_or(GraphError::NoGradient { node: key.node });
            }
            BackwardState::Started { .. } => {
                return state
                    .pending
                    .get(&state.tape.len())
                    .cloned()
                    .ok_or(GraphError::MissingUpstream { node: key.node });
            }
            BackwardState::NotStarted => {}
        }
        if state.pending.is_empty() {
            return Err(GraphError::MissingUpstream { node: key.node });
        }

        let result = self.run(key).and_then(|()| self.settle());
        self.finish_pass();
        result?;

        self.arena
            .state(key)
            .gradient
            .clone()
            .ok_or(GraphError::NoGradient { node: key.node })
    }

    pub(super) fn visit(&mut self, key: StateKey) {
        self.arena.ensure_state(key);
        if !self.visited.insert(key) {
            return;
        }
        self.trackers.insert(self.arena.node(key.node).tracker);

        let state = self.arena.state_mut(key);
        if state.phase != BackwardState::NotStarted {
            trace!(node = %key.node, "left over from an earlier pass; starting over");
            state.phase = BackwardState::NotStarted;
            state.cursor = 0;
            state.pending.clear();
            state.waiting.clear();
            state.pass_gradient = None;
            state.delivered = false;
            state.push_on_finish = false;
            self.stale.insert(key);
        }
    }

    pub(super) fn phase(&mut self, key: StateKey) -> BackwardState {
        self.arena.state(key).phase
    }

    /// Full reverse traversal of one node.
    pub(super) fn run(&mut self, key: StateKey) -> Result<(), GraphError> {
        let _span = debug_span!("traverse", node = %key.node).entered();
        self.visit(key);
        let tracker = self.arena.node(key.node).tracker;
        let tracker = self.arena.tracker_mut(tracker);
        tracker.pending.remove(&key);
        tracker.deferred.remove(&key);

        let started = Instant::now();
        let len = {
            let state = self.arena.state_mut(key);
            state.phase = BackwardState::Started { at: started };
            state.cursor = state.tape.len() + 1;
            state.delivered = false;
            state.tape.len()
        };

        let mut upstream: Option<Tensor<T>> = None;
        for i in (0..len).rev() {
            let entry = self.arena.state(key).tape[i].clone();

            let branch_sum = self.resolve_children(key, entry.edge, LinkKind::Ordinary)?;
            let state = self.arena.state_mut(key);
            let deposited = state.pending.remove(&(i + 1));
            state.cursor = i + 1;
            let up = match sum_of([upstream.take(), deposited, branch_sum])? {
                Some(up) => up,
                None => self.arena.edge(entry.edge).output.zeros_like(),
            };

            let parallel_sum = self.resolve_children(key, entry.edge, LinkKind::Parallel)?;
            let mut grads = self.step_backward(&entry, &up)?;
            if let Some(sum) = parallel_sum {
                grads[0].add_assign(&sum)?;
            }
            self.accumulate_edge(entry.edge, &grads)?;
            self.deposit_operands(&entry, &grads)?;
            upstream = Some(grads.swap_remove(0));
        }

        let seed_edge = self.arena.state(key).seed_edge;
        let branch_sum = self.resolve_children(key, seed_edge, LinkKind::Ordinary)?;
        let state = self.arena.state_mut(key);
        let deposited = state.pending.remove(&0);
        state.cursor = 0;
        let grad = match sum_of([upstream, deposited, branch_sum])? {
            Some(grad) => grad,
            None => self.arena.node(key.node).seed.zeros_like(),
        };
        self.arena.state_mut(key).pass_gradient = Some(grad.clone());

        self.split_contribute(key, &grad, true)?;
        self.apply_policy(key, &grad)?;
        self.arena.state_mut(key).phase = BackwardState::Finished {
            started,
            finished: Instant::now(),
        };

        loop {
            let waiting = std::mem::take(&mut self.arena.state_mut(key).waiting);
            if waiting.is_empty() {
                break;
            }
            for (position, grad) in waiting {
                self.incremental(key, position, grad)?;
            }
        }

        let state = self.arena.state_mut(key);
        if state.push_on_finish {
            state.push_on_finish = false;
            state.delivered = true;
            let grad = state.pass_gradient.clone();
            if let (Some(link), Some(grad)) = (self.arena.link_for(key), grad) {
                debug!(parent = %link.parent, "pushing finished branch gradient to parent");
                let parent = StateKey {
                    node: link.parent,
                    engine: key.engine,
                };
                self.deposit(parent, link.position, grad)?;
            }
        }
        Ok(())
    }

    /// Replay a gradient that arrived after the traversal passed `position`.
    fn incremental(&mut self, key: StateKey, position: usize, grad: Tensor<T>) -> Result<(), GraphError> {
        let _span = debug_span!("incremental", node = %key.node, position).entered();
        let mut up = grad;
        for i in (0..position).rev() {
            let entry = self.arena.state(key).tape[i].clone();
            let mut grads = self.step_backward(&entry, &up)?;
            self.accumulate_edge(entry.edge, &grads)?;
            self.deposit_operands(&entry, &grads)?;
            up = grads.swap_remove(0);
        }

        let mode = self.arena.node(key.node).accumulation;
        let state = self.arena.state_mut(key);
        accumulate(&mut state.pass_gradient, &up)?;
        match mode {
            AccumulationMode::Replace => state.gradient = state.pass_gradient.clone(),
            AccumulationMode::Accumulate => {
                accumulate(&mut state.gradient, &up)?;
                if let Some(last) = state.history.last_mut() {
                    last.add_assign(&up)?;
                }
            }
        }
        let delivered = state.delivered;

        self.split_contribute(key, &up, false)?;
        if let Some(link) = self.arena.link_for(key) {
            if delivered {
                let parent = StateKey {
                    node: link.parent,
                    engine: key.engine,
                };
                self.deposit(parent, link.position, up)?;
            }
        }
        Ok(())
    }

    /// Hand `grad`, the gradient of the value at `position`, to its node.
    pub(super) fn deposit(&mut self, key: StateKey, position: usize, grad: Tensor<T>) -> Result<(), GraphError> {
        trace!(node = %key.node, position, "deposit");
        self.visit(key);
        self.arena.check_gradient_shape(key, position, &grad)?;

        let dependent = self.arena.link_for(key).is_some();
        let node = self.arena.node(key.node);
        let low_priority = node.priority == Priority::Low;
        let tracker = node.tracker;

        let state = self.arena.state_mut(key);
        let phase = state.phase;
        match phase {
            BackwardState::NotStarted => {
                add_at(&mut state.pending, position, grad)?;
                if dependent {
                    self.arena.tracker_mut(tracker).pending.insert(key);
                } else if low_priority {
                    self.arena.tracker_mut(tracker).deferred.insert(key);
                } else {
                    self.run(key)?;
                }
            }
            BackwardState::Started { .. } => {
                if position < state.cursor {
                    add_at(&mut state.pending, position, grad)?;
                } else {
                    state.waiting.push((position, grad));
                }
            }
            BackwardState::Finished { .. } => self.incremental(key, position, grad)?,
        }
        Ok(())
    }

    /// Sum the gradients of the children linked to `edge`.
    ///
    /// Finished children contribute their pass gradient once. A child still
    /// on the stack is asked to push its gradient when it finishes.
    fn resolve_children(
        &mut self,
        key: StateKey,
        edge: EdgeId,
        kind: LinkKind,
    ) -> Result<Option<Tensor<T>>, GraphError> {
        let children = {
            let edge = self.arena.edge(edge);
            match kind {
                LinkKind::Ordinary => edge.branches.clone(),
                LinkKind::Parallel => edge.parallel.clone(),
            }
        };
        if children.is_empty() {
            return Ok(None);
        }

        let mut sum = None;
        for child in children {
            let child = StateKey {
                node: child,
                engine: key.engine,
            };
            self.visit(child);
            loop {
                let (phase, has_pending, has_tape) = {
                    let state = self.arena.state(child);
                    (state.phase, !state.pending.is_empty(), !state.tape.is_empty())
                };
                match phase {
                    BackwardState::Finished { .. } => {
                        let state = self.arena.state_mut(child);
                        if !state.delivered {
                            state.delivered = true;
                            if let Some(grad) = &state.pass_gradient {
                                accumulate(&mut sum, grad)?;
                            }
                        }
                        break;
                    }
                    BackwardState::Started { .. } => {
                        debug!(child = %child.node, "branch still running; gradient will be pushed");
                        self.arena.state_mut(child).push_on_finish = true;
                        break;
                    }
                    BackwardState::NotStarted if has_pending => self.run(child)?,
                    BackwardState::NotStarted => {
                        if self.resolve_trackers()? {
                            continue;
                        }
                        if has_tape && !self.stale.contains(&child) {
                            return Err(GraphError::UnresolvedBranchGradient { node: child.node });
                        }
                        debug!(child = %child.node, "branch without deposits this pass; zero gradient");
                        self.run(child)?;
                    }
                }
            }
        }
        Ok(sum)
    }

    /// Let the trackers touched by this pass make progress.
    pub(super) fn resolve_trackers(&mut self) -> Result<bool, GraphError> {
        let trackers: Vec<TrackerId> = self.trackers.iter().copied().collect();
        for tracker in trackers {
            if self.resolve_tracker(tracker)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run everything the trackers still hold once the pass itself is done.
    fn settle(&mut self) -> Result<(), GraphError> {
        while self.resolve_trackers()? {}
        Ok(())
    }

    /// Report incomplete split groups and drop the per-pass buffers.
    fn finish_pass(&mut self) {
        for &id in &self.groups {
            let group = self.arena.group(id);
            if !group.fired && group.counter > 0 {
                warn!(
                    origin = %group.origin,
                    received = group.counter,
                    fan_out = group.fan_out(),
                    "split group incomplete; its gradient stays pending until every sibling is back-propagated"
                );
            }
        }
        for &key in &self.visited {
            let state = self.arena.state_mut(key);
            state.pending.clear();
            state.waiting.clear();
            state.push_on_finish = false;
        }
        for &id in &self.trackers {
            let tracker = self.arena.tracker_mut(id);
            tracker.pending.clear();
            tracker.deferred.clear();
        }
    }

    fn step_backward(&self, entry: &TapeEntry, up: &Tensor<T>) -> Result<OperandGrads<T>, GraphError> {
        let edge = self.arena.edge(entry.edge);
        let inputs: Vec<&Tensor<T>> = edge.inputs.iter().collect();
        let min_par = self.config.parallel_min_elements;
        let op = &entry.op;
        let grads = match self.pool {
            Some(pool) => pool.install(|| op.backward(&inputs, &edge.output, up, min_par)),
            None => op.backward(&inputs, &edge.output, up, min_par),
        }?;
        Ok(grads)
    }

    fn accumulate_edge(&mut self, edge: EdgeId, grads: &OperandGrads<T>) -> Result<(), GraphError> {
        for (acc, grad) in self.arena.edge_mut(edge).grads.iter_mut().zip(grads) {
            acc.add_assign(grad)?;
        }
        Ok(())
    }

    /// Push every non-primary operand gradient to its producer, higher
    /// priority producers first.
    fn deposit_operands(&mut self, entry: &TapeEntry, grads: &OperandGrads<T>) -> Result<(), GraphError> {
        let mut targets: SmallVec<[(usize, StateKey, usize); 2]> = entry
            .operands
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(k, operand)| operand.producer.map(|p| (k, p, operand.position)))
            .collect();
        targets.sort_by_key(|&(_, producer, _)| std::cmp::Reverse(self.arena.node(producer.node).priority));
        for (k, producer, position) in targets {
            self.deposit(producer, position, grads[k].clone())?;
        }
        Ok(())
    }

    fn apply_policy(&mut self, key: StateKey, grad: &Tensor<T>) -> Result<(), GraphError> {
        let mode = self.arena.node(key.node).accumulation;
        let state = self.arena.state_mut(key);
        match mode {
            AccumulationMode::Accumulate => {
                state.history.push(grad.clone());
                accumulate(&mut state.gradient, grad)?;
            }
            AccumulationMode::Replace => state.gradient = Some(grad.clone()),
        }
        Ok(())
    }
}

fn add_at<T: Scalar>(
    pending: &mut BTreeMap<usize, Tensor<T>>,
    position: usize,
    grad: Tensor<T>,
) -> Result<(), GraphError> {
    match pending.entry(position) {
        Entry::Vacant(slot) => {
            slot.insert(grad);
        }
        Entry::Occupied(mut slot) => slot.get_mut().add_assign(&grad)?,
    }
    Ok(())
}

fn sum_of<T: Scalar, const N: usize>(parts: [Option<Tensor<T>>; N]) -> Result<Option<Tensor<T>>, GraphError> {
    let mut sum: Option<Tensor<T>> = None;
    for part in parts.into_iter().flatten() {
        match &mut sum {
            Some(total) => total.add_assign(&part)?,
            None => sum = Some(part),
        }
    }
    Ok(sum)
}
