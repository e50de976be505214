//! Branch tracker resolution.
//!
//! A tracker is shared by a root node and every node derived from it. It
//! holds the dependent nodes that received gradient but wait for their parent
//! to pull them, and the low-priority nodes whose traversal was deferred.
//! When a traversal needs a branch gradient that nothing has produced yet,
//! the executor asks the trackers to make progress.

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use super::arena::{BackwardState, StateKey, TrackerId};
use super::backward::Executor;
use crate::error::GraphError;
use crate::scalar::Scalar;

impl<T: Scalar> Executor<'_, T> {
    /// Try to make progress on one tracker. Returns `true` if anything ran or
    /// changed state.
    pub(super) fn resolve_tracker(&mut self, id: TrackerId) -> Result<bool, GraphError> {
        let deferred: Vec<StateKey> = std::mem::take(&mut self.arena.tracker_mut(id).deferred)
            .into_iter()
            .filter(|&key| self.phase(key) == BackwardState::NotStarted)
            .collect();
        if !deferred.is_empty() {
            debug!(count = deferred.len(), "running deferred low-priority nodes");
            for key in self.consumer_order(&deferred) {
                if self.phase(key) == BackwardState::NotStarted {
                    self.run(key)?;
                }
            }
            return Ok(true);
        }

        let pending: Vec<StateKey> = self.arena.tracker_mut(id).pending.iter().copied().collect();
        for key in pending {
            if self.phase(key) != BackwardState::NotStarted {
                self.arena.tracker_mut(id).pending.remove(&key);
                continue;
            }
            let Some(link) = self.arena.link_for(key) else {
                self.run(key)?;
                return Ok(true);
            };
            let parent = StateKey {
                node: link.parent,
                engine: key.engine,
            };
            self.visit(parent);
            match self.phase(parent) {
                BackwardState::NotStarted => {
                    if self.arena.link_for(parent).is_none() {
                        debug!(branch = %key.node, parent = %parent.node, "forcing parent of pending branch");
                        self.run(parent)?;
                        return Ok(true);
                    }
                    // The parent is itself a branch: give it a zero upstream so
                    // its own parent gets forced in turn.
                    let parent_tracker = self.arena.node(parent.node).tracker;
                    let state = self.arena.state_mut(parent);
                    let mut progressed = false;
                    if state.pending.is_empty() {
                        let top = state.tape.len();
                        let zeros = state.current.zeros_like();
                        state.pending.insert(top, zeros);
                        progressed = true;
                    }
                    self.trackers.insert(parent_tracker);
                    progressed |= self.arena.tracker_mut(parent_tracker).pending.insert(parent);
                    if progressed {
                        debug!(parent = %parent.node, "marked branch parent pending");
                        return Ok(true);
                    }
                }
                // The parent pulls this branch when its traversal reaches the edge.
                BackwardState::Started { .. } => {}
                BackwardState::Finished { .. } => {
                    debug!(branch = %key.node, "parent already passed; running branch and pushing");
                    self.arena.state_mut(key).push_on_finish = true;
                    self.run(key)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Order deferred nodes so that consumers run before their producers.
    ///
    /// Nodes that feed each other cycle-wise are grouped by strongly
    /// connected component; whatever reaches them late is replayed
    /// incrementally.
    fn consumer_order(&mut self, keys: &[StateKey]) -> Vec<StateKey> {
        let mut graph: DiGraph<StateKey, ()> = DiGraph::new();
        let index: HashMap<StateKey, NodeIndex> = keys.iter().map(|&key| (key, graph.add_node(key))).collect();

        for &consumer in keys {
            let producers: Vec<StateKey> = self
                .arena
                .state(consumer)
                .tape
                .iter()
                .flat_map(|entry| entry.operands.iter().skip(1))
                .filter_map(|operand| operand.producer)
                .filter(|producer| *producer != consumer)
                .collect();
            for producer in producers {
                if let Some(&to) = index.get(&producer) {
                    graph.update_edge(index[&consumer], to, ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(|ix| graph[ix]).collect(),
            Err(cycle) => {
                debug!(node = %graph[cycle.node_id()].node, "deferred nodes feed each other; ordering by component");
                tarjan_scc(&graph)
                    .into_iter()
                    .rev()
                    .flatten()
                    .map(|ix| graph[ix])
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EngineId, Graph};
    use crate::tensor::Tensor;

    fn key(node: &crate::graph::Node<f64>) -> StateKey {
        StateKey {
            node: node.id(),
            engine: EngineId::DEFAULT,
        }
    }

    #[test]
    fn test_consumers_ordered_before_producers() {
        let graph: Graph<f64> = Graph::new();
        let producer = graph.leaf(Tensor::ones(&[1]));
        let middle = graph.leaf(Tensor::ones(&[1]));
        let consumer = graph.leaf(Tensor::ones(&[1]));
        middle.add(&producer).unwrap();
        consumer.mul(&middle).unwrap();

        let mut arena = graph.lock();
        let mut executor = Executor::new(&mut arena, graph.config(), None);
        let order = executor.consumer_order(&[key(&producer), key(&consumer), key(&middle)]);
        assert_eq!(order, vec![key(&consumer), key(&middle), key(&producer)]);
    }

    #[test]
    fn test_producer_cycle_still_orders_every_node() {
        let graph: Graph<f64> = Graph::new();
        let a = graph.leaf(Tensor::ones(&[1]));
        let b = graph.leaf(Tensor::ones(&[1]));
        a.add(&b).unwrap();
        b.add(&a).unwrap();

        let mut arena = graph.lock();
        let mut executor = Executor::new(&mut arena, graph.config(), None);
        let order = executor.consumer_order(&[key(&a), key(&b)]);
        assert_eq!(order.len(), 2);
        assert!(order.contains(&key(&a)) && order.contains(&key(&b)));
    }
}
