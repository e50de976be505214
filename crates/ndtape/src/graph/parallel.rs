//! Forward fan-out over the worker pool.

use rayon::prelude::*;
use tracing::debug;

use super::arena::{BranchLink, LinkKind, NodeId};
use super::edge::Edge;
use super::node::Node;
use crate::error::{GraphError, TensorError};
use crate::scalar::Scalar;

/// A forward step run by [`Node::do_parallel`].
pub type ParallelTask<T> = dyn Fn(&Node<T>) -> Result<Edge<T>, GraphError> + Sync;

impl<T: Scalar> Node<T> {
    /// Run `tasks` concurrently from the current value.
    ///
    /// The first task records on `self`; every other task records on a new
    /// sibling seeded with the same value. Once all tasks return, the
    /// siblings are attached to the first step the first task recorded, so a
    /// backward pass through that step also collects their gradients. A
    /// sibling is a branch: its result has to flow into a node that is
    /// back-propagated, typically by joining it back with a binary step.
    ///
    /// Returns the edge produced by each task, in task order.
    ///
    /// # Errors
    ///
    /// The first error raised by any task, or `InvalidArgument` if the first
    /// task recorded nothing on `self`.
    ///
    /// # Example
    ///
    /// ```
    /// use ndtape::{Graph, Node, ParallelTask, Tensor};
    ///
    /// let graph = Graph::new();
    /// let x = graph.leaf(Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap());
    /// let tasks: [&ParallelTask<f64>; 2] = [&|n: &Node<f64>| n.scale(2.0), &|n: &Node<f64>| n.scale(3.0)];
    /// let edges = x.do_parallel(&tasks).unwrap();
    /// assert_eq!(edges[1].output().data(), &[3.0, 6.0]);
    ///
    /// // Join the sibling back into x: 2x + 3x.
    /// x.add(&edges[1].node()).unwrap();
    /// let grad = x.back(Tensor::ones(&[2])).unwrap();
    /// assert_eq!(grad.data(), &[5.0, 5.0]);
    /// ```
    pub fn do_parallel(&self, tasks: &[&ParallelTask<T>]) -> Result<Vec<Edge<T>>, GraphError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let (key, position, siblings) = {
            let mut arena = self.graph().lock();
            let key = arena.active_key(self.id());
            let state = arena.state(key);
            let position = state.tape.len();
            let value = state.current.clone();
            let siblings: Vec<NodeId> = (1..tasks.len())
                .map(|_| self.spawn_locked(&mut arena, value.clone(), key.engine))
                .collect();
            (key, position, siblings)
        };

        let workers: Vec<Node<T>> = std::iter::once(self.clone())
            .chain(siblings.iter().map(|&id| Node::new(self.graph().clone(), id)))
            .collect();
        let edges = self.graph().install(|| {
            workers
                .par_iter()
                .zip(tasks.par_iter())
                .map(|(node, task)| task(node))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut arena = self.graph().lock();
        let anchor = arena
            .state(key)
            .tape
            .get(position)
            .map(|entry| entry.edge)
            .ok_or_else(|| TensorError::InvalidArgument("first parallel task recorded no step".into()))?;
        for &sibling in &siblings {
            arena.node_mut(sibling).link = Some(BranchLink {
                parent: self.id(),
                edge: anchor,
                position,
                kind: LinkKind::Parallel,
                engine: key.engine,
            });
            arena.edge_mut(anchor).parallel.push(sibling);
            arena.node_mut(self.id()).children.push(sibling);
        }
        debug!(node = %self.id(), siblings = siblings.len(), position, "parallel fan-out joined");
        Ok(edges)
    }
}
