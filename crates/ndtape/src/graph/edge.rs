//! Edge handles.

use std::fmt;

use super::arena::{EdgeId, EngineId};
use super::node::Node;
use super::parallel::ParallelTask;
use super::Graph;
use crate::error::GraphError;
use crate::scalar::Scalar;
use crate::tensor::Tensor;

/// One recorded step: the operator, its inputs, its output and the gradient
/// accumulated for every operand.
///
/// Returned by every forward call so steps can be chained with
/// [`then`](Self::then).
#[derive(Clone)]
pub struct Edge<T: Scalar> {
    graph: Graph<T>,
    id: EdgeId,
}

impl<T: Scalar> fmt::Debug for Edge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("id", &self.id)
            .field("op", &self.op_name())
            .finish()
    }
}

impl<T: Scalar> Edge<T> {
    pub(crate) fn new(graph: Graph<T>, id: EdgeId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    /// Value produced by this step.
    pub fn output(&self) -> Tensor<T> {
        self.graph.lock().edge(self.id).output.clone()
    }

    pub fn inputs(&self) -> Vec<Tensor<T>> {
        self.graph.lock().edge(self.id).inputs.clone()
    }

    /// Gradient accumulated for each operand, in operand order.
    pub fn gradients(&self) -> Vec<Tensor<T>> {
        self.graph.lock().edge(self.id).grads.clone()
    }

    pub fn gradient(&self, operand: usize) -> Option<Tensor<T>> {
        self.graph.lock().edge(self.id).grads.get(operand).cloned()
    }

    /// The node whose tape holds this step.
    pub fn node(&self) -> Node<T> {
        let owner = self.graph.lock().edge(self.id).owner;
        Node::new(self.graph.clone(), owner)
    }

    /// Engine whose tape holds this step.
    pub fn engine(&self) -> EngineId {
        self.graph.lock().edge(self.id).engine
    }

    /// Operator name, `"seed"` for the edge standing for a node's seed.
    pub fn op_name(&self) -> &'static str {
        self.graph
            .lock()
            .edge(self.id)
            .op
            .as_ref()
            .map_or("seed", |op| op.name())
    }

    /// Record a further step on the same node.
    ///
    /// ```
    /// use ndtape::{Graph, Tensor};
    ///
    /// let graph = Graph::new();
    /// let x = graph.leaf(Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap());
    /// let edge = x.scale(3.0).unwrap().then(|n| n.sum_all()).unwrap();
    /// assert_eq!(edge.output().data(), &[9.0]);
    /// ```
    pub fn then<F>(&self, f: F) -> Result<Edge<T>, GraphError>
    where
        F: FnOnce(&Node<T>) -> Result<Edge<T>, GraphError>,
    {
        f(&self.node())
    }

    /// Run `tasks` concurrently on the node of this step.
    /// See [`Node::do_parallel`].
    pub fn then_parallel(&self, tasks: &[&ParallelTask<T>]) -> Result<Vec<Edge<T>>, GraphError> {
        self.node().do_parallel(tasks)
    }
}
