//! Computation graph and backward execution.
//!
//! A [`Graph`] owns an arena of nodes, edges, split groups and branch
//! trackers behind a single mutex. [`Node`] and [`Edge`] are cheap handles
//! into it and can be sent across threads.
//!
//! Forward calls hold the lock only while a step is recorded; the kernel
//! itself runs unlocked. A backward pass holds the lock for its whole
//! duration.

mod arena;
mod backward;
mod edge;
mod node;
mod parallel;
mod reset;
mod split;
mod tracker;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::scalar::Scalar;
use crate::tensor::Tensor;

pub use arena::{BackwardState, EdgeId, EngineId, NodeId};
pub use edge::Edge;
pub use node::{Input, Node};
pub use parallel::ParallelTask;

pub(crate) use arena::{Arena, StateKey};
pub(crate) use backward::Executor;

struct GraphInner<T: Scalar> {
    arena: Mutex<Arena<T>>,
    config: GraphConfig,
    pool: Option<ThreadPool>,
}

/// A dynamic computation graph.
///
/// # Example
///
/// ```
/// use ndtape::{Graph, Tensor};
///
/// let graph = Graph::new();
/// let x = graph.leaf(Tensor::from_vec(vec![3.0, 4.0], &[2]).unwrap());
/// x.square().unwrap();
/// x.sum_all().unwrap();
/// let grad = x.back(Tensor::scalar(1.0)).unwrap();
/// assert_eq!(grad.data(), &[6.0, 8.0]);
/// ```
pub struct Graph<T: Scalar> {
    inner: Arc<GraphInner<T>>,
}

impl<T: Scalar> Graph<T> {
    /// Graph with the default configuration, running on rayon's global pool.
    pub fn new() -> Self {
        Self::from_parts(GraphConfig::default(), None)
    }

    /// Graph with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::ThreadPool` if a dedicated pool was requested and
    /// could not be started.
    pub fn with_config(config: GraphConfig) -> Result<Self, GraphError> {
        let pool = match config.num_threads {
            Some(n) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("ndtape-worker-{i}"))
                    .build()
                    .map_err(|e| GraphError::ThreadPool(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self::from_parts(config, pool))
    }

    fn from_parts(config: GraphConfig, pool: Option<ThreadPool>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                arena: Mutex::new(Arena::new()),
                config,
                pool,
            }),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    /// Create a root node holding `seed`.
    pub fn leaf(&self, seed: Tensor<T>) -> Node<T> {
        let mut arena = self.lock();
        let tracker = arena.new_tracker();
        let config = &self.inner.config;
        let id = arena.add_node(
            seed,
            EngineId::DEFAULT,
            config.default_priority,
            config.accumulation,
            tracker,
        );
        Node::new(self.clone(), id)
    }

    /// Allocate a new engine. Nodes switched to it record a fresh tape
    /// starting from their seed.
    pub fn new_engine(&self) -> EngineId {
        self.lock().new_engine()
    }

    /// Number of nodes created so far.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Arena<T>> {
        self.inner.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn same_graph(&self, other: &Graph<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` on the graph's worker pool.
    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.inner.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Run a backward pass from `key` with the arena locked.
    pub(crate) fn back(&self, key: StateKey) -> Result<Tensor<T>, GraphError> {
        let mut arena = self.lock();
        let inner = &*self.inner;
        Executor::new(&mut arena, &inner.config, inner.pool.as_ref()).back(key)
    }
}

impl<T: Scalar> Clone for Graph<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Scalar> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> fmt::Debug for Graph<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("num_nodes", &self.node_count())
            .field("config", &self.inner.config)
            .finish()
    }
}
