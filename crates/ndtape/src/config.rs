//! Graph-wide configuration.

/// How a node folds the result of a finished backward pass into its gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulationMode {
    /// Append every pass to the gradient history and add it to the running total.
    Accumulate,
    /// Overwrite the gradient with the latest pass.
    #[default]
    Replace,
}

/// Backward scheduling hint for a node.
///
/// Priorities only change the order in which producers are visited; the
/// resulting gradients are the same for every assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Deferred until nothing else can make progress, then run once with
    /// every gradient that reached it.
    Low,
    #[default]
    Normal,
    /// Visited before normal-priority producers of the same step.
    High,
}

/// Configuration shared by every node of a [`Graph`](crate::Graph).
///
/// # Example
///
/// ```
/// use ndtape::{AccumulationMode, GraphConfig};
///
/// let config = GraphConfig::new()
///     .with_accumulation(AccumulationMode::Accumulate)
///     .with_num_threads(2);
/// assert_eq!(config.num_threads, Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Accumulation mode given to new nodes.
    pub accumulation: AccumulationMode,
    /// Priority given to new nodes.
    pub default_priority: Priority,
    /// Size of the dedicated worker pool; `None` uses rayon's global pool.
    pub num_threads: Option<usize>,
    /// Element count at which gradient kernels start splitting work across
    /// the pool.
    pub parallel_min_elements: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            accumulation: AccumulationMode::default(),
            default_priority: Priority::default(),
            num_threads: None,
            parallel_min_elements: 4096,
        }
    }
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accumulation(mut self, mode: AccumulationMode) -> Self {
        self.accumulation = mode;
        self
    }

    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_parallel_min_elements(mut self, elements: usize) -> Self {
        self.parallel_min_elements = elements;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.accumulation, AccumulationMode::Replace);
        assert_eq!(config.default_priority, Priority::Normal);
        assert_eq!(config.num_threads, None);
        assert_eq!(config.parallel_min_elements, 4096);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_builder() {
        let config = GraphConfig::new()
            .with_default_priority(Priority::Low)
            .with_parallel_min_elements(16);
        assert_eq!(config.default_priority, Priority::Low);
        assert_eq!(config.parallel_min_elements, 16);
    }
}
