//! The reset family.
//!
//! A reset applies to the active engine of the starting node and cascades
//! over everything reachable through branch links, parallel siblings and
//! split groups, in both directions.

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use super::arena::{Arena, BackwardState, EngineId, NodeId, SplitGroupId, StateKey};
use crate::scalar::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum ResetLevel {
    /// Backward flags and per-pass buffers.
    Backpropagation,
    /// Also gradients, gradient history and edge accumulators.
    Gradient,
    /// Also the tape and every link recorded on the engine.
    Full,
}

pub(super) fn reset<T: Scalar>(arena: &mut Arena<T>, start: NodeId, level: ResetLevel) {
    let engine = arena.node(start).engine;
    let (nodes, groups) = component(arena, start, engine);
    debug!(node = %start, engine = engine.index(), nodes = nodes.len(), ?level, "reset");

    for &id in &nodes {
        let tracker = arena.node(id).tracker;
        let tracker = arena.tracker_mut(tracker);
        tracker.pending.clear();
        tracker.deferred.clear();
    }
    for &group in &groups {
        arena.group_mut(group).clear();
    }
    for &id in &nodes {
        reset_node(arena, id, engine, level);
    }
    if level == ResetLevel::Full {
        for &id in &nodes {
            dissolve_links(arena, id, engine);
        }
    }
}

/// Every node connected to `start` on `engine`, with the split groups met on
/// the way.
fn component<T: Scalar>(
    arena: &Arena<T>,
    start: NodeId,
    engine: EngineId,
) -> (BTreeSet<NodeId>, BTreeSet<SplitGroupId>) {
    let mut nodes = BTreeSet::from([start]);
    let mut groups = BTreeSet::new();
    let mut queue = VecDeque::from([start]);

    while let Some(id) = queue.pop_front() {
        let node = arena.node(id);
        let mut neighbours: Vec<NodeId> = node.children.clone();
        if let Some(link) = node.link.filter(|link| link.engine == engine) {
            neighbours.push(link.parent);
        }
        let member_of = node.split.map(|member| member.group);
        for group in node.split_groups.iter().copied().chain(member_of) {
            let data = arena.group(group);
            if data.engine != engine {
                continue;
            }
            groups.insert(group);
            neighbours.push(data.origin);
            neighbours.extend(data.members.iter().copied());
        }
        for next in neighbours {
            if nodes.insert(next) {
                queue.push_back(next);
            }
        }
    }
    (nodes, groups)
}

fn reset_node<T: Scalar>(arena: &mut Arena<T>, id: NodeId, engine: EngineId, level: ResetLevel) {
    let node = arena.node_mut(id);
    let seed = node.seed.clone();
    let Some(state) = node.states.get_mut(&engine) else {
        return;
    };

    state.phase = BackwardState::NotStarted;
    state.cursor = 0;
    state.pending.clear();
    state.waiting.clear();
    state.pass_gradient = None;
    state.delivered = false;
    state.push_on_finish = false;
    if level == ResetLevel::Backpropagation {
        return;
    }

    state.gradient = None;
    state.history.clear();
    let mut edges: Vec<_> = state.tape.iter().map(|entry| entry.edge).collect();
    edges.push(state.seed_edge);
    if level == ResetLevel::Full {
        state.tape.clear();
        state.current = seed;
    }
    for edge in edges {
        for grad in &mut arena.edge_mut(edge).grads {
            grad.fill(T::zero());
        }
    }
}

/// Drop the branch links and split memberships recorded on `engine`.
fn dissolve_links<T: Scalar>(arena: &mut Arena<T>, id: NodeId, engine: EngineId) {
    if let Some(seed_edge) = arena.peek_state(StateKey { node: id, engine }).map(|s| s.seed_edge) {
        let edge = arena.edge_mut(seed_edge);
        edge.branches.clear();
        edge.parallel.clear();
    }

    let (link, split) = {
        let node = arena.node(id);
        (node.link, node.split)
    };
    if link.is_some_and(|link| link.engine == engine) {
        arena.node_mut(id).link = None;
    }
    if split.is_some_and(|member| arena.group(member.group).engine == engine) {
        arena.node_mut(id).split = None;
    }

    let children = arena.node(id).children.clone();
    let kept: Vec<NodeId> = children
        .into_iter()
        .filter(|&child| {
            arena
                .node(child)
                .link
                .is_some_and(|link| link.parent == id && link.engine != engine)
        })
        .collect();
    let groups = arena.node(id).split_groups.clone();
    let kept_groups: Vec<SplitGroupId> = groups
        .into_iter()
        .filter(|&group| arena.group(group).engine != engine)
        .collect();

    let node = arena.node_mut(id);
    node.children = kept;
    node.split_groups = kept_groups;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::tensor::Tensor;

    #[test]
    fn test_component_follows_links_and_groups() {
        let graph: Graph<f64> = Graph::new();
        let x = graph.leaf(Tensor::ones(&[2]));
        let b = x.branch();
        let pieces = b.split(1, 0).unwrap();
        let other = graph.leaf(Tensor::ones(&[2]));

        let arena = graph.lock();
        let (nodes, groups) = component(&arena, pieces[1].id(), EngineId::DEFAULT);
        assert_eq!(
            nodes,
            BTreeSet::from([x.id(), b.id(), pieces[0].id(), pieces[1].id()])
        );
        assert_eq!(groups.len(), 1);
        assert!(!nodes.contains(&other.id()));
    }

    #[test]
    fn test_component_ignores_other_engines() {
        let graph: Graph<f64> = Graph::new();
        let x = graph.leaf(Tensor::ones(&[2]));
        let e = graph.new_engine();
        x.set_engine(e);
        let b = x.branch();

        let arena = graph.lock();
        let (nodes, _) = component(&arena, b.id(), EngineId::DEFAULT);
        assert_eq!(nodes, BTreeSet::from([b.id()]));
    }
}
