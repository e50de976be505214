//! Integration tests for accumulation modes, the reset family and optimize.

use ndtape::{AccumulationMode, Adam, BackwardState, Graph, GraphConfig, GraphError, Node, Tensor};

fn accumulate_graph() -> Graph<f64> {
    Graph::with_config(GraphConfig::new().with_accumulation(AccumulationMode::Accumulate)).unwrap()
}

/// x <- sum(x * w), with w a separate leaf reached only as an operand.
fn weighted_sum(graph: &Graph<f64>) -> (Node<f64>, Node<f64>) {
    let x = graph.leaf(Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap());
    let w = graph.leaf(Tensor::from_vec(vec![3.0, 4.0], &[2]).unwrap());
    x.mul(&w).unwrap();
    x.sum_all().unwrap();
    (x, w)
}

#[test]
fn test_accumulate_mode_sums_passes() {
    let graph = accumulate_graph();
    let x = graph.leaf(Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap());
    assert_eq!(x.accumulation_mode(), AccumulationMode::Accumulate);
    x.square().unwrap();

    x.back(Tensor::ones(&[2])).unwrap();
    x.reset_backpropagation();
    let grad = x.back(Tensor::full(&[2], 0.5)).unwrap();

    assert_eq!(grad.data(), &[3.0, 6.0]);
    let history = x.gradient_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].data(), &[2.0, 4.0]);
    assert_eq!(history[1].data(), &[1.0, 2.0]);
}

#[test]
fn test_back_after_reset_is_repeatable() {
    let graph = Graph::new();
    let x = graph.leaf(Tensor::from_vec(vec![0.5, -1.5, 2.0], &[3]).unwrap());
    let b = x.branch();
    b.tanh().unwrap();
    x.mul(&b).unwrap();
    x.sum_all().unwrap();

    let g = Tensor::scalar(0.75);
    let first = x.back(g.clone()).unwrap();
    x.reset_backpropagation();
    let second = x.back(g).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_replace_mode_keeps_last_pass() {
    let graph = Graph::new();
    let x = graph.leaf(Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap());
    x.square().unwrap();
    x.back(Tensor::ones(&[2])).unwrap();
    x.reset_backpropagation();
    let grad = x.back(Tensor::full(&[2], 0.5)).unwrap();
    assert_eq!(grad.data(), &[1.0, 2.0]);
    assert!(x.gradient_history().is_empty());
}

#[test]
fn test_mode_can_be_set_per_node() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(Tensor::ones(&[1]));
    x.set_accumulation_mode(AccumulationMode::Accumulate);
    x.scale(3.0).unwrap();
    x.back(Tensor::ones(&[1])).unwrap();
    x.reset_backpropagation();
    x.back(Tensor::ones(&[1])).unwrap();
    assert_eq!(x.gradient().unwrap().data(), &[6.0]);
}

#[test]
fn test_reset_backpropagation_keeps_gradient() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(Tensor::ones(&[2]));
    x.exp().unwrap();
    x.back(Tensor::ones(&[2])).unwrap();
    assert!(matches!(x.state(), BackwardState::Finished { .. }));

    x.reset_backpropagation();
    assert_eq!(x.state(), BackwardState::NotStarted);
    assert!(x.gradient().is_some());
    assert_eq!(x.tape_len(), 1);
}

#[test]
fn test_reset_gradient_clears_accumulators() {
    let graph = accumulate_graph();
    let x = graph.leaf(Tensor::from_vec(vec![2.0], &[1]).unwrap());
    let edge = x.scale(3.0).unwrap();
    x.back(Tensor::ones(&[1])).unwrap();
    assert_eq!(edge.gradient(0).unwrap().data(), &[3.0]);

    x.reset_gradient();
    assert!(x.gradient().is_none());
    assert!(x.gradient_history().is_empty());
    assert_eq!(edge.gradient(0).unwrap().data(), &[0.0]);
    assert_eq!(x.tape_len(), 1);
}

#[test]
fn test_full_reset_returns_to_seed() {
    let graph = Graph::new();
    let x = graph.leaf(Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap());
    let b = x.branch();
    b.square().unwrap();
    x.add(&b).unwrap();
    x.back(Tensor::ones(&[2])).unwrap();

    x.reset();
    assert_eq!(x.tape_len(), 0);
    assert_eq!(x.value(), x.seed());
    assert!(x.gradient().is_none());
    assert!(!b.is_dependent());
    assert_eq!(b.tape_len(), 0);

    // The same node can record a new computation.
    x.square().unwrap();
    assert_eq!(x.back(Tensor::ones(&[2])).unwrap().data(), &[2.0, 4.0]);
}

#[test]
fn test_reset_cascades_through_branches() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(Tensor::ones(&[2]));
    let b = x.branch();
    b.exp().unwrap();
    x.add(&b).unwrap();
    x.back(Tensor::ones(&[2])).unwrap();
    assert!(matches!(b.state(), BackwardState::Finished { .. }));

    // Resetting from the branch reaches the parent, and vice versa.
    b.reset_backpropagation();
    assert_eq!(x.state(), BackwardState::NotStarted);
    assert_eq!(b.state(), BackwardState::NotStarted);

    let again = x.back(Tensor::ones(&[2])).unwrap();
    assert!((again.data()[0] - (1.0 + std::f64::consts::E)).abs() < 1e-12);
}

#[test]
fn test_reset_cascades_through_split_groups() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(Tensor::ones(&[2]));
    let pieces = x.split(1, 0).unwrap();
    pieces[0].back(Tensor::ones(&[1])).unwrap();
    pieces[1].back(Tensor::ones(&[1])).unwrap();
    assert!(matches!(x.state(), BackwardState::Finished { .. }));

    pieces[0].reset_gradient();
    assert!(x.gradient().is_none());
    assert_eq!(pieces[1].state(), BackwardState::NotStarted);

    // The group counts from zero again.
    pieces[1].back(Tensor::ones(&[1])).unwrap();
    assert!(x.gradient().is_none());
    pieces[0].back(Tensor::ones(&[1])).unwrap();
    assert_eq!(x.gradient().unwrap().data(), &[1.0, 1.0]);
}

#[test]
fn test_reset_is_idempotent() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(Tensor::ones(&[2]));
    x.square().unwrap();
    x.back(Tensor::ones(&[2])).unwrap();
    x.reset();
    x.reset();
    x.reset_gradient();
    x.reset_backpropagation();
    assert_eq!(x.tape_len(), 0);
    assert_eq!(x.state(), BackwardState::NotStarted);
    assert!(x.gradient().is_none());
}

#[test]
fn test_optimize_updates_seed() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(Tensor::from_vec(vec![1.0, -2.0], &[2]).unwrap());
    x.square().unwrap();
    x.sum_all().unwrap();
    x.back(Tensor::scalar(1.0)).unwrap();

    let mut adam = Adam::new(0.1);
    x.optimize(&mut adam).unwrap();
    let seed = x.seed();
    assert!((seed.data()[0] - 0.9).abs() < 1e-6);
    assert!((seed.data()[1] + 1.9).abs() < 1e-6);
    // Recorded values stay until the tape is reset.
    assert_eq!(x.value().data(), &[5.0]);
    x.reset();
    assert_eq!(x.value(), seed);
}

#[test]
fn test_optimize_without_gradient() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(Tensor::ones(&[1]));
    assert_eq!(
        x.optimize(&mut Adam::new(0.1)).unwrap_err(),
        GraphError::NoGradient { node: x.id() }
    );
}

#[test]
fn test_training_loop_reduces_loss() {
    let graph = Graph::new();
    let w = graph.leaf(Tensor::from_vec(vec![3.0, -4.0], &[2]).unwrap());
    let mut adam = Adam::new(0.1);
    let mut losses = Vec::new();
    for _ in 0..200 {
        w.square().unwrap();
        w.sum_all().unwrap();
        losses.push(w.value().data()[0]);
        w.back(Tensor::scalar(1.0)).unwrap();
        w.optimize(&mut adam).unwrap();
        w.reset();
    }
    assert!(losses.last().unwrap() < &(losses[0] * 0.1));
}

#[test]
fn test_operand_root_gradient_is_replaced_each_pass() {
    let graph = Graph::new();
    let (x, w) = weighted_sum(&graph);

    assert_eq!(x.back(Tensor::scalar(1.0)).unwrap().data(), &[3.0, 4.0]);
    assert_eq!(w.gradient().unwrap().data(), &[1.0, 2.0]);

    // Only x is reset; w is reached again through the operand.
    x.reset_backpropagation();
    assert!(matches!(w.state(), BackwardState::Finished { .. }));
    assert_eq!(x.back(Tensor::scalar(1.0)).unwrap().data(), &[3.0, 4.0]);
    assert_eq!(w.gradient().unwrap().data(), &[1.0, 2.0]);
    assert!(w.gradient_history().is_empty());
}

#[test]
fn test_operand_root_history_grows_per_pass() {
    let graph = accumulate_graph();
    let (x, w) = weighted_sum(&graph);
    for _ in 0..3 {
        x.back(Tensor::scalar(1.0)).unwrap();
        x.reset_backpropagation();
    }

    let history = w.gradient_history();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|g| g.data() == [1.0, 2.0]));
    assert_eq!(w.gradient().unwrap().data(), &[3.0, 6.0]);
    assert_eq!(x.gradient_history().len(), 3);
    assert_eq!(x.gradient().unwrap().data(), &[9.0, 12.0]);
}

#[test]
fn test_repeated_passes_through_separate_merge_node() {
    let graph = Graph::new();
    let x = graph.leaf(Tensor::eye(2));
    let b1 = x.branch();
    let b2 = x.branch();
    b1.sum_all().unwrap();
    b2.sum_all().unwrap();
    let merged = graph.leaf(Tensor::zeros(&[1]));
    merged.add(&b1).unwrap();
    merged.add(&b2).unwrap();

    for _ in 0..2 {
        merged.back(Tensor::scalar(1.0)).unwrap();
        assert_eq!(x.gradient().unwrap(), Tensor::full(&[2, 2], 2.0));
        assert_eq!(b1.gradient().unwrap(), Tensor::ones(&[2, 2]));
        merged.reset_backpropagation();
    }
}

#[test]
fn test_branch_consumer_outside_pass_contributes_zero() {
    // b = 3x feeds y; z consumes x^2. A pass from z reaches x again but not
    // y, so b adds nothing to it.
    let graph = Graph::new();
    let x = graph.leaf(Tensor::from_vec(vec![2.0], &[1]).unwrap());
    let b = x.branch();
    b.scale(3.0).unwrap();
    let y = graph.leaf(Tensor::from_vec(vec![5.0], &[1]).unwrap());
    y.mul(&b).unwrap();
    x.square().unwrap();
    let z = graph.leaf(Tensor::from_vec(vec![7.0], &[1]).unwrap());
    z.mul(&x).unwrap();

    y.back(Tensor::ones(&[1])).unwrap();
    assert_eq!(x.gradient().unwrap().data(), &[15.0]);

    z.back(Tensor::ones(&[1])).unwrap();
    // d/dx of 7 * x^2 at x = 2
    assert_eq!(x.gradient().unwrap().data(), &[28.0]);
    assert_eq!(z.gradient().unwrap().data(), &[4.0]);
}
