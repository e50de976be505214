//! Integration tests for branches and branch resolution.

use approx::assert_relative_eq;
use ndtape::{BackwardState, Graph, GraphError, Priority, Tensor};

fn vec1(data: &[f64]) -> Tensor<f64> {
    Tensor::from_vec(data.to_vec(), &[data.len()]).unwrap()
}

#[test]
fn test_two_branches_sum_into_parent() {
    let graph = Graph::new();
    let x = graph.leaf(Tensor::eye(2));
    let b1 = x.branch();
    let b2 = x.branch();
    assert!(b1.is_dependent());
    assert_eq!(b1.parent().unwrap().id(), x.id());
    assert_eq!(b2.value(), Tensor::eye(2));

    // The parent's own path contributes nothing; each branch contributes ones.
    x.scale(0.0).unwrap();
    x.add(&b1).unwrap();
    x.add(&b2).unwrap();
    let grad = x.back(Tensor::ones(&[2, 2])).unwrap();
    assert_eq!(grad, Tensor::full(&[2, 2], 2.0));
    assert_eq!(b1.gradient().unwrap(), Tensor::ones(&[2, 2]));
}

#[test]
fn test_summed_branches_merged_on_another_node() {
    let graph = Graph::new();
    let x = graph.leaf(Tensor::eye(2));
    let b1 = x.branch();
    let b2 = x.branch();
    b1.sum_all().unwrap();
    b2.sum_all().unwrap();

    let merged = graph.leaf(Tensor::zeros(&[1]));
    merged.add(&b1).unwrap();
    merged.add(&b2).unwrap();
    merged.back(Tensor::scalar(1.0)).unwrap();

    // Neither branch reached x through x's own pass; the tracker runs x once
    // merged settles.
    assert_eq!(x.gradient().unwrap(), Tensor::full(&[2, 2], 2.0));
}

#[test]
fn test_branch_appends_identity_on_empty_tape() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(Tensor::ones(&[3]));
    let _b = x.branch();
    assert_eq!(x.tape_len(), 1);
    let _c = x.branch();
    assert_eq!(x.tape_len(), 1);
}

#[test]
fn test_fan_in_order_does_not_matter() {
    let data = [0.5, -1.0, 2.0];
    let expected: Vec<f64> = data.iter().map(|&v| 1.0 + 2.0 * v + f64::exp(v)).collect();

    for squared_first in [true, false] {
        let graph = Graph::new();
        let x = graph.leaf(vec1(&data));
        let sq = x.branch();
        let ex = x.branch();
        sq.square().unwrap();
        ex.exp().unwrap();
        if squared_first {
            x.add(&sq).unwrap();
            x.add(&ex).unwrap();
        } else {
            x.add(&ex).unwrap();
            x.add(&sq).unwrap();
        }
        let grad = x.back(Tensor::ones(&[3])).unwrap();
        for (g, e) in grad.data().iter().zip(&expected) {
            assert_relative_eq!(g, e, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_nested_branches() {
    // b = 2x, c = b^2, b <- b + c, x <- x + b
    // d/dx = 1 + 2 + 8x
    let graph = Graph::new();
    let x = graph.leaf(vec1(&[1.0, 3.0]));
    let b = x.branch();
    b.scale(2.0).unwrap();
    let c = b.branch();
    c.square().unwrap();
    b.add(&c).unwrap();
    x.add(&b).unwrap();

    let grad = x.back(Tensor::ones(&[2])).unwrap();
    assert_eq!(grad.data(), &[11.0, 27.0]);
    assert!(matches!(c.state(), BackwardState::Finished { .. }));
    assert!(matches!(b.state(), BackwardState::Finished { .. }));
}

#[test]
fn test_branch_used_by_another_root() {
    // The branch feeds y, an unrelated root. y's pass leaves the branch
    // pending; the tracker then runs x, which pulls it.
    let graph = Graph::new();
    let x = graph.leaf(vec1(&[2.0]));
    let b = x.branch();
    b.scale(3.0).unwrap();
    let y = graph.leaf(vec1(&[5.0]));
    y.mul(&b).unwrap();
    x.square().unwrap();

    let gy = y.back(Tensor::ones(&[1])).unwrap();
    assert_eq!(gy.data(), &[6.0]);
    // d/dx of x^2 is not part of y's pass; only the branch path reached x.
    assert_eq!(x.gradient().unwrap().data(), &[15.0]);
}

#[test]
fn test_unresolved_branch_is_an_error() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(vec1(&[1.0, 2.0]));
    let b = x.branch();
    b.square().unwrap();
    x.sum_all().unwrap();
    let err = x.back(Tensor::scalar(1.0)).unwrap_err();
    assert_eq!(err, GraphError::UnresolvedBranchGradient { node: b.id() });
}

#[test]
fn test_unused_empty_branch_contributes_zero() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(vec1(&[1.0, 2.0]));
    let _b = x.branch();
    x.square().unwrap();
    let grad = x.back(Tensor::ones(&[2])).unwrap();
    assert_eq!(grad.data(), &[2.0, 4.0]);
}

#[test]
fn test_direct_back_on_branch_rejected() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(vec1(&[1.0]));
    let b = x.branch();
    b.exp().unwrap();
    assert_eq!(
        b.back(Tensor::ones(&[1])).unwrap_err(),
        GraphError::IllegalDirectBackOnBranch {
            node: b.id(),
            parent: x.id()
        }
    );
    assert_eq!(b.state(), BackwardState::NotStarted);
}

#[test]
fn test_branch_from_seed() {
    // x is transformed before the seed branch is taken; the branch still
    // sees the seed value and its gradient joins at the seed.
    let graph = Graph::new();
    let x = graph.leaf(vec1(&[1.0, 2.0]));
    x.scale(10.0).unwrap();
    let s = x.branch_from_seed();
    assert_eq!(s.value().data(), &[1.0, 2.0]);
    s.square().unwrap();
    x.add(&s).unwrap();
    let grad = x.back(Tensor::ones(&[2])).unwrap();
    assert_eq!(grad.data(), &[12.0, 14.0]);
}

#[test]
fn test_repeated_back_returns_previous_gradient() {
    let graph: Graph<f64> = Graph::new();
    let x = graph.leaf(vec1(&[1.0, 2.0]));
    x.square().unwrap();
    let first = x.back(Tensor::ones(&[2])).unwrap();
    let second = x.back(Tensor::ones(&[2])).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_priorities_do_not_change_gradients() {
    let expected = {
        let graph = Graph::new();
        let w = graph.leaf(vec1(&[0.5, 1.5]));
        let x = graph.leaf(vec1(&[2.0, -1.0]));
        x.mul(&w).unwrap();
        x.exp().unwrap();
        let gx = x.back(Tensor::ones(&[2])).unwrap();
        (gx, w.gradient().unwrap())
    };

    for priority in [Priority::Low, Priority::High] {
        let graph = Graph::new();
        let w = graph.leaf(vec1(&[0.5, 1.5]));
        w.set_priority(priority);
        let x = graph.leaf(vec1(&[2.0, -1.0]));
        x.mul(&w).unwrap();
        x.exp().unwrap();
        let gx = x.back(Tensor::ones(&[2])).unwrap();
        assert_eq!(gx, expected.0);
        assert_eq!(w.gradient().unwrap(), expected.1);
        assert!(matches!(w.state(), BackwardState::Finished { .. }));
    }
}

#[test]
fn test_low_priority_node_collects_every_deposit() {
    // w feeds two separate steps of x; deferred, it runs once with both.
    let graph = Graph::new();
    let w = graph.leaf(vec1(&[3.0]));
    w.set_priority(Priority::Low);
    w.scale(2.0).unwrap();
    let x = graph.leaf(vec1(&[1.0]));
    x.add(&w).unwrap();
    x.mul(&w).unwrap();
    // x = (x + 2w) * 2w
    let gx = x.back(Tensor::ones(&[1])).unwrap();
    assert_eq!(gx.data(), &[6.0]);
    // d/dw = 2 * 2w + 2 * (x + 2w) = 12 + 14
    assert_eq!(w.gradient().unwrap().data(), &[26.0]);
}
