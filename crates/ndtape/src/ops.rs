//! Primitive operators recorded on a node's tape.
//!
//! Every forward method on a [`Node`](crate::Node) records one [`Op`]. The
//! enum is the dispatch table between an operator and its (forward, backward)
//! pair: `forward` computes the step's output and `backward` returns one
//! gradient per operand, each shaped exactly like that operand.
//!
//! Hyperparameters are stored as `f64` so a recorded op is independent of the
//! element type; they are converted with [`Scalar::from_f64`] when evaluated.

use std::ops::Range;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::error::TensorError;
use crate::operations::{
    broadcast_axis, concat, embed, map, map_par, matmul, slice, sum_all, sum_axis, transpose,
    zip_map_par,
};
use crate::scalar::Scalar;
use crate::shape::check_same_shape;
use crate::tensor::Tensor;

/// Per-operand gradients of one step. Almost every op is unary or binary.
pub type OperandGrads<T> = SmallVec<[Tensor<T>; 2]>;

/// A primitive tensor operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Identity,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Square,
    Sqrt,
    Exp,
    /// Natural logarithm.
    Ln,
    Sin,
    Cos,
    Tanh,
    Sigmoid,
    Relu,
    /// `x^p` for a constant exponent.
    Pow(f64),
    /// `alpha * x`.
    Scale(f64),
    /// `x + c`.
    AddScalar(f64),
    /// Matrix product of two rank-2 operands.
    MatMul,
    /// Rank-2 transpose.
    Transpose,
    Reshape(Vec<usize>),
    /// Block copy; one range per dimension.
    Slice(Vec<Range<usize>>),
    /// Sum of all elements into a shape-`[1]` tensor.
    SumAll,
    SumAxis { axis: usize, keepdims: bool },
    /// Concatenation of every operand along `axis`.
    Concat { axis: usize },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Identity => "identity",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Neg => "neg",
            Op::Square => "square",
            Op::Sqrt => "sqrt",
            Op::Exp => "exp",
            Op::Ln => "ln",
            Op::Sin => "sin",
            Op::Cos => "cos",
            Op::Tanh => "tanh",
            Op::Sigmoid => "sigmoid",
            Op::Relu => "relu",
            Op::Pow(_) => "pow",
            Op::Scale(_) => "scale",
            Op::AddScalar(_) => "add_scalar",
            Op::MatMul => "matmul",
            Op::Transpose => "transpose",
            Op::Reshape(_) => "reshape",
            Op::Slice(_) => "slice",
            Op::SumAll => "sum_all",
            Op::SumAxis { .. } => "sum_axis",
            Op::Concat { .. } => "concat",
        }
    }

    /// Number of operands, or `None` for variadic operators.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::MatMul => Some(2),
            Op::Concat { .. } => None,
            _ => Some(1),
        }
    }

    fn check_arity(&self, actual: usize) -> Result<(), TensorError> {
        match self.arity() {
            Some(expected) if expected != actual => Err(TensorError::WrongArity {
                op: self.name(),
                expected,
                actual,
            }),
            None if actual == 0 => Err(TensorError::WrongArity {
                op: self.name(),
                expected: 1,
                actual,
            }),
            _ => Ok(()),
        }
    }

    /// Evaluate the operator.
    ///
    /// `min_par` is the element count from which elementwise kernels split
    /// their work across the current rayon pool.
    pub fn forward<T: Scalar>(&self, inputs: &[&Tensor<T>], min_par: usize) -> Result<Tensor<T>, TensorError> {
        self.check_arity(inputs.len())?;
        let x = inputs[0];
        let out = match self {
            Op::Identity => x.clone(),
            Op::Add => zip_map_par(x, inputs[1], min_par, |a, b| a + b)?,
            Op::Sub => zip_map_par(x, inputs[1], min_par, |a, b| a - b)?,
            Op::Mul => zip_map_par(x, inputs[1], min_par, |a, b| a * b)?,
            Op::Div => zip_map_par(x, inputs[1], min_par, |a, b| a / b)?,
            Op::Neg => map_par(x, min_par, |a| -a),
            Op::Square => map_par(x, min_par, |a| a * a),
            Op::Sqrt => map_par(x, min_par, Scalar::sqrt),
            Op::Exp => map_par(x, min_par, Scalar::exp),
            Op::Ln => map_par(x, min_par, Scalar::ln),
            Op::Sin => map_par(x, min_par, Scalar::sin),
            Op::Cos => map_par(x, min_par, Scalar::cos),
            Op::Tanh => map_par(x, min_par, Scalar::tanh),
            Op::Sigmoid => map_par(x, min_par, sigmoid),
            Op::Relu => map_par(x, min_par, |a| a.max(T::zero())),
            Op::Pow(p) => {
                let p = T::from_f64(*p);
                map_par(x, min_par, move |a| a.powf(p))
            }
            Op::Scale(alpha) => {
                let alpha = T::from_f64(*alpha);
                map_par(x, min_par, move |a| a * alpha)
            }
            Op::AddScalar(c) => {
                let c = T::from_f64(*c);
                map_par(x, min_par, move |a| a + c)
            }
            Op::MatMul => matmul(x, inputs[1])?,
            Op::Transpose => transpose(x)?,
            Op::Reshape(shape) => x.reshape(shape)?,
            Op::Slice(ranges) => slice(x, ranges)?,
            Op::SumAll => sum_all(x),
            Op::SumAxis { axis, keepdims } => sum_axis(x, *axis, *keepdims)?,
            Op::Concat { axis } => concat(inputs, *axis)?,
        };
        Ok(out)
    }

    /// Vector-Jacobian product of the step.
    ///
    /// Returns one gradient per operand. When the upstream gradient has at
    /// least `min_par` elements the operands are differentiated in parallel.
    pub fn backward<T: Scalar>(
        &self,
        inputs: &[&Tensor<T>],
        output: &Tensor<T>,
        upstream: &Tensor<T>,
        min_par: usize,
    ) -> Result<OperandGrads<T>, TensorError> {
        self.check_arity(inputs.len())?;
        check_same_shape(output.shape(), upstream.shape())?;

        if inputs.len() > 1 && upstream.len() >= min_par {
            let grads = (0..inputs.len())
                .into_par_iter()
                .map(|k| self.operand_grad(k, inputs, output, upstream, min_par))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(SmallVec::from_vec(grads));
        }
        (0..inputs.len())
            .map(|k| self.operand_grad(k, inputs, output, upstream, min_par))
            .collect()
    }

    /// Gradient with respect to operand `k`.
    fn operand_grad<T: Scalar>(
        &self,
        k: usize,
        inputs: &[&Tensor<T>],
        output: &Tensor<T>,
        up: &Tensor<T>,
        min_par: usize,
    ) -> Result<Tensor<T>, TensorError> {
        let x = inputs[0];
        let grad = match (self, k) {
            (Op::Identity | Op::Add | Op::AddScalar(_), _) => up.clone(),
            (Op::Sub, 0) => up.clone(),
            (Op::Sub, _) | (Op::Neg, _) => map_par(up, min_par, |g| -g),
            (Op::Mul, 0) => zip_map_par(up, inputs[1], min_par, |g, b| g * b)?,
            (Op::Mul, _) => zip_map_par(up, x, min_par, |g, a| g * a)?,
            (Op::Div, 0) => zip_map_par(up, inputs[1], min_par, |g, b| g / b)?,
            (Op::Div, _) => {
                // d(a/b)/db = -(a/b) / b
                let ratio = zip_map_par(up, output, min_par, |g, q| -g * q)?;
                zip_map_par(&ratio, inputs[1], min_par, |r, b| r / b)?
            }
            (Op::Square, _) => {
                let two = T::from_f64(2.0);
                zip_map_par(up, x, min_par, move |g, a| two * a * g)?
            }
            (Op::Sqrt, _) => {
                let half = T::from_f64(0.5);
                zip_map_par(up, output, min_par, move |g, s| g * half / s)?
            }
            (Op::Exp, _) => zip_map_par(up, output, min_par, |g, e| g * e)?,
            (Op::Ln, _) => zip_map_par(up, x, min_par, |g, a| g / a)?,
            (Op::Sin, _) => zip_map_par(up, x, min_par, |g, a| g * a.cos())?,
            (Op::Cos, _) => zip_map_par(up, x, min_par, |g, a| -g * a.sin())?,
            (Op::Tanh, _) => zip_map_par(up, output, min_par, |g, t| g * (T::one() - t * t))?,
            (Op::Sigmoid, _) => zip_map_par(up, output, min_par, |g, s| g * s * (T::one() - s))?,
            (Op::Relu, _) => zip_map_par(up, x, min_par, |g, a| if a > T::zero() { g } else { T::zero() })?,
            (Op::Pow(p), _) => {
                let p_t = T::from_f64(*p);
                let p_minus_one = T::from_f64(*p - 1.0);
                zip_map_par(up, x, min_par, move |g, a| g * p_t * a.powf(p_minus_one))?
            }
            (Op::Scale(alpha), _) => {
                let alpha = T::from_f64(*alpha);
                map_par(up, min_par, move |g| g * alpha)
            }
            (Op::MatMul, 0) => matmul(up, &transpose(inputs[1])?)?,
            (Op::MatMul, _) => matmul(&transpose(x)?, up)?,
            (Op::Transpose, _) => transpose(up)?,
            (Op::Reshape(_), _) => up.reshape(x.shape())?,
            (Op::Slice(ranges), _) => {
                let starts: Vec<usize> = ranges.iter().map(|r| r.start).collect();
                embed(up, x.shape(), &starts)?
            }
            (Op::SumAll, _) => {
                let g = up.data()[0];
                map(x, move |_| g)
            }
            (Op::SumAxis { axis, .. }, _) => broadcast_axis(up, x.shape(), *axis)?,
            (Op::Concat { axis }, k) => {
                let offset: usize = inputs[..k].iter().map(|t| t.shape()[*axis]).sum();
                let mut ranges: Vec<Range<usize>> = up.shape().iter().map(|&d| 0..d).collect();
                ranges[*axis] = offset..offset + inputs[k].shape()[*axis];
                slice(up, &ranges)?
            }
        };
        Ok(grad)
    }
}

fn sigmoid<T: Scalar>(a: T) -> T {
    T::one() / (T::one() + (-a).exp())
}
