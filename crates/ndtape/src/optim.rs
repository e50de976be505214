//! Weight-update policies applied by [`Node::optimize`](crate::Node::optimize).
//!
//! An optimizer owns per-cell state for one parameter tensor. `initialize`
//! sizes that state; `update_weights` consumes one gradient and moves the
//! parameter in place.

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::shape::check_same_shape;
use crate::tensor::Tensor;

/// Consumer of a finished gradient.
pub trait Optimizer<T: Scalar> {
    /// Allocate state for a parameter of the given shape, discarding any
    /// previous state.
    fn initialize(&mut self, shape: &[usize]);

    /// Apply one update step to `param` using `grad`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if `grad` and `param` differ in shape.
    fn update_weights(&mut self, param: &mut Tensor<T>, grad: &Tensor<T>) -> Result<(), TensorError>;
}

/// Adam hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// First and second moment buffers for one parameter tensor.
#[derive(Debug, Clone, Default)]
struct MomentBuf {
    shape: Vec<usize>,
    m: Vec<f64>,
    v: Vec<f64>,
    step: u32,
}

impl MomentBuf {
    fn zeros(shape: &[usize]) -> Self {
        let n = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            m: vec![0.0; n],
            v: vec![0.0; n],
            step: 0,
        }
    }

    /// Advance the moments with `grad` and return the bias-corrected Adam
    /// direction for every cell.
    fn advance<T: Scalar>(&mut self, config: &AdamConfig, grad: &Tensor<T>) -> Vec<f64> {
        self.step += 1;
        let bc1_inv = 1.0 / (1.0 - config.beta1.powi(self.step as i32));
        let bc2_inv = 1.0 / (1.0 - config.beta2.powi(self.step as i32));
        grad.data()
            .iter()
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
            .map(|(&g, (m, v))| {
                let g = g.to_f64();
                *m = config.beta1 * *m + (1.0 - config.beta1) * g;
                *v = config.beta2 * *v + (1.0 - config.beta2) * g * g;
                let m_hat = *m * bc1_inv;
                let v_hat = *v * bc2_inv;
                m_hat / (v_hat.sqrt() + config.eps)
            })
            .collect()
    }
}

/// Moment-based gradient descent.
///
/// # Example
///
/// ```
/// use ndtape::{Adam, Optimizer, Tensor};
///
/// let mut adam = Adam::new(0.1);
/// let mut w: Tensor<f64> = Tensor::ones(&[2]);
/// adam.update_weights(&mut w, &Tensor::ones(&[2])).unwrap();
/// assert!(w.data().iter().all(|&x| x < 1.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Adam {
    pub config: AdamConfig,
    moments: MomentBuf,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self::with_config(AdamConfig {
            learning_rate,
            ..AdamConfig::default()
        })
    }

    pub fn with_config(config: AdamConfig) -> Self {
        Self {
            config,
            moments: MomentBuf::default(),
        }
    }

    /// Number of updates applied since the last `initialize`.
    pub fn step(&self) -> u32 {
        self.moments.step
    }
}

impl<T: Scalar> Optimizer<T> for Adam {
    fn initialize(&mut self, shape: &[usize]) {
        self.moments = MomentBuf::zeros(shape);
    }

    fn update_weights(&mut self, param: &mut Tensor<T>, grad: &Tensor<T>) -> Result<(), TensorError> {
        check_same_shape(param.shape(), grad.shape())?;
        if self.moments.shape != param.shape() || self.moments.m.len() != param.len() {
            <Self as Optimizer<T>>::initialize(self, param.shape());
        }
        let direction = self.moments.advance(&self.config, grad);
        let lr = self.config.learning_rate;
        for (p, d) in param.data_mut().iter_mut().zip(direction) {
            *p = *p - T::from_f64(lr * d);
        }
        Ok(())
    }
}

/// Adam variant that damps cells whose gradient keeps flipping sign.
///
/// Each cell counts sign flips between consecutive gradients; a flip raises
/// the count by one and a sign that holds lowers it again. The step of a cell
/// is divided by `1 + damping * flips`.
#[derive(Debug, Clone, Default)]
pub struct DampedAdam {
    pub config: AdamConfig,
    pub damping: f64,
    moments: MomentBuf,
    last_sign: Vec<i8>,
    flips: Vec<u32>,
}

impl DampedAdam {
    pub fn new(learning_rate: f64, damping: f64) -> Self {
        Self {
            config: AdamConfig {
                learning_rate,
                ..AdamConfig::default()
            },
            damping,
            ..Self::default()
        }
    }

    /// Current sign-flip count of every cell.
    pub fn flip_counts(&self) -> &[u32] {
        &self.flips
    }
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

impl<T: Scalar> Optimizer<T> for DampedAdam {
    fn initialize(&mut self, shape: &[usize]) {
        self.moments = MomentBuf::zeros(shape);
        self.last_sign = vec![0; self.moments.m.len()];
        self.flips = vec![0; self.moments.m.len()];
    }

    fn update_weights(&mut self, param: &mut Tensor<T>, grad: &Tensor<T>) -> Result<(), TensorError> {
        check_same_shape(param.shape(), grad.shape())?;
        if self.moments.shape != param.shape() || self.flips.len() != param.len() {
            <Self as Optimizer<T>>::initialize(self, param.shape());
        }

        for ((&g, last), flips) in grad
            .data()
            .iter()
            .zip(self.last_sign.iter_mut())
            .zip(self.flips.iter_mut())
        {
            let s = sign(g.to_f64());
            if s != 0 && *last != 0 {
                if s != *last {
                    *flips += 1;
                } else {
                    *flips = flips.saturating_sub(1);
                }
            }
            if s != 0 {
                *last = s;
            }
        }

        let direction = self.moments.advance(&self.config, grad);
        let lr = self.config.learning_rate;
        for ((p, d), &flips) in param.data_mut().iter_mut().zip(direction).zip(&self.flips) {
            let damped = lr * d / (1.0 + self.damping * flips as f64);
            *p = *p - T::from_f64(damped);
        }
        Ok(())
    }
}
