//! Parameter optimizers and learning-rate schedulers.
//!
//! Optimizers update a parameter tensor in place from its gradient. Each
//! learnable tensor carries a [`ParamId`], so stateful optimizers such as
//! [`Adam`] key their moment state on parameter identity rather than on
//! addresses or values.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{NnError, NnResult};
use crate::tensor::Tensor;

/// Opaque identity of one learnable tensor.
///
/// Minted once per parameter; two distinct parameters never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(0);

impl ParamId {
    /// Allocates a fresh process-unique id.
    pub fn next() -> Self {
        ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// In-place parameter updater.
pub trait Optimizer: Debug + Send {
    /// Updates `value` from `grad`.
    ///
    /// # Errors
    ///
    /// [`NnError::ShapeMismatch`] if `value` and `grad` differ in length, or
    /// if `param` was previously updated with a differently sized tensor.
    fn update(&mut self, param: ParamId, value: &mut Tensor, grad: &Tensor) -> NnResult<()>;

    /// Current learning rate.
    fn learning_rate(&self) -> f32;

    /// Replaces the learning rate; internal state is kept.
    fn set_learning_rate(&mut self, lr: f32);

    /// Short name, e.g. `"adam"`.
    fn name(&self) -> &'static str;
}

fn check_grad(value: &Tensor, grad: &Tensor) -> NnResult<()> {
    if value.len() != grad.len() {
        return Err(NnError::shape_mismatch(value.shape(), grad.shape()));
    }
    Ok(())
}

/// Stochastic gradient descent: `w -= lr * g`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sgd {
    /// Learning rate.
    pub lr: f32,
}

impl Sgd {
    /// Default learning rate.
    pub const DEFAULT_LR: f32 = 0.01;

    /// Creates SGD with the given learning rate.
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LR)
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, _param: ParamId, value: &mut Tensor, grad: &Tensor) -> NnResult<()> {
        check_grad(value, grad)?;
        let lr = self.lr;
        for (w, &g) in value.as_mut_slice().iter_mut().zip(grad.as_slice()) {
            *w -= lr * g;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "sgd"
    }
}

/// Adam hyperparameters.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdamConfig {
    /// Learning rate (alpha).
    pub lr: f32,

    /// First moment decay (beta1).
    pub beta1: f32,

    /// Second moment decay (beta2).
    pub beta2: f32,

    /// Epsilon for numerical stability.
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl AdamConfig {
    /// Creates config with learning rate.
    pub fn with_lr(lr: f32) -> Self {
        Self {
            lr,
            ..Default::default()
        }
    }
}

/// Adam moment state for a single parameter tensor.
#[derive(Debug, Clone)]
pub struct MomentState {
    /// First moment (mean of gradients).
    pub m: Vec<f32>,

    /// Second moment (uncentered variance of gradients).
    pub v: Vec<f32>,

    /// Timestep for bias correction.
    pub t: u32,
}

impl MomentState {
    /// Creates zeroed state for a parameter of `size` elements.
    pub fn new(size: usize) -> Self {
        Self {
            m: vec![0.0; size],
            v: vec![0.0; size],
            t: 0,
        }
    }
}

/// Adam optimizer with per-parameter moment state.
///
/// State is created lazily on the first update of each [`ParamId`] and kept
/// for the optimizer's lifetime (or until [`reset`](Adam::reset)).
#[derive(Debug, Clone, Default)]
pub struct Adam {
    /// Hyperparameters.
    pub config: AdamConfig,

    states: HashMap<ParamId, MomentState>,
}

impl Adam {
    /// Creates Adam with default moments and the given learning rate.
    pub fn new(lr: f32) -> Self {
        Self::with_config(AdamConfig::with_lr(lr))
    }

    /// Creates Adam from a full configuration.
    pub fn with_config(config: AdamConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Number of updates applied to `param` so far (0 if never seen).
    pub fn step_count(&self, param: ParamId) -> u32 {
        self.states.get(&param).map_or(0, |s| s.t)
    }

    /// Moment state of `param`, if it has been updated.
    pub fn state(&self, param: ParamId) -> Option<&MomentState> {
        self.states.get(&param)
    }

    /// Number of parameters with live state.
    pub fn tracked_params(&self) -> usize {
        self.states.len()
    }

    /// Drops all moment state.
    pub fn reset(&mut self) {
        self.states.clear();
    }
}

impl Optimizer for Adam {
    fn update(&mut self, param: ParamId, value: &mut Tensor, grad: &Tensor) -> NnResult<()> {
        check_grad(value, grad)?;
        let size = value.len();
        let state = self
            .states
            .entry(param)
            .or_insert_with(|| MomentState::new(size));
        if state.m.len() != size {
            return Err(NnError::shape_mismatch(&[state.m.len()], &[size]));
        }

        let AdamConfig {
            lr,
            beta1,
            beta2,
            epsilon,
        } = self.config;

        state.t += 1;
        let t = state.t as i32;
        let bc1 = 1.0 - beta1.powi(t);
        let bc2 = 1.0 - beta2.powi(t);

        let params = value.as_mut_slice();
        for (i, &g) in grad.as_slice().iter().enumerate() {
            state.m[i] = beta1 * state.m[i] + (1.0 - beta1) * g;
            state.v[i] = beta2 * state.v[i] + (1.0 - beta2) * g * g;
            let m_hat = state.m[i] / bc1;
            let v_hat = state.v[i] / bc2;
            params[i] -= lr * m_hat / (v_hat.sqrt() + epsilon);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.config.lr = lr;
    }

    fn name(&self) -> &'static str {
        "adam"
    }
}

/// Learning rate scheduler.
pub trait LrScheduler: Debug + Send {
    /// Gets the learning rate for the given epoch.
    fn get_lr(&self, epoch: usize, current_lr: f32) -> f32;
}

/// Step decay scheduler.
#[derive(Debug, Clone)]
pub struct StepLr {
    /// Initial learning rate.
    pub initial_lr: f32,
    /// Decay factor.
    pub gamma: f32,
    /// Step size in epochs.
    pub step_size: usize,
}

impl StepLr {
    /// Multiplies the rate by `gamma` every `step_size` epochs.
    pub fn new(initial_lr: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            initial_lr,
            gamma,
            step_size: step_size.max(1),
        }
    }
}

impl LrScheduler for StepLr {
    fn get_lr(&self, epoch: usize, _: f32) -> f32 {
        let n_steps = epoch / self.step_size;
        self.initial_lr * self.gamma.powi(n_steps as i32)
    }
}

/// Cosine annealing scheduler.
#[derive(Debug, Clone)]
pub struct CosineAnnealingLr {
    /// Initial learning rate.
    pub initial_lr: f32,
    /// Minimum learning rate.
    pub min_lr: f32,
    /// Total epochs.
    pub t_max: usize,
}

impl CosineAnnealingLr {
    /// Anneals from `initial_lr` to `min_lr` over `t_max` epochs.
    pub fn new(initial_lr: f32, t_max: usize, min_lr: f32) -> Self {
        Self {
            initial_lr,
            min_lr,
            t_max: t_max.max(1),
        }
    }
}

impl LrScheduler for CosineAnnealingLr {
    fn get_lr(&self, epoch: usize, _: f32) -> f32 {
        let epoch = epoch.min(self.t_max);
        let cos_inner = std::f32::consts::PI * epoch as f32 / self.t_max as f32;
        self.min_lr + 0.5 * (self.initial_lr - self.min_lr) * (1.0 + cos_inner.cos())
    }
}
