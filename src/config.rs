//! Model and training configuration.
//!
//! This module provides [`ModelConfig`], the declarative description of a
//! dense network (layer sizes, activations, optimizer and task kind), and
//! [`TrainConfig`] for the training loop.
//!
//! # Example
//!
//! ```rust
//! use nnkit::config::{LayerSpec, ModelConfig, OptimizerKind};
//! use nnkit::ActivationKind;
//!
//! let config = ModelConfig {
//!     layers: vec![
//!         LayerSpec::new(4, ActivationKind::Relu),
//!         LayerSpec::new(16, ActivationKind::Relu),
//!         LayerSpec::softmax(3),
//!     ],
//!     optimizer: OptimizerKind::Adam,
//!     classification: true,
//!     ..Default::default()
//! };
//! config.validate()?;
//!
//! let model = config.build()?;
//! assert_eq!(model.layers().len(), 4); // Dense, ReLU, Dense, Softmax
//! # Ok::<(), nnkit::NnError>(())
//! ```
//!
//! # Layer construction
//!
//! Layers are built from adjacent pairs of [`LayerSpec`]s: for each pair
//! `(current, next)` the model receives a `Dense(current.nodes, next.nodes)`
//! followed by the activation described by `next`. The activation of the
//! first spec is therefore never used; it describes the input.

use std::fmt;
use std::str::FromStr;

use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::NnResult;
use crate::layers::{Activation, ActivationKind, Dense, Layer, Softmax};
use crate::loss::Loss;
use crate::model::Model;
use crate::optimizer::{Adam, Optimizer, Sgd};

/// Default learning rate for both optimizers.
pub const DEFAULT_LEARNING_RATE: f32 = 0.001;

/// Default number of training epochs.
pub const DEFAULT_EPOCHS: usize = 10;

/// Default mini-batch size.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// One entry of the layer list: a node count plus the activation applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerSpec {
    /// Number of units.
    pub nodes: usize,
    /// Pointwise activation (ignored when `softmax` is set).
    pub activation: ActivationKind,
    /// Normalize this layer with a softmax instead of `activation`.
    pub softmax: bool,
}

impl LayerSpec {
    /// Creates a spec with a pointwise activation.
    pub const fn new(nodes: usize, activation: ActivationKind) -> Self {
        Self {
            nodes,
            activation,
            softmax: false,
        }
    }

    /// Creates a softmax output spec.
    pub const fn softmax(nodes: usize) -> Self {
        Self {
            nodes,
            activation: ActivationKind::Softmax,
            softmax: true,
        }
    }
}

/// Optimizer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OptimizerKind {
    /// Adam with default moment coefficients.
    #[default]
    Adam,
    /// Plain stochastic gradient descent.
    Sgd,
}

impl OptimizerKind {
    /// Lowercase name used by [`FromStr`].
    pub const fn as_str(self) -> &'static str {
        match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::Sgd => "sgd",
        }
    }

    /// Instantiates the optimizer with the given learning rate.
    pub fn build(self, learning_rate: f32) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Adam => Box::new(Adam::new(learning_rate)),
            OptimizerKind::Sgd => Box::new(Sgd::new(learning_rate)),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(ConfigError::UnknownOptimizer(other.to_string())),
        }
    }
}

/// Declarative model description.
///
/// `classification` selects [`Loss::CrossEntropy`], otherwise
/// [`Loss::MeanSquaredError`] is used. A regression model whose output spec is
/// a softmax gets [`Softmax::with_jacobian`], since the fused shortcut is only
/// valid under cross-entropy.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelConfig {
    /// Layer specs, input first. At least two are required.
    pub layers: Vec<LayerSpec>,
    /// Optimizer kind.
    pub optimizer: OptimizerKind,
    /// Learning rate passed to the optimizer.
    pub learning_rate: f32,
    /// Classification (cross-entropy) vs regression (MSE).
    pub classification: bool,
    /// Requested backend for every Dense layer.
    pub backend: Backend,
    /// Optional seed for deterministic weight initialization (None => random).
    pub init_seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            optimizer: OptimizerKind::Adam,
            learning_rate: DEFAULT_LEARNING_RATE,
            classification: true,
            backend: Backend::Cpu,
            init_seed: None,
        }
    }
}

impl ModelConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - fewer than two layer specs are given
    /// - any node count is zero
    /// - a non-softmax spec past the input asks for the softmax activation
    /// - the learning rate is not a positive finite number
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers.len() < 2 {
            return Err(ConfigError::TooFewLayers(self.layers.len()));
        }
        for (i, spec) in self.layers.iter().enumerate() {
            if spec.nodes == 0 {
                return Err(ConfigError::ZeroNodes(i));
            }
            if i > 0 && !spec.softmax && spec.activation == ActivationKind::Softmax {
                return Err(ConfigError::UnsupportedActivation(i));
            }
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        Ok(())
    }

    /// Builds a compiled [`Model`] from the configuration.
    ///
    /// # Errors
    ///
    /// [`NnError::Config`](crate::NnError::Config) if validation fails.
    pub fn build(&self) -> NnResult<Model> {
        self.validate()?;
        let mut rng = match self.init_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut model = Model::new();
        for pair in self.layers.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            debug!("adding Dense layer {} -> {}", current.nodes, next.nodes);
            model.add(Layer::Dense(Dense::with_rng(
                current.nodes,
                next.nodes,
                &mut rng,
            )));
            let activation = if next.softmax {
                if self.classification {
                    Layer::Softmax(Softmax::new())
                } else {
                    Layer::Softmax(Softmax::with_jacobian())
                }
            } else {
                Layer::Activation(Activation::new(next.activation)?)
            };
            model.add(activation);
        }

        let loss = if self.classification {
            Loss::CrossEntropy
        } else {
            Loss::MeanSquaredError
        };
        model.set_backend(self.backend);
        model.compile(loss, self.optimizer.build(self.learning_rate));
        Ok(model)
    }

    /// Node counts of every spec, input first.
    pub fn layer_dims(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.nodes).collect()
    }
}

/// Training loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrainConfig {
    /// Number of passes over the dataset.
    pub epochs: usize,
    /// Rows per mini-batch.
    pub batch_size: usize,
    /// Seed for batch shuffling (None => entropy).
    pub shuffle_seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            shuffle_seed: None,
        }
    }
}

impl TrainConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        Ok(())
    }
}

/// Errors returned by [`ModelConfig::validate`] and [`TrainConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// At least an input and an output spec are needed.
    #[error("Model needs at least 2 layer specs (input and output), got {0}")]
    TooFewLayers(usize),

    /// A layer spec has zero nodes.
    #[error("Layer spec {0} has zero nodes")]
    ZeroNodes(usize),

    /// Softmax requested as a pointwise activation.
    #[error("Layer spec {0} uses softmax as a pointwise activation; set `softmax` instead")]
    UnsupportedActivation(usize),

    /// Learning rate is not a positive finite number.
    #[error("Learning rate must be positive and finite, got {0}")]
    InvalidLearningRate(f32),

    /// Optimizer name is not recognized.
    #[error("Unknown optimizer {0:?} (expected \"adam\" or \"sgd\")")]
    UnknownOptimizer(String),

    /// Batch size is zero.
    #[error("Batch size must be > 0")]
    InvalidBatchSize,
}
