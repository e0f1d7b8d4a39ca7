//! # nnkit - Dense Neural-Network Training Core
//!
//! Tensors with optional device mirrors, Dense/Activation/Softmax layers,
//! MSE and cross-entropy losses, SGD and Adam, and a training loop with
//! per-layer accelerator fallback.
//!
//! ## Architecture
//! - Row-major `f32` [`Tensor`]s; host and device copies are moved explicitly
//! - Pluggable [`Kernels`] (SIMD host kernels, wgpu kernels behind `gpu`)
//! - A [`Dense`] layer that fails over to the CPU for good on the first
//!   accelerator error
//!
//! ## Usage
//! ```rust
//! use nnkit::config::{LayerSpec, ModelConfig, OptimizerKind};
//! use nnkit::{ActivationKind, Tensor};
//!
//! let mut model = ModelConfig {
//!     layers: vec![
//!         LayerSpec::new(2, ActivationKind::Relu),
//!         LayerSpec::softmax(2),
//!     ],
//!     optimizer: OptimizerKind::Sgd,
//!     learning_rate: 0.1,
//!     init_seed: Some(7),
//!     ..Default::default()
//! }
//! .build()?;
//!
//! let x = Tensor::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]])?;
//! let y = Tensor::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]])?;
//! let loss = model.train_step(&x, &y)?;
//! assert!(loss.is_finite());
//! # Ok::<(), nnkit::NnError>(())
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod layers;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod tensor;
pub mod train;

#[cfg(feature = "gpu")]
pub mod gpu;

// Re-exports
pub use backend::{Backend, CpuKernels, Kernels};
pub use config::{ConfigError, LayerSpec, ModelConfig, OptimizerKind, TrainConfig};
pub use error::{NnError, NnResult};
pub use layers::{Activation, ActivationKind, BackendState, Dense, Layer, LayerKind, Softmax};
pub use loss::Loss;
pub use model::{Evaluation, Model, ModelState};
pub use optimizer::{
    Adam, AdamConfig, CosineAnnealingLr, LrScheduler, Optimizer, ParamId, Sgd, StepLr,
};
pub use tensor::Tensor;
pub use train::{fit, CancellationToken, Dataset, FitReport, TrainingProgress};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
