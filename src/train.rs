//! Epoch/batch training loop with cancellation and progress reporting.
//!
//! [`fit`] is meant to run on a worker thread while another thread watches a
//! shared [`TrainingProgress`] and may stop training through a
//! [`CancellationToken`]. Cancellation is checked between batches, so the
//! batch in flight always completes.
//!
//! # Example
//!
//! ```rust
//! use nnkit::config::{LayerSpec, ModelConfig, OptimizerKind, TrainConfig};
//! use nnkit::train::{fit, CancellationToken, Dataset};
//! use nnkit::{ActivationKind, Tensor};
//!
//! let mut model = ModelConfig {
//!     layers: vec![LayerSpec::new(2, ActivationKind::Relu), LayerSpec::softmax(2)],
//!     optimizer: OptimizerKind::Sgd,
//!     learning_rate: 0.1,
//!     init_seed: Some(1),
//!     ..Default::default()
//! }
//! .build()?;
//!
//! let data = Dataset::new(
//!     Tensor::from_vec(vec![4, 2], vec![0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0])?,
//!     Tensor::from_vec(vec![4, 1], vec![0.0, 1.0, 0.0, 1.0])?,
//! )?;
//! let config = TrainConfig { epochs: 3, batch_size: 2, shuffle_seed: Some(7) };
//!
//! let report = fit(&mut model, &data, &config, &CancellationToken::new(), None)?;
//! assert_eq!(report.epochs_completed, 3);
//! # Ok::<(), nnkit::NnError>(())
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::TrainConfig;
use crate::error::{NnError, NnResult};
use crate::model::Model;
use crate::optimizer::LrScheduler;
use crate::tensor::Tensor;

/// Paired inputs `[n, features]` and targets `[n, k]`.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Tensor,
    y: Tensor,
}

impl Dataset {
    /// Pairs inputs with targets.
    ///
    /// # Errors
    ///
    /// [`NnError::ShapeMismatch`] unless both are rank 2 with equal row counts.
    pub fn new(x: Tensor, y: Tensor) -> NnResult<Self> {
        if x.rank() != 2 || y.rank() != 2 || x.rows() != y.rows() {
            return Err(NnError::shape_mismatch(x.shape(), y.shape()));
        }
        Ok(Self { x, y })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.x.rows()
    }

    /// Returns `true` if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inputs.
    pub fn x(&self) -> &Tensor {
        &self.x
    }

    /// Targets.
    pub fn y(&self) -> &Tensor {
        &self.y
    }

    /// Gathers the given rows into a `(x, y)` batch.
    pub fn gather(&self, indices: &[usize]) -> NnResult<(Tensor, Tensor)> {
        Ok((gather_rows(&self.x, indices)?, gather_rows(&self.y, indices)?))
    }
}

fn gather_rows(t: &Tensor, indices: &[usize]) -> NnResult<Tensor> {
    let mut data = Vec::with_capacity(indices.len() * t.cols());
    for &i in indices {
        data.extend_from_slice(t.row_slice(i)?);
    }
    Tensor::from_vec(vec![indices.len(), t.cols()], data)
}

/// Draws consecutive batches from a shuffled sample order.
///
/// When the next batch would run past the end, the order is reshuffled and
/// drawing restarts from the beginning, so every batch is full-sized.
#[derive(Debug)]
pub struct BatchSampler {
    order: Vec<usize>,
    position: usize,
    batch_size: usize,
    rng: StdRng,
}

impl BatchSampler {
    /// Creates a sampler over `len` samples.
    ///
    /// # Errors
    ///
    /// [`NnError::Precondition`] if `batch_size` is zero or exceeds `len`.
    pub fn new(len: usize, batch_size: usize, seed: Option<u64>) -> NnResult<Self> {
        if batch_size == 0 {
            return Err(NnError::precondition("batch size must be > 0"));
        }
        if batch_size > len {
            return Err(NnError::precondition(format!(
                "batch size {batch_size} exceeds dataset size {len}"
            )));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            order: (0..len).collect(),
            // Forces a shuffle before the first batch.
            position: len,
            batch_size,
            rng,
        })
    }

    /// Batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Indices of the next batch.
    pub fn next_indices(&mut self) -> &[usize] {
        if self.position + self.batch_size > self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.position = 0;
        }
        let start = self.position;
        self.position += self.batch_size;
        &self.order[start..self.position]
    }

    /// Gathers the next batch from `data`.
    pub fn next_batch(&mut self, data: &Dataset) -> NnResult<(Tensor, Tensor)> {
        let indices = self.next_indices().to_vec();
        data.gather(&indices)
    }
}

/// Cooperative stop flag shared between threads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Training counters readable from any thread.
///
/// Epoch and batch numbers are 1-based; zero means "not started".
#[derive(Debug, Default)]
pub struct TrainingProgress {
    epoch: AtomicUsize,
    batch: AtomicUsize,
    batches_per_epoch: AtomicUsize,
    last_loss_bits: AtomicU32,
}

impl TrainingProgress {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch (1-based).
    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Current batch within the epoch (1-based).
    pub fn batch(&self) -> usize {
        self.batch.load(Ordering::Relaxed)
    }

    /// Batches per epoch.
    pub fn batches_per_epoch(&self) -> usize {
        self.batches_per_epoch.load(Ordering::Relaxed)
    }

    /// Mean loss of the last completed epoch.
    pub fn last_loss(&self) -> f32 {
        f32::from_bits(self.last_loss_bits.load(Ordering::Relaxed))
    }

    fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    fn set_batch(&self, batch: usize) {
        self.batch.store(batch, Ordering::Relaxed);
    }

    fn set_batches_per_epoch(&self, n: usize) {
        self.batches_per_epoch.store(n, Ordering::Relaxed);
    }

    fn set_last_loss(&self, loss: f32) {
        self.last_loss_bits.store(loss.to_bits(), Ordering::Relaxed);
    }
}

/// Outcome of [`fit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitReport {
    /// Epochs that ran to completion.
    pub epochs_completed: usize,
    /// Mean loss of each completed epoch (over successful batches).
    pub epoch_losses: Vec<f32>,
    /// Batches whose `train_step` returned an error.
    pub failed_batches: usize,
    /// Whether the run stopped because of the cancellation token.
    pub cancelled: bool,
}

impl FitReport {
    /// Loss of the last completed epoch.
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

/// Trains `model` on `data` for `config.epochs` epochs.
///
/// Each epoch runs `len / batch_size` batches. A batch whose training step
/// fails is logged, counted and skipped. An epoch in which every batch failed
/// reports `NaN`.
///
/// # Errors
///
/// [`NnError::Precondition`] if the model is not compiled, the batch size is
/// zero, or the batch size exceeds the dataset.
pub fn fit(
    model: &mut Model,
    data: &Dataset,
    config: &TrainConfig,
    cancel: &CancellationToken,
    progress: Option<&TrainingProgress>,
) -> NnResult<FitReport> {
    fit_with_scheduler(model, data, config, cancel, progress, None)
}

/// [`fit`] with a learning-rate schedule applied at the start of every epoch.
pub fn fit_with_scheduler(
    model: &mut Model,
    data: &Dataset,
    config: &TrainConfig,
    cancel: &CancellationToken,
    progress: Option<&TrainingProgress>,
    scheduler: Option<&dyn LrScheduler>,
) -> NnResult<FitReport> {
    if !model.is_compiled() {
        return Err(NnError::precondition(
            "model must be compiled before training",
        ));
    }
    config
        .validate()
        .map_err(|e| NnError::precondition(e.to_string()))?;
    let mut sampler = BatchSampler::new(data.len(), config.batch_size, config.shuffle_seed)?;
    let batches = data.len() / config.batch_size;
    if let Some(p) = progress {
        p.set_batches_per_epoch(batches);
    }

    info!(
        "training: {} samples, {} epochs, {} batches of {}",
        data.len(),
        config.epochs,
        batches,
        config.batch_size
    );

    let mut report = FitReport::default();
    for epoch in 0..config.epochs {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        if let Some(p) = progress {
            p.set_epoch(epoch + 1);
        }
        if let Some(s) = scheduler {
            let lr = model.optimizer().map_or(0.0, |o| o.learning_rate());
            model.set_learning_rate(s.get_lr(epoch, lr))?;
        }

        let mut sum = 0.0f32;
        let mut succeeded = 0usize;
        for batch in 0..batches {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if let Some(p) = progress {
                p.set_batch(batch + 1);
            }
            let step = sampler
                .next_batch(data)
                .and_then(|(x, y)| model.train_step(&x, &y));
            match step {
                Ok(loss) => {
                    debug!("epoch {} batch {}/{}: loss {loss}", epoch + 1, batch + 1, batches);
                    sum += loss;
                    succeeded += 1;
                }
                Err(err) => {
                    warn!("error in training batch {}/{}: {err}", batch + 1, batches);
                    report.failed_batches += 1;
                }
            }
        }
        if report.cancelled {
            break;
        }

        let mean = if succeeded > 0 {
            sum / succeeded as f32
        } else {
            f32::NAN
        };
        if let Some(p) = progress {
            p.set_last_loss(mean);
        }
        info!("epoch {} loss: {mean:.6}", epoch + 1);
        report.epoch_losses.push(mean);
        report.epochs_completed += 1;
    }

    if report.cancelled {
        info!("training cancelled after {} epochs", report.epochs_completed);
    }
    Ok(report)
}
