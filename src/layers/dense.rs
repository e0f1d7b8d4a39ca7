//! Fully-connected layer with accelerator dispatch and CPU fallback.
//!
//! # Backend state machine
//!
//! ```text
//!   Host <──set_backend──> RequestedAccelerator ──any accelerator failure──> FellBackToHost
//! ```
//!
//! `FellBackToHost` is terminal: once an accelerator attempt fails the layer
//! runs on the CPU for the rest of its life, and later `set_backend` calls
//! cannot re-enable the accelerator. The pass that failed is redone on the
//! CPU inside the same call, so callers only ever see CPU errors.

use std::sync::Arc;

use log::warn;
use rand::Rng;

use crate::backend::{self, Backend, CpuKernels, Kernels};
use crate::error::{NnError, NnResult};
use crate::optimizer::{Optimizer, ParamId};
use crate::tensor::Tensor;

/// Where a [`Dense`] layer currently computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// CPU by request.
    Host,
    /// Accelerator requested; not yet failed.
    RequestedAccelerator,
    /// Accelerator failed once; CPU permanently.
    FellBackToHost,
}

/// Affine layer `y = x · W + b`.
///
/// Weights are `[in, out]`, biases `[1, out]`, both initialized from
/// `Normal(0, 0.1)`.
#[derive(Debug)]
pub struct Dense {
    weights: Tensor,
    biases: Tensor,
    grad_weights: Tensor,
    grad_biases: Tensor,
    weights_id: ParamId,
    biases_id: ParamId,
    last_input: Option<Tensor>,
    last_output: Option<Tensor>,
    state: BackendState,
    accelerator: Option<Arc<dyn Kernels>>,
}

impl Dense {
    /// Creates a layer with randomly initialized parameters.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_rng(in_features, out_features, &mut rand::thread_rng())
    }

    /// Creates a layer drawing its initial parameters from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let weights = Tensor::random(vec![in_features, out_features], rng);
        let biases = Tensor::random(vec![1, out_features], rng);
        Self::assemble(weights, biases)
    }

    /// Creates a layer from explicit parameters.
    ///
    /// # Errors
    ///
    /// [`NnError::InvalidShape`] unless `weights` is `[in, out]` and `biases`
    /// is `[1, out]`.
    pub fn from_parameters(weights: Tensor, biases: Tensor) -> NnResult<Self> {
        if weights.rank() != 2 || biases.shape() != [1, weights.cols()] {
            return Err(NnError::invalid_shape(format!(
                "Dense needs weights [in, out] and biases [1, out], got {:?} and {:?}",
                weights.shape(),
                biases.shape()
            )));
        }
        Ok(Self::assemble(weights, biases))
    }

    fn assemble(weights: Tensor, biases: Tensor) -> Self {
        let grad_weights = Tensor::new(weights.shape().to_vec());
        let grad_biases = Tensor::new(biases.shape().to_vec());
        Self {
            weights,
            biases,
            grad_weights,
            grad_biases,
            weights_id: ParamId::next(),
            biases_id: ParamId::next(),
            last_input: None,
            last_output: None,
            state: BackendState::Host,
            accelerator: None,
        }
    }

    /// Input width.
    #[inline]
    pub fn in_features(&self) -> usize {
        self.weights.rows()
    }

    /// Output width.
    #[inline]
    pub fn out_features(&self) -> usize {
        self.weights.cols()
    }

    /// Weights `[in, out]`.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Biases `[1, out]`.
    pub fn biases(&self) -> &Tensor {
        &self.biases
    }

    /// Mutable weights; the shape must be kept.
    pub fn weights_mut(&mut self) -> &mut Tensor {
        &mut self.weights
    }

    /// Mutable biases; the shape must be kept.
    pub fn biases_mut(&mut self) -> &mut Tensor {
        &mut self.biases
    }

    /// Weight gradient from the last backward pass.
    pub fn grad_weights(&self) -> &Tensor {
        &self.grad_weights
    }

    /// Bias gradient from the last backward pass.
    pub fn grad_biases(&self) -> &Tensor {
        &self.grad_biases
    }

    /// Optimizer handles for `(weights, biases)`.
    pub fn param_ids(&self) -> (ParamId, ParamId) {
        (self.weights_id, self.biases_id)
    }

    /// Number of learnable scalars.
    pub fn param_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    /// Output of the most recent forward pass.
    pub fn last_output(&self) -> Option<&Tensor> {
        self.last_output.as_ref()
    }

    /// Current backend state.
    pub fn backend_state(&self) -> BackendState {
        self.state
    }

    /// Requests a backend. Has no effect once the layer has fallen back.
    pub fn set_backend(&mut self, backend: Backend) {
        self.state = match (self.state, backend) {
            (BackendState::FellBackToHost, _) => BackendState::FellBackToHost,
            (_, Backend::Cpu) => BackendState::Host,
            (_, Backend::Accelerator) => BackendState::RequestedAccelerator,
        };
    }

    /// Uses `kernels` for accelerated passes instead of the default device.
    pub fn set_accelerator(&mut self, kernels: Arc<dyn Kernels>) {
        self.accelerator = Some(kernels);
    }

    /// Computes `input · W + b` and caches `input`.
    ///
    /// # Errors
    ///
    /// [`NnError::ShapeMismatch`] unless `input` is `[batch, in]`.
    pub fn forward(&mut self, input: &Tensor) -> NnResult<Tensor> {
        if input.rank() != 2 || input.cols() != self.in_features() {
            return Err(NnError::shape_mismatch(
                &[input.rows(), self.in_features()],
                input.shape(),
            ));
        }

        // Empty batches never reach the accelerator.
        let accelerated = if input.rows() > 0 {
            self.try_accelerated("forward", |layer, acc| {
                layer.forward_accelerated(acc, input)
            })
        } else {
            None
        };
        let output = match accelerated {
            Some(output) => output,
            None => self.forward_cpu(input)?,
        };

        self.last_input = Some(input.clone());
        self.last_output = Some(output.clone());
        Ok(output)
    }

    /// Computes parameter gradients and returns the input gradient.
    ///
    /// - `grad_weights = last_input^T · grad_output` (summed over the batch)
    /// - `grad_biases = column means of grad_output` (averaged over the batch)
    /// - returns `grad_output · W^T`
    ///
    /// The weight gradient is a batch sum while the bias gradient is a batch
    /// mean; losses that already divide by the batch size therefore scale the
    /// bias gradient down by the batch size a second time.
    ///
    /// # Errors
    ///
    /// - [`NnError::Precondition`] if called before `forward`.
    /// - [`NnError::ShapeMismatch`] unless `grad_output` is `[batch, out]`
    ///   with the batch of the cached input.
    pub fn backward(&mut self, grad_output: &Tensor) -> NnResult<Tensor> {
        let batch = match self.last_input.as_ref() {
            Some(input) => input.rows(),
            None => {
                return Err(NnError::precondition(
                    "Dense::backward called before forward",
                ))
            }
        };
        if grad_output.rank() != 2
            || grad_output.rows() != batch
            || grad_output.cols() != self.out_features()
        {
            return Err(NnError::shape_mismatch(
                &[batch, self.out_features()],
                grad_output.shape(),
            ));
        }

        let accelerated = if batch > 0 {
            self.try_accelerated("backward", |layer, acc| {
                layer.backward_accelerated(acc, grad_output)
            })
        } else {
            None
        };
        let (grad_weights, grad_input) = match accelerated {
            Some(grads) => grads,
            None => self.backward_cpu(grad_output)?,
        };

        self.grad_weights = grad_weights;
        self.grad_biases = column_means(grad_output)?;
        Ok(grad_input)
    }

    /// Applies `optimizer` to weights, then biases.
    pub fn update(&mut self, optimizer: &mut dyn Optimizer) -> NnResult<()> {
        optimizer.update(self.weights_id, &mut self.weights, &self.grad_weights)?;
        optimizer.update(self.biases_id, &mut self.biases, &self.grad_biases)
    }

    /// Runs `pass` on the accelerator if one is requested.
    ///
    /// Returns `None` when the CPU should compute, either by request or
    /// because the attempt just failed and the layer fell back.
    fn try_accelerated<T>(
        &mut self,
        pass: &str,
        run: impl FnOnce(&mut Self, &Arc<dyn Kernels>) -> NnResult<T>,
    ) -> Option<T> {
        if self.state != BackendState::RequestedAccelerator {
            return None;
        }
        let result = self.accelerator().and_then(|acc| run(self, &acc));
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    "Dense({} -> {}): accelerator {} pass failed: {}. Falling back to CPU",
                    self.in_features(),
                    self.out_features(),
                    pass,
                    err
                );
                self.fall_back();
                None
            }
        }
    }

    fn accelerator(&mut self) -> NnResult<Arc<dyn Kernels>> {
        match &self.accelerator {
            Some(acc) => Ok(Arc::clone(acc)),
            None => {
                let acc = backend::default_accelerator()?;
                self.accelerator = Some(Arc::clone(&acc));
                Ok(acc)
            }
        }
    }

    fn fall_back(&mut self) {
        self.state = BackendState::FellBackToHost;
        self.accelerator = None;
        self.weights.release_device();
        self.biases.release_device();
    }

    fn forward_cpu(&self, input: &Tensor) -> NnResult<Tensor> {
        let mut product = Tensor::new(vec![input.rows(), self.out_features()]);
        CpuKernels.matmul(input, &self.weights, &mut product)?;
        self.add_bias(&product)
    }

    fn forward_accelerated(&mut self, acc: &Arc<dyn Kernels>, input: &Tensor) -> NnResult<Tensor> {
        let mut x = input.clone();
        let mut product = Tensor::new(vec![input.rows(), self.out_features()]);
        acc.stage(&mut x)?;
        acc.stage(&mut self.weights)?;
        acc.stage(&mut product)?;
        acc.matmul(&x, &self.weights, &mut product)?;
        acc.retrieve(&mut product)?;
        product.release_device();
        self.add_bias(&product)
    }

    /// Broadcasts the bias row over `product` on the host.
    fn add_bias(&self, product: &Tensor) -> NnResult<Tensor> {
        let rows = product.rows();
        let mut tiled = Vec::with_capacity(product.len());
        for _ in 0..rows {
            tiled.extend_from_slice(self.biases.as_slice());
        }
        let tiled = Tensor::from_vec(vec![rows, self.out_features()], tiled)?;
        let mut output = Tensor::new(product.shape().to_vec());
        CpuKernels.add(product, &tiled, &mut output)?;
        Ok(output)
    }

    fn cached_input(&self) -> NnResult<&Tensor> {
        self.last_input
            .as_ref()
            .ok_or_else(|| NnError::precondition("Dense::backward called before forward"))
    }

    fn backward_cpu(&self, grad_output: &Tensor) -> NnResult<(Tensor, Tensor)> {
        let input_t = self.cached_input()?.transpose()?;
        let weights_t = self.weights.transpose()?;
        let mut grad_weights = Tensor::new(self.weights.shape().to_vec());
        let mut grad_input = Tensor::new(vec![grad_output.rows(), self.in_features()]);
        CpuKernels.matmul(&input_t, grad_output, &mut grad_weights)?;
        CpuKernels.matmul(grad_output, &weights_t, &mut grad_input)?;
        Ok((grad_weights, grad_input))
    }

    fn backward_accelerated(
        &self,
        acc: &Arc<dyn Kernels>,
        grad_output: &Tensor,
    ) -> NnResult<(Tensor, Tensor)> {
        let mut input_t = self.cached_input()?.transpose()?;
        let mut weights_t = self.weights.transpose()?;
        let mut grad = grad_output.clone();
        let mut grad_weights = Tensor::new(self.weights.shape().to_vec());
        let mut grad_input = Tensor::new(vec![grad_output.rows(), self.in_features()]);
        for t in [
            &mut input_t,
            &mut weights_t,
            &mut grad,
            &mut grad_weights,
            &mut grad_input,
        ] {
            acc.stage(t)?;
        }
        acc.matmul(&input_t, &grad, &mut grad_weights)?;
        acc.matmul(&grad, &weights_t, &mut grad_input)?;
        acc.retrieve(&mut grad_weights)?;
        acc.retrieve(&mut grad_input)?;
        grad_weights.release_device();
        grad_input.release_device();
        Ok((grad_weights, grad_input))
    }
}

/// `[1, cols]` column means; zeros for an empty batch.
fn column_means(t: &Tensor) -> NnResult<Tensor> {
    let (rows, cols) = (t.rows(), t.cols());
    let mut sums = vec![0.0f32; cols];
    for i in 0..rows {
        for (s, &v) in sums.iter_mut().zip(t.row_slice(i)?) {
            *s += v;
        }
    }
    if rows > 0 {
        for s in &mut sums {
            *s /= rows as f32;
        }
    }
    Tensor::from_vec(vec![1, cols], sums)
}
