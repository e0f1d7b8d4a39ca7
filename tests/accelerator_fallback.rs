//! Accelerator fallback tests.
//!
//! These tests drive Dense layers with stand-in accelerators:
//!
//! 1. **Failing accelerator**: the pass still returns the CPU result and the
//!    layer never tries the accelerator again
//! 2. **Working accelerator**: results match the CPU and the layer stays on
//!    the accelerator
//! 3. **Empty batches**: computed on the CPU without touching the accelerator
//! 4. **Unavailable device**: requesting the default accelerator in a build
//!    without device support falls back transparently
//!
//! Run with: cargo test --test accelerator_fallback

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nnkit::{
    Activation, ActivationKind, Backend, BackendState, CpuKernels, Dense, Kernels, Loss, Model,
    NnError, NnResult, Sgd, Softmax, Tensor,
};

// =============================================================================
// STAND-IN ACCELERATORS
// =============================================================================

/// Accelerator whose every operation fails.
#[derive(Debug, Default)]
struct FailingKernels {
    attempts: AtomicUsize,
}

impl FailingKernels {
    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self) -> NnResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NnError::accelerator_execution("simulated device loss"))
    }
}

impl Kernels for FailingKernels {
    fn name(&self) -> &str {
        "failing"
    }

    fn stage(&self, _tensor: &mut Tensor) -> NnResult<()> {
        self.fail()
    }

    fn matmul(&self, _a: &Tensor, _b: &Tensor, _c: &mut Tensor) -> NnResult<()> {
        self.fail()
    }

    fn add(&self, _a: &Tensor, _b: &Tensor, _c: &mut Tensor) -> NnResult<()> {
        self.fail()
    }

    fn relu(&self, _a: &Tensor, _b: &mut Tensor) -> NnResult<()> {
        self.fail()
    }
}

/// Accelerator that computes on the host and counts matmuls.
#[derive(Debug, Default)]
struct CountingKernels {
    matmuls: AtomicUsize,
}

impl Kernels for CountingKernels {
    fn name(&self) -> &str {
        "counting"
    }

    fn matmul(&self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> NnResult<()> {
        self.matmuls.fetch_add(1, Ordering::SeqCst);
        CpuKernels.matmul(a, b, c)
    }

    fn add(&self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> NnResult<()> {
        CpuKernels.add(a, b, c)
    }

    fn relu(&self, a: &Tensor, b: &mut Tensor) -> NnResult<()> {
        CpuKernels.relu(a, b)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn fixed_dense() -> Dense {
    let w = Tensor::from_rows(&[vec![1.0, -1.0, 0.5], vec![2.0, 0.0, -0.5]]).unwrap();
    let b = Tensor::from_vec(vec![1, 3], vec![0.1, 0.2, 0.3]).unwrap();
    Dense::from_parameters(w, b).unwrap()
}

fn input() -> Tensor {
    Tensor::from_rows(&[vec![1.0, 2.0], vec![-1.0, 0.5]]).unwrap()
}

// =============================================================================
// FAILING ACCELERATOR
// =============================================================================

#[test]
fn test_failing_accelerator_forward_is_correct() {
    let expected = fixed_dense().forward(&input()).unwrap();

    let acc = Arc::new(FailingKernels::default());
    let mut dense = fixed_dense();
    dense.set_backend(Backend::Accelerator);
    dense.set_accelerator(acc.clone());
    assert_eq!(dense.backend_state(), BackendState::RequestedAccelerator);

    let output = dense.forward(&input()).unwrap();
    assert_eq!(output, expected);
    assert_eq!(dense.backend_state(), BackendState::FellBackToHost);
    assert_eq!(acc.attempts(), 1);
}

#[test]
fn test_no_attempts_after_fallback() {
    let acc = Arc::new(FailingKernels::default());
    let mut dense = fixed_dense();
    dense.set_backend(Backend::Accelerator);
    dense.set_accelerator(acc.clone());

    dense.forward(&input()).unwrap();
    let after_first = acc.attempts();

    for _ in 0..5 {
        let out = dense.forward(&input()).unwrap();
        dense.backward(&Tensor::filled(out.shape().to_vec(), 0.1)).unwrap();
    }
    assert_eq!(acc.attempts(), after_first);
}

#[test]
fn test_fallback_is_permanent() {
    let acc = Arc::new(FailingKernels::default());
    let mut dense = fixed_dense();
    dense.set_backend(Backend::Accelerator);
    dense.set_accelerator(acc.clone());
    dense.forward(&input()).unwrap();

    dense.set_backend(Backend::Accelerator);
    assert_eq!(dense.backend_state(), BackendState::FellBackToHost);
    dense.set_backend(Backend::Cpu);
    assert_eq!(dense.backend_state(), BackendState::FellBackToHost);

    dense.forward(&input()).unwrap();
    assert_eq!(acc.attempts(), 1);
}

#[test]
fn test_backward_failure_falls_back() {
    // Forward on the CPU, then switch: the first accelerator contact is backward.
    let acc = Arc::new(FailingKernels::default());
    let mut reference = fixed_dense();
    let mut dense = fixed_dense();
    let out = dense.forward(&input()).unwrap();
    reference.forward(&input()).unwrap();

    dense.set_backend(Backend::Accelerator);
    dense.set_accelerator(acc.clone());
    let g = Tensor::filled(out.shape().to_vec(), 0.5);
    let grad_input = dense.backward(&g).unwrap();

    assert_eq!(grad_input, reference.backward(&g).unwrap());
    assert_eq!(dense.grad_weights(), reference.grad_weights());
    assert_eq!(dense.backend_state(), BackendState::FellBackToHost);
    assert_eq!(acc.attempts(), 1);
}

#[test]
fn test_model_trains_through_failing_accelerator() {
    let acc = Arc::new(FailingKernels::default());
    let mut model = Model::new().with_accelerator(acc.clone());
    model.set_backend(Backend::Accelerator);
    model.add(fixed_dense());
    model.add(Activation::new(ActivationKind::Relu).unwrap());
    model.add(Dense::new(3, 2));
    model.add(Softmax::new());
    model.compile(Loss::CrossEntropy, Box::new(Sgd::new(0.1)));

    let y = Tensor::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
    for _ in 0..3 {
        assert!(model.train_step(&input(), &y).unwrap().is_finite());
    }

    for layer in model.layers() {
        if let Some(dense) = layer.as_dense() {
            assert_eq!(dense.backend_state(), BackendState::FellBackToHost);
        }
    }
    // One failed attempt per Dense layer, on its first forward.
    assert_eq!(acc.attempts(), 2);
}

#[test]
fn test_empty_batch_keeps_accelerator() {
    let acc = Arc::new(FailingKernels::default());
    let mut dense = fixed_dense();
    dense.set_backend(Backend::Accelerator);
    dense.set_accelerator(acc.clone());

    let out = dense.forward(&Tensor::new(vec![0, 2])).unwrap();
    assert_eq!(out.shape(), &[0, 3]);
    let grad_input = dense.backward(&Tensor::new(vec![0, 3])).unwrap();
    assert_eq!(grad_input.shape(), &[0, 2]);

    assert_eq!(acc.attempts(), 0);
    assert_eq!(dense.backend_state(), BackendState::RequestedAccelerator);
}

// =============================================================================
// WORKING ACCELERATOR
// =============================================================================

#[test]
fn test_working_accelerator_matches_cpu() {
    let acc = Arc::new(CountingKernels::default());
    let mut dense = fixed_dense();
    dense.set_backend(Backend::Accelerator);
    dense.set_accelerator(acc.clone());
    let mut reference = fixed_dense();

    let out = dense.forward(&input()).unwrap();
    assert_eq!(out, reference.forward(&input()).unwrap());

    let g = Tensor::filled(out.shape().to_vec(), 1.0);
    assert_eq!(dense.backward(&g).unwrap(), reference.backward(&g).unwrap());
    assert_eq!(dense.grad_biases(), reference.grad_biases());

    assert_eq!(dense.backend_state(), BackendState::RequestedAccelerator);
    // One matmul forward, two backward.
    assert_eq!(acc.matmuls.load(Ordering::SeqCst), 3);
}

// =============================================================================
// UNAVAILABLE DEVICE
// =============================================================================

#[cfg(not(feature = "gpu"))]
#[test]
fn test_missing_device_support_falls_back() {
    let mut dense = fixed_dense();
    dense.set_backend(Backend::Accelerator);
    let out = dense.forward(&input()).unwrap();
    assert_eq!(out, fixed_dense().forward(&input()).unwrap());
    assert_eq!(dense.backend_state(), BackendState::FellBackToHost);
}
