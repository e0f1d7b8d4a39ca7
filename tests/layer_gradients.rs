//! Numerical gradient checks for the layer backward passes.
//!
//! For each checked quantity we compare the analytic gradient from
//! `backward()` against a central difference `(L(w+ε) - L(w-ε)) / (2ε)` of an
//! MSE objective.
//!
//! The Dense bias gradient is a batch mean rather than a batch sum, so its
//! analytic value equals the numerical derivative divided by the batch size.
//!
//! Run with: cargo test --test layer_gradients

use nnkit::{Activation, ActivationKind, Dense, Loss, NnError, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

// =============================================================================
// CONSTANTS & HELPERS
// =============================================================================

/// Epsilon for numerical differentiation.
const EPSILON: f32 = 1e-3;

/// Absolute tolerance for gradient comparison.
const TOL: f32 = 2e-3;

fn fixture(seed: u64) -> (Dense, Tensor, Tensor) {
    let mut rng = StdRng::seed_from_u64(seed);
    let dense = Dense::with_rng(3, 2, &mut rng);
    let x = Tensor::from_rows(&[
        vec![0.5, -1.0, 0.25],
        vec![1.5, 0.0, -0.5],
        vec![-0.75, 2.0, 1.0],
        vec![0.1, 0.2, 0.3],
    ])
    .unwrap();
    let y = Tensor::from_rows(&[
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![0.5, 0.5],
        vec![-1.0, 2.0],
    ])
    .unwrap();
    (dense, x, y)
}

fn dense_loss(weights: &Tensor, biases: &Tensor, x: &Tensor, y: &Tensor) -> f32 {
    let mut layer = Dense::from_parameters(weights.clone(), biases.clone()).unwrap();
    let pred = layer.forward(x).unwrap();
    Loss::MeanSquaredError.forward(&pred, y).unwrap()
}

// =============================================================================
// DENSE
// =============================================================================

#[test]
fn test_dense_weight_gradient() {
    let (mut dense, x, y) = fixture(1);
    let pred = dense.forward(&x).unwrap();
    let grad = Loss::MeanSquaredError.backward(&pred, &y).unwrap();
    dense.backward(&grad).unwrap();

    let w = dense.weights().clone();
    let b = dense.biases().clone();
    for idx in 0..w.len() {
        let mut plus = w.clone();
        plus.as_mut_slice()[idx] += EPSILON;
        let mut minus = w.clone();
        minus.as_mut_slice()[idx] -= EPSILON;
        let numeric =
            (dense_loss(&plus, &b, &x, &y) - dense_loss(&minus, &b, &x, &y)) / (2.0 * EPSILON);
        let analytic = dense.grad_weights().as_slice()[idx];
        assert!(
            (analytic - numeric).abs() < TOL,
            "w[{idx}]: analytic {analytic}, numeric {numeric}"
        );
    }
}

#[test]
fn test_dense_bias_gradient_is_batch_mean() {
    let (mut dense, x, y) = fixture(2);
    let pred = dense.forward(&x).unwrap();
    let grad = Loss::MeanSquaredError.backward(&pred, &y).unwrap();
    dense.backward(&grad).unwrap();

    let w = dense.weights().clone();
    let b = dense.biases().clone();
    let batch = x.rows() as f32;
    for idx in 0..b.len() {
        let mut plus = b.clone();
        plus.as_mut_slice()[idx] += EPSILON;
        let mut minus = b.clone();
        minus.as_mut_slice()[idx] -= EPSILON;
        let numeric =
            (dense_loss(&w, &plus, &x, &y) - dense_loss(&w, &minus, &x, &y)) / (2.0 * EPSILON);
        let analytic = dense.grad_biases().as_slice()[idx];
        assert!(
            (analytic - numeric / batch).abs() < TOL,
            "b[{idx}]: analytic {analytic}, numeric/batch {}",
            numeric / batch
        );
    }
}

#[test]
fn test_dense_input_gradient() {
    let (mut dense, x, y) = fixture(3);
    let pred = dense.forward(&x).unwrap();
    let grad = Loss::MeanSquaredError.backward(&pred, &y).unwrap();
    let grad_input = dense.backward(&grad).unwrap();
    assert_eq!(grad_input.shape(), x.shape());

    let (w, b) = (dense.weights().clone(), dense.biases().clone());
    for idx in 0..x.len() {
        let mut plus = x.clone();
        plus.as_mut_slice()[idx] += EPSILON;
        let mut minus = x.clone();
        minus.as_mut_slice()[idx] -= EPSILON;
        let numeric =
            (dense_loss(&w, &b, &plus, &y) - dense_loss(&w, &b, &minus, &y)) / (2.0 * EPSILON);
        let analytic = grad_input.as_slice()[idx];
        assert!(
            (analytic - numeric).abs() < TOL,
            "x[{idx}]: analytic {analytic}, numeric {numeric}"
        );
    }
}

#[test]
fn test_dense_rejects_mismatched_batch() {
    let (mut dense, x, _) = fixture(4);
    dense.forward(&x).unwrap();
    let err = dense.backward(&Tensor::new(vec![3, 2])).unwrap_err();
    assert!(matches!(err, NnError::ShapeMismatch { .. }));

    let err = dense.forward(&Tensor::new(vec![4, 5])).unwrap_err();
    assert!(err.is_shape_error());
}

// =============================================================================
// ACTIVATIONS
// =============================================================================

#[test]
fn test_sigmoid_gradient() {
    let x = Tensor::from_vec(vec![1, 5], vec![-3.0, -0.5, 0.0, 0.7, 4.0]).unwrap();
    let g = Tensor::from_vec(vec![1, 5], vec![1.0, -1.0, 0.5, 2.0, -0.25]).unwrap();
    let mut layer = Activation::new(ActivationKind::Sigmoid).unwrap();
    layer.forward(&x).unwrap();
    let analytic = layer.backward(&g).unwrap();

    for idx in 0..x.len() {
        let f = |v: f32| 1.0 / (1.0 + (-v).exp());
        let xi = x.as_slice()[idx];
        let numeric = (f(xi + EPSILON) - f(xi - EPSILON)) / (2.0 * EPSILON) * g.as_slice()[idx];
        assert!(
            (analytic.as_slice()[idx] - numeric).abs() < TOL,
            "x[{idx}]"
        );
    }
}

#[test]
fn test_relu_gradient_masks_inactive_units() {
    let x = Tensor::from_vec(vec![2, 2], vec![-1.0, 2.0, 0.0, 3.0]).unwrap();
    let g = Tensor::filled(vec![2, 2], 5.0);
    let mut layer = Activation::new(ActivationKind::Relu).unwrap();
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.as_slice(), &[0.0, 2.0, 0.0, 3.0]);
    assert_eq!(layer.backward(&g).unwrap().as_slice(), &[0.0, 5.0, 0.0, 5.0]);
}

#[test]
fn test_softmax_is_not_an_activation() {
    assert!(matches!(
        Activation::new(ActivationKind::Softmax),
        Err(NnError::InvalidArgument(_))
    ));
}
