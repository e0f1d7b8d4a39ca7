//! GPU/CPU parity tests.
//!
//! These tests verify that the wgpu kernels and the host kernels produce
//! nearly identical results, and that Dense layers on the accelerator match
//! their CPU twins.
//!
//! Run with: cargo test --features gpu --test gpu_parity -- --ignored

#![cfg(feature = "gpu")]

use std::sync::Arc;

use nnkit::gpu::{GpuContext, WgpuKernels};
use nnkit::{Backend, BackendState, CpuKernels, Dense, Kernels, Loss, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Tolerance for floating-point comparison.
const EPSILON: f32 = 1e-4;

/// Compares two f32 slices with tolerance.
fn assert_approx_eq(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "Length mismatch: {} vs {}", a.len(), b.len());

    let mut max_diff = 0.0f32;
    let mut max_idx = 0;
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        if diff > max_diff {
            max_diff = diff;
            max_idx = i;
        }
    }

    assert!(
        max_diff <= tol,
        "Max difference {} at index {} exceeds tolerance {}. a[{}]={}, b[{}]={}",
        max_diff,
        max_idx,
        tol,
        max_idx,
        a[max_idx],
        max_idx,
        b[max_idx]
    );
}

fn kernels() -> Arc<WgpuKernels> {
    WgpuKernels::shared().expect("Failed to open GPU")
}

#[test]
#[ignore = "Requires GPU"]
fn test_matmul_parity() {
    let acc = kernels();
    let mut rng = StdRng::seed_from_u64(17);
    for (m, k, n) in [(1, 1, 1), (3, 5, 7), (32, 64, 16), (100, 30, 65)] {
        let mut a = Tensor::random(vec![m, k], &mut rng);
        let mut b = Tensor::random(vec![k, n], &mut rng);
        let mut expected = Tensor::new(vec![m, n]);
        CpuKernels.matmul(&a, &b, &mut expected).unwrap();

        let mut c = Tensor::new(vec![m, n]);
        acc.stage(&mut a).unwrap();
        acc.stage(&mut b).unwrap();
        acc.stage(&mut c).unwrap();
        acc.matmul(&a, &b, &mut c).unwrap();
        acc.retrieve(&mut c).unwrap();

        assert_approx_eq(c.as_slice(), expected.as_slice(), EPSILON);
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_elementwise_parity() {
    let acc = kernels();
    let data: Vec<f32> = (0..1000).map(|i| (i as f32 - 500.0) / 100.0).collect();
    let mut a = Tensor::from_vec(vec![10, 100], data.clone()).unwrap();
    let mut b = Tensor::filled(vec![10, 100], 0.25);
    let mut sum = Tensor::new(vec![10, 100]);
    let mut relu = Tensor::new(vec![10, 100]);
    for t in [&mut a, &mut b, &mut sum, &mut relu] {
        acc.stage(t).unwrap();
    }

    acc.add(&a, &b, &mut sum).unwrap();
    acc.relu(&a, &mut relu).unwrap();
    acc.retrieve(&mut sum).unwrap();
    acc.retrieve(&mut relu).unwrap();

    let expected_sum: Vec<f32> = data.iter().map(|x| x + 0.25).collect();
    let expected_relu: Vec<f32> = data.iter().map(|x| x.max(0.0)).collect();
    assert_approx_eq(sum.as_slice(), &expected_sum, 0.0);
    assert_approx_eq(relu.as_slice(), &expected_relu, 0.0);
}

#[test]
#[ignore = "Requires GPU"]
fn test_tensor_round_trip_and_clone() {
    let _ = GpuContext::shared().expect("Failed to open GPU");
    let mut t = Tensor::from_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    t.to_device().unwrap();
    assert!(t.is_on_device());

    let mut copy = t.clone();
    assert!(copy.is_on_device());
    copy.as_mut_slice().fill(0.0);
    copy.to_host().unwrap();
    assert_eq!(copy, t);
}

#[test]
#[ignore = "Requires GPU"]
fn test_dense_accelerator_parity() {
    let mut rng = StdRng::seed_from_u64(23);
    let x = Tensor::random(vec![16, 12], &mut rng);
    let y = Tensor::random(vec![16, 5], &mut rng);

    let mut cpu = Dense::with_rng(12, 5, &mut rng);
    let mut gpu = Dense::from_parameters(cpu.weights().clone(), cpu.biases().clone()).unwrap();
    gpu.set_backend(Backend::Accelerator);

    let out_cpu = cpu.forward(&x).unwrap();
    let out_gpu = gpu.forward(&x).unwrap();
    assert_eq!(gpu.backend_state(), BackendState::RequestedAccelerator);
    assert_approx_eq(out_gpu.as_slice(), out_cpu.as_slice(), EPSILON);

    let g = Loss::MeanSquaredError.backward(&out_cpu, &y).unwrap();
    let gi_cpu = cpu.backward(&g).unwrap();
    let gi_gpu = gpu.backward(&g).unwrap();
    assert_approx_eq(gi_gpu.as_slice(), gi_cpu.as_slice(), EPSILON);
    assert_approx_eq(
        gpu.grad_weights().as_slice(),
        cpu.grad_weights().as_slice(),
        EPSILON,
    );
    assert_eq!(gpu.backend_state(), BackendState::RequestedAccelerator);
}

#[test]
#[ignore = "Requires GPU"]
fn test_empty_batch_stays_on_accelerator() {
    let _ = kernels();
    let mut dense = Dense::new(3, 2);
    dense.set_backend(Backend::Accelerator);

    let empty = dense.forward(&Tensor::new(vec![0, 3])).unwrap();
    assert_eq!(empty.shape(), &[0, 2]);
    assert_eq!(dense.backend_state(), BackendState::RequestedAccelerator);

    let x = Tensor::from_rows(&[vec![1.0, 2.0, 3.0], vec![-1.0, 0.0, 1.0]]).unwrap();
    dense.forward(&x).unwrap();
    assert_eq!(dense.backend_state(), BackendState::RequestedAccelerator);
}

#[test]
#[ignore = "Requires GPU"]
fn test_try_clone_copies_mirror() {
    let _ = GpuContext::shared().expect("Failed to open GPU");
    let mut t = Tensor::from_vec(vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap();
    t.to_device().unwrap();

    let mut copy = t.try_clone().unwrap();
    assert!(copy.is_on_device());
    t.as_mut_slice().fill(5.0);
    t.to_device().unwrap();
    copy.to_host().unwrap();
    assert_eq!(copy.as_slice(), &[1.0, 2.0, 3.0]);
}

