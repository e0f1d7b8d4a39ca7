//! Host kernels, vectorized across output columns with `wide::f32x8`.

use wide::f32x8;

use super::{check_matmul, check_same_len, Kernels};
use crate::error::NnResult;
use crate::tensor::Tensor;

const LANES: usize = 8;

/// CPU implementation of [`Kernels`].
///
/// Every output element of `matmul` is accumulated in ascending `k` with a
/// separate multiply and add, so results are bit-identical to the naive
/// triple loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuKernels;

impl CpuKernels {
    /// Creates the CPU backend.
    pub const fn new() -> Self {
        CpuKernels
    }
}

#[inline]
fn load8(src: &[f32]) -> f32x8 {
    let mut arr = [0.0f32; LANES];
    arr.copy_from_slice(&src[..LANES]);
    f32x8::new(arr)
}

#[inline]
fn store8(v: f32x8, dst: &mut [f32]) {
    let arr: [f32; LANES] = v.into();
    dst[..LANES].copy_from_slice(&arr);
}

impl Kernels for CpuKernels {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> NnResult<()> {
        check_matmul(a, b, c)?;
        let (m, inner, n) = (a.rows(), a.cols(), b.cols());
        let a = a.as_slice();
        let b = b.as_slice();
        let c = c.as_mut_slice();
        let chunks = n / LANES;

        for i in 0..m {
            let a_row = &a[i * inner..(i + 1) * inner];
            let c_row = &mut c[i * n..(i + 1) * n];

            for chunk in 0..chunks {
                let j = chunk * LANES;
                let mut acc = f32x8::splat(0.0);
                for (k, &a_ik) in a_row.iter().enumerate() {
                    acc += f32x8::splat(a_ik) * load8(&b[k * n + j..]);
                }
                store8(acc, &mut c_row[j..]);
            }

            // Remaining columns (scalar)
            for j in (chunks * LANES)..n {
                let mut sum = 0.0f32;
                for (k, &a_ik) in a_row.iter().enumerate() {
                    sum += a_ik * b[k * n + j];
                }
                c_row[j] = sum;
            }
        }
        Ok(())
    }

    fn add(&self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> NnResult<()> {
        check_same_len("add", &[a.len(), b.len(), c.len()])?;
        let (a, b, c) = (a.as_slice(), b.as_slice(), c.as_mut_slice());
        let split = a.len() / LANES * LANES;

        for j in (0..split).step_by(LANES) {
            store8(load8(&a[j..]) + load8(&b[j..]), &mut c[j..]);
        }
        for j in split..a.len() {
            c[j] = a[j] + b[j];
        }
        Ok(())
    }

    fn relu(&self, a: &Tensor, b: &mut Tensor) -> NnResult<()> {
        check_same_len("relu", &[a.len(), b.len()])?;
        let (a, b) = (a.as_slice(), b.as_mut_slice());
        let split = a.len() / LANES * LANES;
        let zero = f32x8::splat(0.0);

        for j in (0..split).step_by(LANES) {
            store8(load8(&a[j..]).max(zero), &mut b[j..]);
        }
        for j in split..a.len() {
            b[j] = a[j].max(0.0);
        }
        Ok(())
    }
}
