//! Compute backends.
//!
//! A backend is a set of stateless [`Kernels`] over [`Tensor`]s. The host
//! implementation is [`CpuKernels`]; with the `gpu` feature,
//! [`WgpuKernels`](crate::gpu::WgpuKernels) runs the same contract as wgpu
//! compute shaders on device-resident storage.
//!
//! All kernels share one set of shape preconditions, checked by the helpers in
//! this module and reported as [`NnError::InvalidArgument`]:
//!
//! | Kernel | Requirement |
//! |--------|-------------|
//! | `matmul(a, b, c)` | rank 2, `a.cols == b.rows`, `c == [a.rows, b.cols]` |
//! | `add(a, b, c)` | equal element counts |
//! | `relu(a, b)` | equal element counts |

mod cpu;

pub use cpu::CpuKernels;

use std::fmt::Debug;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{NnError, NnResult};
use crate::tensor::Tensor;

/// Execution substrate requested for Dense layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Backend {
    /// Host CPU.
    #[default]
    Cpu,
    /// Accelerator device, with per-layer fallback to the CPU on failure.
    Accelerator,
}

/// Matmul, element-wise add and ReLU over tensors.
///
/// Implementations must be stateless with respect to the tensors they
/// compute on. `stage` and `retrieve` move operands to and from wherever the
/// backend computes; on the host both are no-ops.
pub trait Kernels: Debug + Send + Sync {
    /// Short human-readable backend name.
    fn name(&self) -> &str;

    /// Makes `tensor` resident where this backend computes.
    fn stage(&self, _tensor: &mut Tensor) -> NnResult<()> {
        Ok(())
    }

    /// Brings a computed `tensor` back to host storage.
    fn retrieve(&self, _tensor: &mut Tensor) -> NnResult<()> {
        Ok(())
    }

    /// `c = a · b`, each element summed in ascending `k`.
    fn matmul(&self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> NnResult<()>;

    /// `c = a + b` element-wise.
    fn add(&self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> NnResult<()>;

    /// `b = max(0, a)` element-wise.
    fn relu(&self, a: &Tensor, b: &mut Tensor) -> NnResult<()>;
}

/// Opens the default accelerator backend.
///
/// # Errors
///
/// [`NnError::AcceleratorUnavailable`] if the build has no device support or
/// no adapter can be opened.
#[cfg(feature = "gpu")]
pub fn default_accelerator() -> NnResult<Arc<dyn Kernels>> {
    let kernels = crate::gpu::WgpuKernels::shared()?;
    Ok(kernels)
}

/// Opens the default accelerator backend.
///
/// # Errors
///
/// Always [`NnError::AcceleratorUnavailable`]: this build has no device support.
#[cfg(not(feature = "gpu"))]
pub fn default_accelerator() -> NnResult<Arc<dyn Kernels>> {
    Err(NnError::accelerator_unavailable(
        "nnkit was built without the `gpu` feature",
    ))
}

pub(crate) fn check_matmul(a: &Tensor, b: &Tensor, c: &Tensor) -> NnResult<()> {
    if a.rank() != 2 || b.rank() != 2 || c.rank() != 2 {
        return Err(NnError::invalid_argument(format!(
            "matmul requires rank-2 operands, got {:?} x {:?} -> {:?}",
            a.shape(),
            b.shape(),
            c.shape()
        )));
    }
    if a.cols() != b.rows() {
        return Err(NnError::invalid_argument(format!(
            "matmul inner dimensions differ: {:?} x {:?}",
            a.shape(),
            b.shape()
        )));
    }
    if c.rows() != a.rows() || c.cols() != b.cols() {
        return Err(NnError::invalid_argument(format!(
            "matmul output must be [{}, {}], got {:?}",
            a.rows(),
            b.cols(),
            c.shape()
        )));
    }
    Ok(())
}

pub(crate) fn check_same_len(op: &str, lens: &[usize]) -> NnResult<()> {
    if lens.windows(2).any(|w| w[0] != w[1]) {
        return Err(NnError::invalid_argument(format!(
            "{op} requires equal element counts, got {lens:?}"
        )));
    }
    Ok(())
}
