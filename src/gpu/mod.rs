//! GPU backend for nnkit using wgpu.
//!
//! This module provides the device side of tensor storage and the
//! accelerator [`Kernels`](crate::backend::Kernels). It is only available
//! when the `gpu` feature is enabled.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nnkit::gpu::{DeviceBuffer, GpuContext, GpuOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let context = Arc::new(GpuContext::init(GpuOptions::default())?);
//!
//! // Upload data to GPU
//! let data = vec![1.0f32; 1024];
//! let buffer = DeviceBuffer::upload(context, &data, vec![1, 1024])?;
//!
//! // Download data from GPU
//! let result = buffer.download()?;
//! assert_eq!(result, data);
//! # Ok(())
//! # }
//! ```
//!
//! # Memory Management
//!
//! Tensors own at most one [`DeviceBuffer`] each. Allocations larger than
//! [`MAX_VRAM_ALLOC`] are refused with
//! [`NnError::AcceleratorExecution`](crate::NnError::AcceleratorExecution),
//! which makes the requesting layer fall back to the CPU.
//!
//! # Public API
//!
//! - [`GpuContext`]: device initialization and the shared context
//! - [`DeviceBuffer`]: device storage with upload/download
//! - [`WgpuKernels`]: matmul, add and ReLU as compute shaders
//! - [`shaders`]: WGSL sources

mod buffer;
mod context;
mod kernels;
mod pipeline;
pub mod shaders;
mod uniforms;

pub use buffer::DeviceBuffer;
pub use context::{GpuContext, GpuOptions, PowerPreference};
pub use kernels::WgpuKernels;
pub use pipeline::{workgroup_count, PipelineCache, WORKGROUP_SIZE};
pub use uniforms::{ElementwiseUniforms, MatmulUniforms};

/// Maximum VRAM allocation per buffer (2GB).
pub const MAX_VRAM_ALLOC: u64 = 2 * 1024 * 1024 * 1024;

/// Checks if a size in bytes exceeds the maximum VRAM allocation limit.
#[inline]
pub fn exceeds_vram_limit(size_bytes: u64) -> bool {
    size_bytes > MAX_VRAM_ALLOC
}
