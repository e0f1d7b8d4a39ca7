//! Device-side storage used for tensor mirrors.
//!
//! With the `gpu` feature, [`DeviceBuffer`] is the wgpu storage buffer from
//! [`crate::gpu`] and transfers go through the process-wide shared
//! [`GpuContext`](crate::gpu::GpuContext). Without it, `DeviceBuffer` is an
//! uninhabited type: no mirror can ever exist and every transfer request fails
//! with [`NnError::AcceleratorUnavailable`].

use crate::error::NnResult;

#[cfg(feature = "gpu")]
pub use crate::gpu::DeviceBuffer;

/// Placeholder for device storage in builds without accelerator support.
#[cfg(not(feature = "gpu"))]
#[derive(Debug)]
pub enum DeviceBuffer {}

#[cfg(not(feature = "gpu"))]
impl DeviceBuffer {
    /// Returns the logical shape of the buffer.
    pub fn shape(&self) -> &[usize] {
        match *self {}
    }

    /// Copies the buffer contents back to host memory.
    pub fn download(&self) -> NnResult<Vec<f32>> {
        match *self {}
    }

    /// Overwrites the buffer contents with host data.
    pub fn write(&self, _data: &[f32]) -> NnResult<()> {
        match *self {}
    }

    /// Creates a device-to-device copy.
    pub fn duplicate(&self) -> NnResult<DeviceBuffer> {
        match *self {}
    }
}

/// Allocates a device buffer holding `data` with the given shape.
#[cfg(feature = "gpu")]
pub(crate) fn upload(data: &[f32], shape: &[usize]) -> NnResult<DeviceBuffer> {
    let context = crate::gpu::GpuContext::shared()?;
    DeviceBuffer::upload(context, data, shape.to_vec())
}

/// Allocates a device buffer holding `data` with the given shape.
#[cfg(not(feature = "gpu"))]
pub(crate) fn upload(_data: &[f32], _shape: &[usize]) -> NnResult<DeviceBuffer> {
    Err(crate::error::NnError::accelerator_unavailable(
        "nnkit was built without the `gpu` feature",
    ))
}

/// Returns `true` if this build carries accelerator support.
pub const fn device_support_compiled() -> bool {
    cfg!(feature = "gpu")
}
