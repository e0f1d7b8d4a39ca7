//! Device-resident storage backing [`Tensor`](crate::Tensor) mirrors.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::error::{NnError, NnResult};
use crate::gpu::{exceeds_vram_limit, GpuContext, MAX_VRAM_ALLOC};
use crate::tensor::shape_size;

/// A storage buffer holding row-major `f32` data plus its logical shape.
///
/// The buffer keeps its [`GpuContext`] alive, so it can be downloaded,
/// overwritten or duplicated without extra handles.
pub struct DeviceBuffer {
    context: Arc<GpuContext>,
    buffer: wgpu::Buffer,
    shape: Vec<usize>,
}

impl DeviceBuffer {
    /// Uploads `data` into a new storage buffer.
    ///
    /// # Errors
    ///
    /// [`NnError::AcceleratorExecution`] if `data` is empty, does not match
    /// `shape`, exceeds [`MAX_VRAM_ALLOC`] or the allocation fails.
    pub fn upload(context: Arc<GpuContext>, data: &[f32], shape: Vec<usize>) -> NnResult<Self> {
        if data.is_empty() || data.len() != shape_size(&shape) {
            return Err(NnError::accelerator_execution(format!(
                "cannot upload {} values as shape {:?}",
                data.len(),
                shape
            )));
        }
        let size_bytes = std::mem::size_of_val(data) as u64;
        if exceeds_vram_limit(size_bytes) {
            return Err(NnError::accelerator_execution(format!(
                "{size_bytes} bytes exceeds the {MAX_VRAM_ALLOC}-byte device allocation limit"
            )));
        }

        let buffer = context.scoped("upload", || {
            Ok(context
                .device()
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("nnkit tensor"),
                    contents: bytemuck::cast_slice(data),
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                }))
        })?;

        Ok(Self {
            context,
            buffer,
            shape,
        })
    }

    /// Copies the contents back to host memory, blocking until done.
    ///
    /// # Errors
    ///
    /// [`NnError::AcceleratorExecution`] if the copy or the mapping fails.
    pub fn download(&self) -> NnResult<Vec<f32>> {
        self.context.scoped("download", || {
            let device = self.context.device();
            let size_bytes = self.size_bytes();

            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("nnkit staging (download)"),
                size: size_bytes,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("nnkit download encoder"),
            });
            encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, size_bytes);
            self.context.queue().submit(std::iter::once(encoder.finish()));

            let slice = staging.slice(..);
            let (tx, rx) = std::sync::mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });

            self.context.poll();

            rx.recv()
                .map_err(|e| {
                    NnError::accelerator_execution(format!("failed to receive map result: {e}"))
                })?
                .map_err(|e| {
                    NnError::accelerator_execution(format!("buffer mapping failed: {e:?}"))
                })?;

            let data = {
                let mapped = slice.get_mapped_range();
                bytemuck::cast_slice(&mapped).to_vec()
            };
            staging.unmap();

            Ok(data)
        })
    }

    /// Overwrites the contents with `data`.
    ///
    /// # Errors
    ///
    /// - [`NnError::ShapeMismatch`] if `data` has a different length.
    /// - [`NnError::AcceleratorExecution`] if the device rejects the write.
    pub fn write(&self, data: &[f32]) -> NnResult<()> {
        if data.len() != self.len() {
            return Err(NnError::shape_mismatch(&self.shape, &[data.len()]));
        }
        self.context.scoped("write", || {
            self.context
                .queue()
                .write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
            Ok(())
        })
    }

    /// Creates a device-to-device copy.
    ///
    /// # Errors
    ///
    /// [`NnError::AcceleratorExecution`] if the allocation or the copy fails.
    pub fn duplicate(&self) -> NnResult<DeviceBuffer> {
        let buffer = self.context.scoped("duplicate", || {
            let device = self.context.device();
            let size_bytes = self.size_bytes();
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("nnkit tensor (copy)"),
                size: size_bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("nnkit duplicate encoder"),
            });
            encoder.copy_buffer_to_buffer(&self.buffer, 0, &buffer, 0, size_bytes);
            self.context.queue().submit(std::iter::once(encoder.finish()));
            Ok(buffer)
        })?;

        Ok(DeviceBuffer {
            context: Arc::clone(&self.context),
            buffer,
            shape: self.shape.clone(),
        })
    }

    /// Logical shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Reinterprets the buffer under a new shape with the same element count.
    pub(crate) fn set_shape(&mut self, shape: Vec<usize>) {
        debug_assert_eq!(shape_size(&shape), self.len());
        self.shape = shape;
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        shape_size(&self.shape)
    }

    /// Returns `true` if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.len() * std::mem::size_of::<f32>()) as u64
    }

    /// The underlying wgpu buffer.
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Context that owns the buffer.
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("shape", &self.shape)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
