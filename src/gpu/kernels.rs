//! [`Kernels`] implementation on wgpu compute shaders.

use std::sync::{Arc, OnceLock};

use wgpu::util::DeviceExt;

use crate::backend::{check_matmul, check_same_len, Kernels};
use crate::error::{NnError, NnResult};
use crate::gpu::uniforms::{ElementwiseUniforms, MatmulUniforms};
use crate::gpu::{workgroup_count, DeviceBuffer, GpuContext, PipelineCache, WORKGROUP_SIZE};
use crate::tensor::Tensor;

static SHARED: OnceLock<Result<Arc<WgpuKernels>, String>> = OnceLock::new();

/// Device kernels over tensors with device-resident storage.
///
/// Operands must have been staged onto the same [`GpuContext`] the kernels
/// were built for. Work is submitted without waiting; [`Kernels::retrieve`]
/// blocks until the results are readable.
pub struct WgpuKernels {
    context: Arc<GpuContext>,
    pipelines: PipelineCache,
}

impl WgpuKernels {
    /// Compiles the kernel pipelines on `context`.
    ///
    /// # Errors
    ///
    /// [`NnError::AcceleratorExecution`] if shader compilation is rejected by
    /// the device.
    pub fn new(context: Arc<GpuContext>) -> NnResult<Self> {
        let pipelines =
            context.scoped("pipeline creation", || Ok(PipelineCache::new(context.device())))?;
        log::debug!("Compiled device kernels on {}", context.adapter_info().name);
        Ok(Self { context, pipelines })
    }

    /// Returns kernels on the process-wide [`GpuContext`], building them on
    /// first use.
    pub fn shared() -> NnResult<Arc<WgpuKernels>> {
        SHARED
            .get_or_init(|| {
                GpuContext::shared()
                    .and_then(WgpuKernels::new)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(NnError::accelerator_unavailable)
    }

    /// Context the kernels run on.
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    fn resident<'a>(&self, tensor: &'a Tensor, role: &str) -> NnResult<&'a DeviceBuffer> {
        let buf = tensor.device_buffer().ok_or_else(|| {
            NnError::accelerator_execution(format!("{role} operand is not resident on the device"))
        })?;
        if !Arc::ptr_eq(buf.context(), &self.context) {
            return Err(NnError::accelerator_execution(format!(
                "{role} operand lives on a different device"
            )));
        }
        Ok(buf)
    }

    fn dispatch(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        buffers: &[&wgpu::Buffer],
        uniforms: &[u8],
        total: usize,
    ) -> NnResult<()> {
        let groups = workgroup_count(total, WORKGROUP_SIZE);
        let max_groups = self.context.limits().max_compute_workgroups_per_dimension;
        if groups > max_groups {
            return Err(NnError::accelerator_execution(format!(
                "{label}: {total} elements need {groups} workgroups, device allows {max_groups}"
            )));
        }

        self.context.scoped(label, || {
            let device = self.context.device();
            let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("nnkit kernel uniforms"),
                contents: uniforms,
                usage: wgpu::BufferUsages::UNIFORM,
            });

            let mut entries: Vec<wgpu::BindGroupEntry> = buffers
                .iter()
                .enumerate()
                .map(|(i, buf)| wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: buf.as_entire_binding(),
                })
                .collect();
            entries.push(wgpu::BindGroupEntry {
                binding: buffers.len() as u32,
                resource: uniform.as_entire_binding(),
            });

            let layout = pipeline.get_bind_group_layout(0);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &layout,
                entries: &entries,
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(label),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups, 1, 1);
            }
            self.context.queue().submit(std::iter::once(encoder.finish()));
            Ok(())
        })
    }
}

impl Kernels for WgpuKernels {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn stage(&self, tensor: &mut Tensor) -> NnResult<()> {
        if tensor.is_empty() {
            return Err(NnError::accelerator_execution(
                "cannot stage a tensor without elements",
            ));
        }
        if let Some(buf) = tensor.device_buffer() {
            if Arc::ptr_eq(buf.context(), &self.context) && buf.shape() == tensor.shape() {
                return buf.write(tensor.as_slice());
            }
        }
        let buf = DeviceBuffer::upload(
            Arc::clone(&self.context),
            tensor.as_slice(),
            tensor.shape().to_vec(),
        )?;
        tensor.attach_device(buf);
        Ok(())
    }

    fn retrieve(&self, tensor: &mut Tensor) -> NnResult<()> {
        tensor.to_host()
    }

    fn matmul(&self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> NnResult<()> {
        check_matmul(a, b, c)?;
        let (m, k, n) = (a.rows(), a.cols(), b.cols());
        let uniforms = MatmulUniforms::new(m, k, n);
        self.dispatch(
            "matmul",
            self.pipelines.matmul(),
            &[
                self.resident(a, "matmul lhs")?.raw(),
                self.resident(b, "matmul rhs")?.raw(),
                self.resident(c, "matmul output")?.raw(),
            ],
            bytemuck::bytes_of(&uniforms),
            m * n,
        )
    }

    fn add(&self, a: &Tensor, b: &Tensor, c: &mut Tensor) -> NnResult<()> {
        check_same_len("add", &[a.len(), b.len(), c.len()])?;
        let uniforms = ElementwiseUniforms::new(a.len());
        self.dispatch(
            "add",
            self.pipelines.add(),
            &[
                self.resident(a, "add lhs")?.raw(),
                self.resident(b, "add rhs")?.raw(),
                self.resident(c, "add output")?.raw(),
            ],
            bytemuck::bytes_of(&uniforms),
            a.len(),
        )
    }

    fn relu(&self, a: &Tensor, b: &mut Tensor) -> NnResult<()> {
        check_same_len("relu", &[a.len(), b.len()])?;
        let uniforms = ElementwiseUniforms::new(a.len());
        self.dispatch(
            "relu",
            self.pipelines.relu(),
            &[
                self.resident(a, "relu input")?.raw(),
                self.resident(b, "relu output")?.raw(),
            ],
            bytemuck::bytes_of(&uniforms),
            a.len(),
        )
    }
}

impl std::fmt::Debug for WgpuKernels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuKernels")
            .field("adapter", &self.context.adapter_info().name)
            .field("pipelines", &self.pipelines)
            .finish()
    }
}
