//! Compute pipeline creation for the device kernels.

use crate::gpu::shaders;

/// Default workgroup size for compute shaders.
pub const WORKGROUP_SIZE: usize = 64;

/// Computes the workgroup count for a given number of elements.
#[inline]
pub fn workgroup_count(total: usize, workgroup_size: usize) -> u32 {
    ((total + workgroup_size - 1) / workgroup_size) as u32
}

/// Compiled pipelines for every kernel, built once per device.
pub struct PipelineCache {
    matmul: wgpu::ComputePipeline,
    add: wgpu::ComputePipeline,
    relu: wgpu::ComputePipeline,
}

impl PipelineCache {
    /// Compiles all kernels on `device`.
    ///
    /// Bind group layouts are derived from the shaders, so each pipeline
    /// reports its own through `get_bind_group_layout(0)`.
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            matmul: create_pipeline(device, "Matmul", shaders::MATMUL_SHADER, "matmul_main"),
            add: create_pipeline(device, "Add", shaders::ADD_SHADER, "add_main"),
            relu: create_pipeline(device, "ReLU", shaders::RELU_SHADER, "relu_main"),
        }
    }

    /// Matrix product pipeline.
    pub fn matmul(&self) -> &wgpu::ComputePipeline {
        &self.matmul
    }

    /// Element-wise add pipeline.
    pub fn add(&self) -> &wgpu::ComputePipeline {
        &self.add
    }

    /// ReLU pipeline.
    pub fn relu(&self) -> &wgpu::ComputePipeline {
        &self.relu
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    name: &str,
    source: &str,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("{name} Shader")),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{name} Pipeline")),
        layout: None,
        module: &shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("kernels", &["matmul", "add", "relu"])
            .finish()
    }
}
