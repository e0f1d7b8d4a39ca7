//! wgpu device initialization and the process-wide shared context.

use std::sync::{Arc, OnceLock};

use crate::error::{NnError, NnResult};

/// Power preference for GPU adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    /// Prefer low power consumption (integrated GPU).
    LowPower,
    /// Prefer high performance (discrete GPU).
    #[default]
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Options for opening a [`GpuContext`].
#[derive(Debug, Clone, Default)]
pub struct GpuOptions {
    /// Power preference for adapter selection.
    pub power_preference: PowerPreference,
    /// Preferred backend (Vulkan, DX12, Metal, etc.).
    /// If None, wgpu will auto-select the best available.
    pub backend: Option<wgpu::Backends>,
    /// Force a specific adapter by name (substring match).
    pub force_adapter_name: Option<String>,
}

/// An opened wgpu device and its queue.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
}

static SHARED: OnceLock<Result<Arc<GpuContext>, String>> = OnceLock::new();

impl GpuContext {
    /// Opens an adapter and device.
    ///
    /// # Errors
    ///
    /// [`NnError::AcceleratorUnavailable`] if no matching adapter exists or
    /// the device request fails.
    pub fn init(options: GpuOptions) -> NnResult<Self> {
        let backends = options.backend.unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = pollster::block_on(Self::request_adapter(&instance, &options))?;
        let adapter_info = adapter.get_info();

        log::info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("nnkit device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| NnError::accelerator_unavailable(format!("device request failed: {e}")))?;
        let limits = device.limits();

        Ok(Self {
            device,
            queue,
            adapter_info,
            limits,
        })
    }

    /// Returns the process-wide context, opening it on first use.
    ///
    /// A failed first attempt is remembered; later calls return the same
    /// error without probing the hardware again.
    pub fn shared() -> NnResult<Arc<GpuContext>> {
        SHARED
            .get_or_init(|| {
                GpuContext::init(GpuOptions::default())
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(NnError::accelerator_unavailable)
    }

    async fn request_adapter(
        instance: &wgpu::Instance,
        options: &GpuOptions,
    ) -> NnResult<wgpu::Adapter> {
        if let Some(ref name_filter) = options.force_adapter_name {
            let wanted = name_filter.to_lowercase();
            return instance
                .enumerate_adapters(options.backend.unwrap_or(wgpu::Backends::all()))
                .into_iter()
                .find(|a| a.get_info().name.to_lowercase().contains(&wanted))
                .ok_or_else(|| {
                    NnError::accelerator_unavailable(format!(
                        "No adapter matching '{name_filter}' found"
                    ))
                });
        }

        let preferred = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await;
        match preferred {
            Some(a) => Ok(a),
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::None,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| {
                    NnError::accelerator_unavailable(
                        "No GPU adapters available. Ensure GPU drivers are installed.",
                    )
                }),
        }
    }

    /// Runs `f` inside validation and out-of-memory error scopes.
    ///
    /// Errors wgpu would otherwise report through its uncaptured-error
    /// handler come back as [`NnError::AcceleratorExecution`].
    pub(crate) fn scoped<T>(&self, label: &str, f: impl FnOnce() -> NnResult<T>) -> NnResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(oom) {
            return Err(NnError::accelerator_execution(format!("{label}: {err}")));
        }
        result
    }

    /// Returns information about the selected adapter.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Returns the device limits.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Returns the maximum storage buffer size in bytes.
    pub fn max_storage_buffer_size(&self) -> u64 {
        self.limits.max_storage_buffer_binding_size as u64
    }

    /// Blocks until submitted work completes.
    pub fn poll(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Returns a reference to the device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .field("device_type", &self.adapter_info.device_type)
            .field(
                "max_storage_buffer",
                &self.limits.max_storage_buffer_binding_size,
            )
            .finish()
    }
}
