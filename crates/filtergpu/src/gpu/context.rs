use crate::device::Backend;
use crate::diagnostics::{DiagnosticSender, GpuDiagnostic};
use crate::error::FilterError;
use crate::types::{GpuPowerPreference, PipelineOptions};

use super::render::WgpuDevice;

/// Opens a headless wgpu device.
///
/// The backend set honours `WGPU_BACKEND` (for example `gl` on boards where
/// only an EGL driver is available) and defaults to every backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgpuBackend;

impl Backend for WgpuBackend {
    type Device = WgpuDevice;

    fn open(
        &mut self,
        options: &PipelineOptions,
        diagnostics: DiagnosticSender,
    ) -> Result<WgpuDevice, FilterError> {
        let context = GpuContext::new(options.power, diagnostics)?;
        Ok(WgpuDevice::new(context))
    }
}

pub(crate) struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub max_dimension: u32,
    // Declared last so the device is released before its instance.
    pub _instance: wgpu::Instance,
}

impl GpuContext {
    pub(crate) fn new(
        power: GpuPowerPreference,
        diagnostics: DiagnosticSender,
    ) -> Result<Self, FilterError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::from_env().unwrap_or(wgpu::Backends::all()),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let power_preference = match power {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| {
            FilterError::Initialization(format!("failed to find a suitable GPU adapter: {err}"))
        })?;

        let info = adapter.get_info();
        let limits = adapter.limits();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            driver = %info.driver,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("filtergpu device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| FilterError::Initialization(format!("failed to create GPU device: {err}")))?;

        device.on_uncaptured_error(Box::new(move |error| {
            tracing::error!(%error, "uncaptured device error");
            diagnostics.send(GpuDiagnostic::Uncaptured(error.to_string()));
        }));

        Ok(Self {
            device,
            queue,
            max_dimension: limits.max_texture_dimension_2d,
            _instance: instance,
        })
    }
}
