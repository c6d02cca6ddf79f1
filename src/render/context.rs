//! Headless GPU context management using wgpu

use crate::core::error::Error;

/// Storage formats every voxel context needs
pub const REQUIRED_STORAGE_FORMATS: [wgpu::TextureFormat; 2] =
    [wgpu::TextureFormat::Rgba8Unorm, wgpu::TextureFormat::R32Uint];

/// Invocations of one merge workgroup (8x8x8)
pub const REQUIRED_INVOCATIONS_PER_WORKGROUP: u32 = 512;

/// GPU device context without a surface
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Timestamp queries were granted
    pub timestamps: bool,
}

impl GpuContext {
    /// Create a context on the highest performance adapter
    pub async fn new() -> Result<Self, Error> {
        let instance_desc = wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        };
        let instance = wgpu::Instance::new(&instance_desc);

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        let info = adapter.get_info();
        log::info!("Using adapter {} ({:?})", info.name, info.backend);

        check_storage_formats(&adapter)?;

        let adapter_limits = adapter.limits();
        if adapter_limits.max_compute_invocations_per_workgroup < REQUIRED_INVOCATIONS_PER_WORKGROUP {
            return Err(Error::Gpu(format!(
                "Adapter allows {} invocations per workgroup, {} required",
                adapter_limits.max_compute_invocations_per_workgroup, REQUIRED_INVOCATIONS_PER_WORKGROUP
            )));
        }

        let timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let device_desc = wgpu::DeviceDescriptor {
            label: Some("voxcone_device"),
            required_features,
            required_limits: wgpu::Limits {
                max_compute_invocations_per_workgroup: REQUIRED_INVOCATIONS_PER_WORKGROUP,
                max_texture_dimension_3d: adapter_limits.max_texture_dimension_3d,
                max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                max_buffer_size: adapter_limits.max_buffer_size,
                ..Default::default()
            },
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: Default::default(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        log::info!(
            "GPU buffer limits: max_buffer_size={}MB, max_storage_binding={}MB, timestamps={}",
            adapter_limits.max_buffer_size / 1024 / 1024,
            adapter_limits.max_storage_buffer_binding_size / 1024 / 1024,
            timestamps
        );

        Ok(Self { instance, adapter, device, queue, timestamps })
    }

    /// Blocking wrapper around [`GpuContext::new`]
    pub fn new_blocking() -> Result<Self, Error> {
        pollster::block_on(Self::new())
    }

    /// Largest 3D texture side the device accepts
    pub fn max_texture_dimension_3d(&self) -> u32 {
        self.device.limits().max_texture_dimension_3d
    }
}

/// Fail with [`Error::UnsupportedFormat`] unless every required format can
/// be bound as a storage texture
pub fn check_storage_formats(adapter: &wgpu::Adapter) -> Result<(), Error> {
    for format in REQUIRED_STORAGE_FORMATS {
        let features = adapter.get_texture_format_features(format);
        if !features.allowed_usages.contains(wgpu::TextureUsages::STORAGE_BINDING) {
            return Err(Error::UnsupportedFormat(format));
        }
    }
    Ok(())
}
