//! Read interface for consumers that sample the voxel atlas
//!
//! Nothing in this crate samples the atlas. A cone tracer binds
//! [`VoxelAtlasReader::bind_group`] and declares the matching group in WGSL:
//!
//! ```wgsl
//! struct AtlasUniform {
//!     grid_size: u32,
//!     cascade_count: u32,
//!     mip_count: u32,
//!     direction_count: u32,
//!     cascades: array<vec4<f32>, 64>, // xyz min corner, w voxel size
//! }
//! @group(N) @binding(0) var atlas: texture_3d<f32>;
//! @group(N) @binding(1) var atlas_sampler: sampler;
//! @group(N) @binding(2) var<uniform> atlas_info: AtlasUniform;
//! ```

use bytemuck::{Pod, Zeroable};

use crate::core::types::Result;
use crate::render::registry::BufferHandle;
use crate::render::resources::VoxelResources;
use crate::voxel::config::CascadeTracker;
use crate::voxel::layout::{GridLayout, MAX_CASCADES, NUM_DIRECTIONS};

/// Atlas description for consumers (16 + 16 * 64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct AtlasUniform {
    pub grid_size: u32,
    pub cascade_count: u32,
    pub mip_count: u32,
    pub direction_count: u32,
    /// xyz world min corner, w voxel size
    pub cascades: [[f32; 4]; MAX_CASCADES as usize],
}

impl AtlasUniform {
    pub fn new(layout: &GridLayout, tracker: &CascadeTracker) -> Self {
        let mut cascades = [[0.0; 4]; MAX_CASCADES as usize];
        for c in 0..layout.cascade_count() {
            if let Some(region) = tracker.region(c) {
                let voxel = tracker.settings().voxel_size(c);
                cascades[c as usize] = region.min.extend(voxel).to_array();
            }
        }
        Self {
            grid_size: layout.grid_size(),
            cascade_count: layout.cascade_count(),
            mip_count: layout.mip_count(),
            direction_count: NUM_DIRECTIONS,
            cascades,
        }
    }
}

/// Bind group exposing the atlas, a linear clamp sampler and [`AtlasUniform`]
pub struct VoxelAtlasReader {
    uniform: BufferHandle,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

impl VoxelAtlasReader {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        resources: &mut VoxelResources,
        tracker: &CascadeTracker,
    ) -> Result<Self> {
        let uniform = resources.registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("atlas_uniform"),
            size: std::mem::size_of::<AtlasUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("atlas_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            // levels are picked explicitly with textureSampleLevel
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("atlas_reader_layout"),
            entries: &[
                // Atlas, every mip
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("atlas_reader_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(resources.atlas_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: resources.buffer(uniform)?.as_entire_binding(),
                },
            ],
        });

        let reader = Self { uniform, bind_group_layout, bind_group };
        reader.update(queue, resources, tracker)?;
        Ok(reader)
    }

    /// Refresh cascade placement after the tracker moved
    pub fn update(&self, queue: &wgpu::Queue, resources: &VoxelResources, tracker: &CascadeTracker) -> Result<()> {
        let data = AtlasUniform::new(resources.layout(), tracker);
        queue.write_buffer(resources.buffer(self.uniform)?, 0, bytemuck::bytes_of(&data));
        Ok(())
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::config::{CascadeSettings, VoxelConfig};
    use glam::Vec3;

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<AtlasUniform>(), 16 + 16 * 64);
    }

    #[test]
    fn test_uniform_cascade_placement() {
        let config = VoxelConfig::default();
        let layout = config.layout().unwrap();
        let mut tracker = CascadeTracker::new(CascadeSettings::from_config(&config));
        tracker.update(Vec3::ZERO);

        let u = AtlasUniform::new(&layout, &tracker);
        assert_eq!(u.grid_size, 64);
        assert_eq!(u.direction_count, 6);
        for c in 0..3 {
            let size = 6.0 * (1 << c) as f32;
            assert_eq!(u.cascades[c], [-size / 2.0, -size / 2.0, -size / 2.0, size / 64.0]);
        }
        assert_eq!(u.cascades[3], [0.0; 4]);
    }
}
