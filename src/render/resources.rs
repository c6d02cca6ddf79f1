//! Voxel textures and surface buffers owned by one pipeline context
//!
//! Every allocation goes through the [`ResourceRegistry`], so teardown is a
//! single deterministic `destroy_all`. Views are created once here and
//! borrowed by the stages when they build bind groups.

use glam::UVec3;

use crate::core::error::{CapacityError, Error};
use crate::core::types::Result;
use crate::math::Axis;
use crate::render::context::check_storage_formats;
use crate::render::readback;
use crate::render::registry::{BufferHandle, ResourceRegistry, TextureHandle};
use crate::voxel::grid::{AtlasVolume, AxisGrids, OccupancyVolume, Texel};
use crate::voxel::layout::GridLayout;
use crate::voxel::surface::{SurfaceDispatch, SurfaceListEntry, SurfaceStats};

pub const VOXEL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const OCCUPANCY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;

/// Attribute textures of one isotropic grid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attribute {
    /// Albedo with opacity in alpha
    Albedo = 0,
    /// Normal encoded as `n * 0.5 + 0.5`
    Normal = 1,
    Emission = 2,
}

impl Attribute {
    pub const ALL: [Attribute; 3] = [Attribute::Albedo, Attribute::Normal, Attribute::Emission];

    fn label(self, axis: Axis) -> &'static str {
        match (axis, self) {
            (Axis::X, Attribute::Albedo) => "voxel_grid_x_albedo",
            (Axis::X, Attribute::Normal) => "voxel_grid_x_normal",
            (Axis::X, Attribute::Emission) => "voxel_grid_x_emission",
            (Axis::Y, Attribute::Albedo) => "voxel_grid_y_albedo",
            (Axis::Y, Attribute::Normal) => "voxel_grid_y_normal",
            (Axis::Y, Attribute::Emission) => "voxel_grid_y_emission",
            (Axis::Z, Attribute::Albedo) => "voxel_grid_z_albedo",
            (Axis::Z, Attribute::Normal) => "voxel_grid_z_normal",
            (Axis::Z, Attribute::Emission) => "voxel_grid_z_emission",
        }
    }
}

fn view_3d(texture: &wgpu::Texture, label: &str, base_mip_level: u32, mip_level_count: Option<u32>) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(wgpu::TextureViewDimension::D3),
        base_mip_level,
        mip_level_count,
        ..Default::default()
    })
}

/// Reject a 3D texture extent the device cannot allocate
fn check_extent_3d(what: &str, extent: UVec3, max_3d: u32) -> Result<()> {
    if extent.max_element() > max_3d {
        return Err(Error::Config(format!("{what} extent {extent} exceeds the 3D texture limit {max_3d}")));
    }
    Ok(())
}

fn extent_3d(e: UVec3) -> wgpu::Extent3d {
    wgpu::Extent3d { width: e.x, height: e.y, depth_or_array_layers: e.z }
}

/// GPU side of the voxel grids
pub struct VoxelResources {
    layout: GridLayout,
    surface_capacity: u32,
    pub registry: ResourceRegistry,

    axis_textures: [[TextureHandle; 3]; 3],
    /// Indexed by axis, then [`Attribute`]
    axis_views: Vec<[wgpu::TextureView; 3]>,

    atlas: TextureHandle,
    atlas_view: wgpu::TextureView,
    atlas_mip_views: Vec<wgpu::TextureView>,

    occupancy: TextureHandle,
    occupancy_view: wgpu::TextureView,

    /// Packed [`SurfaceListEntry`] records of the last compacted cascade
    pub surface_list: BufferHandle,
    /// One [`SurfaceStats`]
    pub surface_stats: BufferHandle,
    /// One [`SurfaceDispatch`], bound as storage and used as indirect args
    pub surface_dispatch: BufferHandle,
}

impl VoxelResources {
    /// Allocate every voxel resource for `layout`
    pub fn new(
        adapter: &wgpu::Adapter,
        device: &wgpu::Device,
        layout: GridLayout,
        surface_capacity: u32,
    ) -> Result<Self> {
        check_storage_formats(adapter)?;

        let max_3d = device.limits().max_texture_dimension_3d;
        let atlas_extent = layout.atlas_extent();
        check_extent_3d("Atlas", atlas_extent, max_3d)?;
        check_extent_3d("Occupancy", layout.occupancy_extent(), max_3d)?;
        for axis in Axis::ALL {
            check_extent_3d("Axis grid", layout.isotropic_extent(axis), max_3d)?;
        }

        let list_bytes = surface_capacity.max(1) as u64 * std::mem::size_of::<SurfaceListEntry>() as u64;
        let max_binding = device.limits().max_storage_buffer_binding_size as u64;
        CapacityError::check("surface list bytes", list_bytes as usize, max_binding as usize)?;

        let mut registry = ResourceRegistry::new();

        let grid_usage = wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;

        let axis_textures = Axis::ALL.map(|axis| {
            Attribute::ALL.map(|attribute| {
                registry.create_texture(device, &wgpu::TextureDescriptor {
                    label: Some(attribute.label(axis)),
                    size: extent_3d(layout.isotropic_extent(axis)),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D3,
                    format: VOXEL_FORMAT,
                    usage: grid_usage,
                    view_formats: &[],
                })
            })
        });

        let atlas = registry.create_texture(device, &wgpu::TextureDescriptor {
            label: Some("voxel_atlas"),
            size: extent_3d(atlas_extent),
            mip_level_count: layout.mip_count(),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: VOXEL_FORMAT,
            usage: grid_usage,
            view_formats: &[],
        });

        let occupancy = registry.create_texture(device, &wgpu::TextureDescriptor {
            label: Some("voxel_occupancy"),
            size: extent_3d(layout.occupancy_extent()),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: OCCUPANCY_FORMAT,
            usage: grid_usage,
            view_formats: &[],
        });

        let surface_list = registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("surface_list"),
            size: list_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let surface_stats = registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("surface_stats"),
            size: std::mem::size_of::<SurfaceStats>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let surface_dispatch = registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("surface_dispatch"),
            size: std::mem::size_of::<SurfaceDispatch>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let mut axis_views = Vec::with_capacity(3);
        for axis in Axis::ALL {
            let [albedo, normal, emission] = axis_textures[axis.index()];
            let view = |handle, attribute: Attribute| -> Result<wgpu::TextureView> {
                Ok(view_3d(registry.texture(handle)?, attribute.label(axis), 0, Some(1)))
            };
            axis_views.push([
                view(albedo, Attribute::Albedo)?,
                view(normal, Attribute::Normal)?,
                view(emission, Attribute::Emission)?,
            ]);
        }

        let atlas_texture = registry.texture(atlas)?;
        let atlas_view = view_3d(atlas_texture, "voxel_atlas_view", 0, None);
        let atlas_mip_views = (0..layout.mip_count())
            .map(|mip| view_3d(atlas_texture, "voxel_atlas_mip_view", mip, Some(1)))
            .collect();
        let occupancy_view = view_3d(registry.texture(occupancy)?, "voxel_occupancy_view", 0, Some(1));

        let e = atlas_extent;
        log::info!(
            "Voxel resources: atlas {}x{}x{} ({} mips), axis grids {}x{}x{}, surface capacity {}",
            e.x,
            e.y,
            e.z,
            layout.mip_count(),
            layout.grid_size(),
            layout.raster_extent(),
            layout.raster_extent(),
            surface_capacity
        );

        Ok(Self {
            layout,
            surface_capacity,
            registry,
            axis_textures,
            axis_views,
            atlas,
            atlas_view,
            atlas_mip_views,
            occupancy,
            occupancy_view,
            surface_list,
            surface_stats,
            surface_dispatch,
        })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn surface_capacity(&self) -> u32 {
        self.surface_capacity
    }

    pub fn axis_view(&self, axis: Axis, attribute: Attribute) -> &wgpu::TextureView {
        &self.axis_views[axis.index()][attribute as usize]
    }

    /// The three attribute views of one axis grid
    pub fn axis_views(&self, axis: Axis) -> &[wgpu::TextureView; 3] {
        &self.axis_views[axis.index()]
    }

    /// Every mip of the atlas
    pub fn atlas_view(&self) -> &wgpu::TextureView {
        &self.atlas_view
    }

    /// A single atlas mip, for storage binding
    pub fn atlas_mip_view(&self, mip: u32) -> &wgpu::TextureView {
        &self.atlas_mip_views[mip as usize]
    }

    pub fn occupancy_view(&self) -> &wgpu::TextureView {
        &self.occupancy_view
    }

    pub fn buffer(&self, handle: BufferHandle) -> Result<&wgpu::Buffer> {
        self.registry.buffer(handle)
    }

    /// Destroy every texture and buffer of this context
    pub fn destroy(mut self) {
        self.registry.destroy_all();
    }

    /// Counters of the last compaction; logs a warning when entries were dropped
    pub fn read_surface_stats(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<SurfaceStats> {
        let buffer = self.registry.buffer(self.surface_stats)?;
        let bytes = readback::read_buffer(device, queue, buffer, 0, std::mem::size_of::<SurfaceStats>() as u64)?;
        let stats: SurfaceStats = bytemuck::pod_read_unaligned(&bytes);
        if stats.overflowed() {
            log::warn!(
                "Surface list overflow: {} entries requested, capacity {}, {} dropped",
                stats.requested,
                stats.capacity,
                stats.dropped
            );
        }
        Ok(stats)
    }

    /// The live part of the surface list
    pub fn read_surface_list(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<SurfaceListEntry>> {
        let stats = self.read_surface_stats(device, queue)?;
        let count = stats.count.min(self.surface_capacity) as u64;
        let entry_size = std::mem::size_of::<SurfaceListEntry>() as u64;
        let buffer = self.registry.buffer(self.surface_list)?;
        let bytes = readback::read_buffer(device, queue, buffer, 0, count * entry_size)?;
        Ok(bytes.chunks_exact(entry_size as usize).map(bytemuck::pod_read_unaligned).collect())
    }

    pub fn read_dispatch(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<SurfaceDispatch> {
        let buffer = self.registry.buffer(self.surface_dispatch)?;
        let bytes = readback::read_buffer(device, queue, buffer, 0, std::mem::size_of::<SurfaceDispatch>() as u64)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// One atlas level, every cascade and direction slot
    pub fn read_atlas_mip(&self, device: &wgpu::Device, queue: &wgpu::Queue, mip: u32) -> Result<Vec<Texel>> {
        let texture = self.registry.texture(self.atlas)?;
        let bytes = readback::read_texture_3d(device, queue, texture, mip, self.layout.atlas_mip_extent(mip), 4)?;
        Ok(bytemuck::cast_slice::<u8, Texel>(&bytes).to_vec())
    }

    /// Every atlas level wrapped for comparison with the CPU models
    pub fn read_atlas(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<AtlasVolume> {
        let mips = (0..self.layout.mip_count())
            .map(|mip| self.read_atlas_mip(device, queue, mip))
            .collect::<Result<Vec<_>>>()?;
        AtlasVolume::from_mips(self.layout, mips).ok_or_else(|| Error::Gpu("Atlas readback size mismatch".into()))
    }

    pub fn read_occupancy(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<OccupancyVolume> {
        let texture = self.registry.texture(self.occupancy)?;
        let bytes = readback::read_texture_3d(device, queue, texture, 0, self.layout.occupancy_extent(), 4)?;
        OccupancyVolume::from_masks(self.layout, readback::words(&bytes))
            .ok_or_else(|| Error::Gpu("Occupancy readback size mismatch".into()))
    }

    /// The per-axis working grids, zero between builds
    pub fn read_axis_grids(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<AxisGrids> {
        let mut grids = AxisGrids::new(self.layout);
        for axis in Axis::ALL {
            let extent = self.layout.isotropic_extent(axis);
            let mut read = |attribute: Attribute| -> Result<Vec<Texel>> {
                let texture = self.registry.texture(self.axis_textures[axis.index()][attribute as usize])?;
                let bytes = readback::read_texture_3d(device, queue, texture, 0, extent, 4)?;
                Ok(bytemuck::cast_slice::<u8, Texel>(&bytes).to_vec())
            };
            let albedo = read(Attribute::Albedo)?;
            let normal = read(Attribute::Normal)?;
            let emission = read(Attribute::Emission)?;
            let volume = grids.axis_mut(axis);
            volume.albedo = albedo;
            volume.normal = normal;
            volume.emission = emission;
        }
        Ok(grids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_grid_extent_is_checked_against_device_limit() {
        // 512 cells at 4x supersampling is a valid layout whose axis grids
        // are wider than a 1024-texel limit
        let layout = GridLayout::new(512, 1, 1, 4).unwrap();
        assert!(check_extent_3d("Atlas", layout.atlas_extent(), 4096).is_ok());
        let err = check_extent_3d("Axis grid", layout.isotropic_extent(Axis::X), 1024).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.starts_with("Axis grid")));
        assert!(check_extent_3d("Axis grid", layout.isotropic_extent(Axis::X), 2048).is_ok());
    }
}
