//! Voxel build stages
//!
//! The build is a closed set of four stages recorded in dependency order:
//! culling, voxelization, compaction and mip generation. Each implements
//! [`PipelineStage`] and records one cascade at a time into a
//! [`FrameContext`].

pub mod culling;
pub mod voxelize;
pub mod compaction;
pub mod mipgen;

pub use culling::{CullParams, CullingPipeline};
pub use voxelize::{VoxelizeParams, VoxelizePipeline};
pub use compaction::{CompactParams, CompactionPipeline};
pub use mipgen::{MipParams, MipPipeline};

use crate::core::types::Result;
use crate::render::buffer::SceneBuffers;
use crate::render::profiler::GpuProfiler;
use crate::render::registry::{BufferHandle, ResourceRegistry};
use crate::render::resources::VoxelResources;
use crate::render::sync::{Access, FrameRecorder, FrameSync, Lane, ResourceId};
use crate::voxel::config::CascadeTracker;

/// The build stages, in dependency order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Culling = 0,
    Voxelization = 1,
    Compaction = 2,
    Mip = 3,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Culling, Stage::Voxelization, Stage::Compaction, Stage::Mip];

    /// Lane the stage records on
    pub fn lane(self) -> Lane {
        match self {
            Stage::Voxelization => Lane::Graphics,
            Stage::Culling | Stage::Compaction | Stage::Mip => Lane::Compute,
        }
    }
}

/// Byte stride between dynamic uniform slots. 256 is the largest
/// `min_uniform_buffer_offset_alignment` wgpu allows.
pub const UNIFORM_SLOT_STRIDE: u64 = 256;

/// Dynamic offset of uniform slot `slot`
pub fn uniform_slot_offset(slot: u32) -> u32 {
    (slot as u64 * UNIFORM_SLOT_STRIDE) as u32
}

/// Uniform buffer holding `slots` dynamic-offset slots
pub(crate) fn create_slot_buffer(
    device: &wgpu::Device,
    registry: &mut ResourceRegistry,
    label: &str,
    slots: u32,
) -> BufferHandle {
    registry.create_buffer(device, &wgpu::BufferDescriptor {
        label: Some(label),
        size: slots.max(1) as u64 * UNIFORM_SLOT_STRIDE,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Layout entry of a dynamic-offset uniform of `T`
pub(crate) fn dynamic_uniform_entry<T>(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<T>() as u64),
        },
        count: None,
    }
}

/// Binding of one slot of a dynamic uniform buffer
pub(crate) fn dynamic_uniform_binding<T>(buffer: &wgpu::Buffer) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
        buffer,
        offset: 0,
        size: wgpu::BufferSize::new(std::mem::size_of::<T>() as u64),
    })
}

pub(crate) fn storage_buffer_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn texture_3d_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    sample_type: wgpu::TextureSampleType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn storage_texture_3d_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    format: wgpu::TextureFormat,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: wgpu::TextureViewDimension::D3,
        },
        count: None,
    }
}

/// What a stage needs at construction
pub struct StageBuildContext<'a> {
    pub device: &'a wgpu::Device,
    pub resources: &'a mut VoxelResources,
    pub scene: &'a SceneBuffers,
}

/// Everything a stage records into for one frame
pub struct FrameContext<'a> {
    pub queue: &'a wgpu::Queue,
    pub recorder: &'a mut FrameRecorder,
    pub sync: &'a mut FrameSync,
    pub resources: &'a VoxelResources,
    pub scene: &'a SceneBuffers,
    pub tracker: &'a CascadeTracker,
    pub profiler: Option<&'a GpuProfiler>,
}

impl FrameContext<'_> {
    /// Declare accesses of `stage` for `cascade`
    pub fn declare(&mut self, stage: Stage, cascade: u32, accesses: &[(ResourceId, Access)]) -> Result<()> {
        for &(resource, access) in accesses {
            self.sync.access(stage, stage.lane(), resource, cascade, access)?;
        }
        Ok(())
    }

    /// Command encoder of `stage`'s lane
    pub fn encoder(&mut self, stage: Stage) -> &mut wgpu::CommandEncoder {
        self.recorder.encoder(stage.lane())
    }
}

/// One stage of the voxel build
pub trait PipelineStage: Sized {
    const STAGE: Stage;

    /// Create pipelines, uniform slots and bind groups
    fn build(ctx: &mut StageBuildContext<'_>) -> Result<Self>;

    /// Record the stage's passes for `cascade`
    fn record(&self, frame: &mut FrameContext<'_>, cascade: u32) -> Result<()>;

    /// Release the buffers the stage registered
    fn destroy(self, registry: &mut ResourceRegistry) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_lanes_and_order() {
        assert_eq!(Stage::Voxelization.lane(), Lane::Graphics);
        assert_eq!(Stage::Culling.lane(), Lane::Compute);
        assert!(Stage::ALL.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Stage::Mip as u32, 3);
    }

    #[test]
    fn test_uniform_slots_are_aligned() {
        assert_eq!(uniform_slot_offset(0), 0);
        assert_eq!(uniform_slot_offset(5), 1280);
        assert_eq!(UNIFORM_SLOT_STRIDE % 256, 0);
    }
}
