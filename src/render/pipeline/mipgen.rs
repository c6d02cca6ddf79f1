//! Anisotropic mip generation compute pipeline
//!
//! Levels `1..mip_count` of a cascade are produced in order inside one
//! compute pass. Each dispatch samples level `L - 1` through its single-mip
//! view and writes level `L` as storage, covering every direction slot.

use bytemuck::{Pod, Zeroable};

use crate::core::types::Result;
use crate::render::pipeline::{
    create_slot_buffer, dynamic_uniform_binding, dynamic_uniform_entry, storage_texture_3d_entry,
    texture_3d_entry, uniform_slot_offset, FrameContext, PipelineStage, Stage, StageBuildContext,
};
use crate::render::registry::{BufferHandle, ResourceRegistry};
use crate::render::resources::VOXEL_FORMAT;
use crate::render::sync::{Access, ResourceId, ResourceState};
use crate::voxel::layout::{GridLayout, NUM_DIRECTIONS};

/// Workgroup edge of the mip pass
pub const MIP_WORKGROUP_EDGE: u32 = 4;

/// Parameters of one `(cascade, level)` dispatch (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MipParams {
    pub cascade: u32,
    pub level: u32,
    /// Slot resolution of `level`
    pub resolution: u32,
    pub _pad: u32,
}

impl MipParams {
    pub fn new(layout: &GridLayout, cascade: u32, level: u32) -> Self {
        Self { cascade, level, resolution: layout.mip_resolution(level), _pad: 0 }
    }

    /// Workgroups covering all six direction slots of the level
    pub fn workgroups(&self) -> (u32, u32, u32) {
        let g = self.resolution;
        (
            (g * NUM_DIRECTIONS).div_ceil(MIP_WORKGROUP_EDGE),
            g.div_ceil(MIP_WORKGROUP_EDGE),
            g.div_ceil(MIP_WORKGROUP_EDGE),
        )
    }
}

/// Uniform slot of one `(cascade, level)` dispatch
pub fn mip_slot(layout: &GridLayout, cascade: u32, level: u32) -> u32 {
    cascade * layout.mip_count() + level
}

/// Mip generation pipeline
pub struct MipPipeline {
    pipeline: wgpu::ComputePipeline,
    params: BufferHandle,
    /// Indexed by `level - 1`
    level_bind_groups: Vec<wgpu::BindGroup>,
}

impl PipelineStage for MipPipeline {
    const STAGE: Stage = Stage::Mip;

    fn build(ctx: &mut StageBuildContext<'_>) -> Result<Self> {
        let device = ctx.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mipgen_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/mipgen.wgsl").into()),
        });

        let layout = *ctx.resources.layout();
        let slots = layout.cascade_count() * layout.mip_count();
        let params = create_slot_buffer(device, &mut ctx.resources.registry, "mip_params", slots);

        let compute = wgpu::ShaderStages::COMPUTE;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mipgen_layout"),
            entries: &[
                dynamic_uniform_entry::<MipParams>(0, compute),
                // Level L - 1
                texture_3d_entry(1, compute, wgpu::TextureSampleType::Float { filterable: false }),
                // Level L
                storage_texture_3d_entry(2, compute, VOXEL_FORMAT),
            ],
        });

        let resources = &*ctx.resources;
        let params_buffer = resources.buffer(params)?;
        let level_bind_groups = (1..layout.mip_count())
            .map(|level| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("mipgen_bind_group"),
                    layout: &bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: dynamic_uniform_binding::<MipParams>(params_buffer),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(resources.atlas_mip_view(level - 1)),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(resources.atlas_mip_view(level)),
                        },
                    ],
                })
            })
            .collect();

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mipgen_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("mipgen_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        log::info!("Mip pipeline ready ({} levels per cascade)", layout.mip_count());
        Ok(Self { pipeline, params, level_bind_groups })
    }

    fn record(&self, frame: &mut FrameContext<'_>, cascade: u32) -> Result<()> {
        use Access::*;
        use ResourceState::*;
        frame.declare(Stage::Mip, cascade, &[
            (ResourceId::AtlasBase, Read(Sampled)),
            (ResourceId::AtlasMips, Write(StorageWrite)),
        ])?;

        let resources = frame.resources;
        let profiler = frame.profiler;
        let layout = *resources.layout();
        if layout.mip_count() < 2 {
            return Ok(());
        }

        let params_buffer = resources.buffer(self.params)?;
        for level in 1..layout.mip_count() {
            let params = MipParams::new(&layout, cascade, level);
            frame.queue.write_buffer(
                params_buffer,
                uniform_slot_offset(mip_slot(&layout, cascade, level)) as u64,
                bytemuck::bytes_of(&params),
            );
        }

        let timestamp_writes = profiler.and_then(|p| p.compute_pass_timestamp_writes(Stage::Mip));
        let encoder = frame.recorder.encoder(Stage::Mip.lane());
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("mipgen_pass"),
            timestamp_writes,
        });
        pass.set_pipeline(&self.pipeline);
        for level in 1..layout.mip_count() {
            let params = MipParams::new(&layout, cascade, level);
            let (x, y, z) = params.workgroups();
            let offset = uniform_slot_offset(mip_slot(&layout, cascade, level));
            pass.set_bind_group(0, &self.level_bind_groups[level as usize - 1], &[offset]);
            pass.dispatch_workgroups(x, y, z);
        }

        log::debug!("Mip cascade {}: {} levels", cascade, layout.mip_count() - 1);
        Ok(())
    }

    fn destroy(self, registry: &mut ResourceRegistry) -> Result<()> {
        registry.release_buffer(self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<MipParams>(), 16);
    }

    #[test]
    fn test_workgroups_cover_every_slot() {
        let layout = GridLayout::new(64, 3, 3, 2).unwrap();
        assert_eq!(MipParams::new(&layout, 0, 1).workgroups(), (48, 8, 8));
        assert_eq!(MipParams::new(&layout, 0, 2).workgroups(), (24, 4, 4));
        let tiny = GridLayout::new(4, 1, 3, 2).unwrap();
        // 1^3 slots still launch one group
        assert_eq!(MipParams::new(&tiny, 0, 2).workgroups(), (2, 1, 1));
    }

    #[test]
    fn test_slots_per_cascade_and_level() {
        let layout = GridLayout::new(64, 3, 3, 2).unwrap();
        assert_eq!(mip_slot(&layout, 0, 1), 1);
        assert_eq!(mip_slot(&layout, 2, 2), 8);
        assert!(mip_slot(&layout, 2, 2) < layout.cascade_count() * layout.mip_count());
    }
}
