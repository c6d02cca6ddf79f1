//! GPU instance culling compute pipeline
//!
//! One invocation per instance tests its AABB against the cascade region and
//! masks the matching indirect draw in place: visible draws get an instance
//! count of 1, culled ones 0. Visible instances bump the draw counter and
//! append a debug box while the list has room.

use bytemuck::{Pod, Zeroable};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::Aabb;
use crate::render::pipeline::{
    create_slot_buffer, dynamic_uniform_binding, dynamic_uniform_entry, storage_buffer_entry,
    uniform_slot_offset, FrameContext, PipelineStage, Stage, StageBuildContext,
};
use crate::render::registry::{BufferHandle, ResourceRegistry};
use crate::render::sync::{Access, ResourceId, ResourceState};

/// Invocations per culling workgroup
pub const CULL_WORKGROUP_SIZE: u32 = 16;

/// Culling parameters of one cascade (48 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CullParams {
    pub volume_center: [f32; 4],
    pub volume_half_extent: [f32; 4],
    pub instance_count: u32,
    pub debug_capacity: u32,
    pub _pad: [u32; 2],
}

impl CullParams {
    pub fn new(volume: &Aabb, instance_count: u32, debug_capacity: u32) -> Self {
        Self {
            volume_center: volume.center().extend(0.0).to_array(),
            volume_half_extent: volume.half_extent().extend(0.0).to_array(),
            instance_count,
            debug_capacity,
            _pad: [0; 2],
        }
    }

    /// Workgroups covering every instance
    pub fn workgroups(&self) -> u32 {
        self.instance_count.div_ceil(CULL_WORKGROUP_SIZE)
    }
}

/// Instance culling compute pipeline
pub struct CullingPipeline {
    pipeline: wgpu::ComputePipeline,
    params: BufferHandle,
    bind_group: wgpu::BindGroup,
}

impl CullingPipeline {
    /// Write the parameters of `cascade` into its uniform slot
    pub fn update_params(&self, frame: &FrameContext<'_>, cascade: u32, params: &CullParams) -> Result<()> {
        let buffer = frame.resources.buffer(self.params)?;
        frame
            .queue
            .write_buffer(buffer, uniform_slot_offset(cascade) as u64, bytemuck::bytes_of(params));
        Ok(())
    }

    /// Cull against an explicit volume instead of the cascade region
    pub fn record_volume(&self, frame: &mut FrameContext<'_>, cascade: u32, volume: &Aabb) -> Result<()> {
        use Access::*;
        use ResourceState::*;
        frame.declare(Stage::Culling, cascade, &[
            (ResourceId::IndirectDraws, Write(StorageWrite)),
            (ResourceId::DrawCount, Write(StorageWrite)),
            (ResourceId::DebugBoxes, Write(StorageWrite)),
        ])?;

        let params = CullParams::new(volume, frame.scene.instance_count(), frame.scene.debug_box_capacity());
        self.update_params(frame, cascade, &params)?;

        let resources = frame.resources;
        let profiler = frame.profiler;
        let draw_count = resources.buffer(frame.scene.draw_count)?;
        let timestamp_writes = profiler.and_then(|p| p.compute_pass_timestamp_writes(Stage::Culling));
        let encoder = frame.recorder.encoder(Stage::Culling.lane());
        encoder.clear_buffer(draw_count, 0, None);

        if params.instance_count == 0 {
            log::debug!("Culling cascade {}: no instances, counter cleared", cascade);
            return Ok(());
        }

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("cull_pass"),
            timestamp_writes,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[uniform_slot_offset(cascade)]);
        pass.dispatch_workgroups(params.workgroups(), 1, 1);

        log::debug!(
            "Culling cascade {}: {} instances in {} workgroups",
            cascade,
            params.instance_count,
            params.workgroups()
        );
        Ok(())
    }
}

impl PipelineStage for CullingPipeline {
    const STAGE: Stage = Stage::Culling;

    fn build(ctx: &mut StageBuildContext<'_>) -> Result<Self> {
        let device = ctx.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("cull_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/cull.wgsl").into()),
        });

        let slots = ctx.resources.layout().cascade_count();
        let params = create_slot_buffer(device, &mut ctx.resources.registry, "cull_params", slots);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cull_layout"),
            entries: &[
                dynamic_uniform_entry::<CullParams>(0, wgpu::ShaderStages::COMPUTE),
                // Instance AABBs
                storage_buffer_entry(1, true),
                // Indirect draws, masked in place
                storage_buffer_entry(2, false),
                // Draw counter
                storage_buffer_entry(3, false),
                // Debug boxes
                storage_buffer_entry(4, false),
            ],
        });

        let resources = &*ctx.resources;
        let scene = ctx.scene;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cull_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dynamic_uniform_binding::<CullParams>(resources.buffer(params)?),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: resources.buffer(scene.instances)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: resources.buffer(scene.draws)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: resources.buffer(scene.draw_count)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: resources.buffer(scene.debug_boxes)?.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("cull_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("cull_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        log::info!("Culling pipeline ready ({} cascade slots)", slots);
        Ok(Self { pipeline, params, bind_group })
    }

    fn record(&self, frame: &mut FrameContext<'_>, cascade: u32) -> Result<()> {
        let region = frame
            .tracker
            .region(cascade)
            .ok_or_else(|| Error::Config(format!("Cascade {cascade} has no region yet")))?;
        self.record_volume(frame, cascade, &region)
    }

    fn destroy(self, registry: &mut ResourceRegistry) -> Result<()> {
        registry.release_buffer(self.params)
    }
}
