//! Surface compaction compute pipeline
//!
//! One compute pass per cascade, three phases:
//!
//! 1. **merge** reads the three axis grids, writes mip 0 of every direction
//!    slot and the occupancy mask of each cell, and counts occupied
//!    `(cell, axis)` pairs
//! 2. **emit** runs as a single workgroup that scans the occupancy masks in
//!    linear cell order and appends surface entries up to capacity, then
//!    writes the counters and both indirect dispatch commands
//! 3. **release** clears the listed cells of each axis grid through the
//!    sparse indirect command, and every cell through the dense command when
//!    entries were dropped. The dense command is empty otherwise.
//!
//! The axis grids are shared by every cascade, so both entry points hand
//! them back zeroed. A scan clears them densely instead of through the list.

use bytemuck::{Pod, Zeroable};

use crate::core::types::Result;
use crate::math::Axis;
use crate::render::pipeline::{
    create_slot_buffer, dynamic_uniform_binding, dynamic_uniform_entry, storage_buffer_entry,
    storage_texture_3d_entry, texture_3d_entry, uniform_slot_offset, FrameContext, PipelineStage, Stage,
    StageBuildContext,
};
use crate::render::registry::{BufferHandle, ResourceRegistry};
use crate::render::resources::{Attribute, VoxelResources, OCCUPANCY_FORMAT, VOXEL_FORMAT};
use crate::render::sync::{Access, ResourceId, ResourceState};
use crate::voxel::cpu::compaction::{dense_clear_groups, MERGE_WORKGROUP_EDGE};
use crate::voxel::layout::GridLayout;
use crate::voxel::surface::{DispatchIndirectCommand, SurfaceDispatch};

/// Invocations of the single emit workgroup
pub const EMIT_WORKGROUP_SIZE: u32 = 256;

/// Per `(cascade, axis)` compaction parameters (32 bytes)
///
/// Merge and emit read the X slot of their cascade; each release bind group
/// reads its own axis slot.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CompactParams {
    pub cascade: u32,
    pub capacity: u32,
    pub grid_size: u32,
    pub axis_scalar: u32,
    /// Groups of a dense clear of one axis grid
    pub dense_groups: u32,
    pub axis: u32,
    pub _pad: [u32; 2],
}

impl CompactParams {
    pub fn new(layout: &GridLayout, cascade: u32, axis: Axis, capacity: u32) -> Self {
        Self {
            cascade,
            capacity,
            grid_size: layout.grid_size(),
            axis_scalar: layout.axis_scalar(),
            dense_groups: dense_clear_groups(layout),
            axis: axis.index() as u32,
            _pad: [0; 2],
        }
    }
}

/// Uniform slot of one `(cascade, axis)` pair
pub fn compact_slot(cascade: u32, axis: Axis) -> u32 {
    cascade * 3 + axis.index() as u32
}

/// Direct workgroups of the merge phase along each dimension
pub fn merge_groups(layout: &GridLayout) -> u32 {
    layout.grid_size().div_ceil(MERGE_WORKGROUP_EDGE)
}

/// How a compaction run hands the axis grids back
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReleaseMode {
    /// Listed cells through the sparse command, every cell on overflow
    Listed,
    /// Every cell through a direct dispatch
    Dense,
}

/// Surface compaction pipeline
pub struct CompactionPipeline {
    merge_pipeline: wgpu::ComputePipeline,
    emit_pipeline: wgpu::ComputePipeline,
    release_sparse_pipeline: wgpu::ComputePipeline,
    release_dense_pipeline: wgpu::ComputePipeline,
    params: BufferHandle,
    merge_bind_group: wgpu::BindGroup,
    emit_bind_group: wgpu::BindGroup,
    /// One per axis grid
    release_bind_groups: Vec<wgpu::BindGroup>,
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        immediate_size: 0,
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

impl CompactionPipeline {
    /// Merge and emit, then clear every axis grid directly. The surface
    /// list and counters are left untouched for readback, so repeated
    /// scans of the same geometry can be compared.
    pub fn record_scan(&self, frame: &mut FrameContext<'_>, cascade: u32) -> Result<()> {
        self.record_passes(frame, cascade, ReleaseMode::Dense)
    }

    fn write_params(&self, frame: &FrameContext<'_>, cascade: u32) -> Result<()> {
        let resources = frame.resources;
        let buffer = resources.buffer(self.params)?;
        for axis in Axis::ALL {
            let params = CompactParams::new(resources.layout(), cascade, axis, resources.surface_capacity());
            frame.queue.write_buffer(
                buffer,
                uniform_slot_offset(compact_slot(cascade, axis)) as u64,
                bytemuck::bytes_of(&params),
            );
        }
        Ok(())
    }

    fn record_passes(&self, frame: &mut FrameContext<'_>, cascade: u32, mode: ReleaseMode) -> Result<()> {
        use Access::*;
        use ResourceState::*;

        frame.declare(Stage::Compaction, cascade, &[
            (ResourceId::AxisGrids, Read(Sampled)),
            (ResourceId::Occupancy, Write(StorageWrite)),
            (ResourceId::AtlasBase, Write(StorageWrite)),
            (ResourceId::SurfaceStats, Write(StorageWrite)),
            (ResourceId::SurfaceList, Write(StorageWrite)),
            (ResourceId::SurfaceDispatch, Write(StorageWrite)),
        ])?;
        if mode == ReleaseMode::Listed {
            frame.declare(Stage::Compaction, cascade, &[
                (ResourceId::SurfaceList, Read(StorageRead)),
                (ResourceId::SurfaceDispatch, Read(IndirectArgument)),
            ])?;
        }
        frame.declare(Stage::Compaction, cascade, &[(ResourceId::AxisGrids, Release)])?;

        self.write_params(frame, cascade)?;

        let resources = frame.resources;
        let profiler = frame.profiler;
        let layout = *resources.layout();
        let stats = resources.buffer(resources.surface_stats)?;
        let dispatch = resources.buffer(resources.surface_dispatch)?;
        let timestamp_writes = profiler.and_then(|p| p.compute_pass_timestamp_writes(Stage::Compaction));

        let encoder = frame.recorder.encoder(Stage::Compaction.lane());
        // The merge phase accumulates `requested` atomically
        encoder.clear_buffer(stats, 0, None);

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("compaction_pass"),
            timestamp_writes,
        });

        let scan_offset = uniform_slot_offset(compact_slot(cascade, Axis::X));
        let groups = merge_groups(&layout);
        pass.set_pipeline(&self.merge_pipeline);
        pass.set_bind_group(0, &self.merge_bind_group, &[scan_offset]);
        pass.dispatch_workgroups(groups, groups, groups);

        pass.set_pipeline(&self.emit_pipeline);
        pass.set_bind_group(0, &self.emit_bind_group, &[scan_offset]);
        pass.dispatch_workgroups(1, 1, 1);

        match mode {
            ReleaseMode::Listed => {
                pass.set_pipeline(&self.release_sparse_pipeline);
                for axis in Axis::ALL {
                    let offset = uniform_slot_offset(compact_slot(cascade, axis));
                    pass.set_bind_group(0, &self.release_bind_groups[axis.index()], &[offset]);
                    pass.dispatch_workgroups_indirect(dispatch, 0);
                }
                pass.set_pipeline(&self.release_dense_pipeline);
                for axis in Axis::ALL {
                    let offset = uniform_slot_offset(compact_slot(cascade, axis));
                    pass.set_bind_group(0, &self.release_bind_groups[axis.index()], &[offset]);
                    pass.dispatch_workgroups_indirect(dispatch, SurfaceDispatch::DENSE_OFFSET);
                }
            }
            ReleaseMode::Dense => {
                let clear = DispatchIndirectCommand::for_groups(dense_clear_groups(&layout));
                pass.set_pipeline(&self.release_dense_pipeline);
                for axis in Axis::ALL {
                    let offset = uniform_slot_offset(compact_slot(cascade, axis));
                    pass.set_bind_group(0, &self.release_bind_groups[axis.index()], &[offset]);
                    pass.dispatch_workgroups(clear.x, clear.y, clear.z);
                }
            }
        }

        log::debug!(
            "Compaction cascade {}: {}^3 merge groups, capacity {}, {:?} release",
            cascade,
            groups,
            resources.surface_capacity(),
            mode
        );
        Ok(())
    }
}

fn merge_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    resources: &VoxelResources,
    params: &wgpu::Buffer,
) -> Result<wgpu::BindGroup> {
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: dynamic_uniform_binding::<CompactParams>(params),
    }];
    for axis in Axis::ALL {
        for attribute in Attribute::ALL {
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + axis.index() as u32 * 3 + attribute as u32,
                resource: wgpu::BindingResource::TextureView(resources.axis_view(axis, attribute)),
            });
        }
    }
    entries.push(wgpu::BindGroupEntry {
        binding: 10,
        resource: wgpu::BindingResource::TextureView(resources.atlas_mip_view(0)),
    });
    entries.push(wgpu::BindGroupEntry {
        binding: 11,
        resource: wgpu::BindingResource::TextureView(resources.occupancy_view()),
    });
    entries.push(wgpu::BindGroupEntry {
        binding: 12,
        resource: resources.buffer(resources.surface_stats)?.as_entire_binding(),
    });
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("compact_merge_bind_group"),
        layout,
        entries: &entries,
    }))
}

impl PipelineStage for CompactionPipeline {
    const STAGE: Stage = Stage::Compaction;

    fn build(ctx: &mut StageBuildContext<'_>) -> Result<Self> {
        let device = ctx.device;
        let merge_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("compact_merge_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/compact_merge.wgsl").into()),
        });
        let emit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("emit_surfaces_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/emit_surfaces.wgsl").into()),
        });
        let release_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("release_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/release.wgsl").into()),
        });

        let slots = ctx.resources.layout().cascade_count() * 3;
        let params = create_slot_buffer(device, &mut ctx.resources.registry, "compact_params", slots);

        let compute = wgpu::ShaderStages::COMPUTE;
        let sampled = wgpu::TextureSampleType::Float { filterable: false };

        let mut merge_entries = vec![dynamic_uniform_entry::<CompactParams>(0, compute)];
        // Axis grids: X albedo, normal, emission, then Y, then Z
        merge_entries.extend((1..=9).map(|binding| texture_3d_entry(binding, compute, sampled)));
        merge_entries.push(storage_texture_3d_entry(10, compute, VOXEL_FORMAT));
        merge_entries.push(storage_texture_3d_entry(11, compute, OCCUPANCY_FORMAT));
        merge_entries.push(storage_buffer_entry(12, false));
        let merge_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("compact_merge_layout"),
            entries: &merge_entries,
        });

        let emit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("emit_surfaces_layout"),
            entries: &[
                dynamic_uniform_entry::<CompactParams>(0, compute),
                texture_3d_entry(1, compute, wgpu::TextureSampleType::Uint),
                // Surface list
                storage_buffer_entry(2, false),
                // Stats
                storage_buffer_entry(3, false),
                // Indirect commands
                storage_buffer_entry(4, false),
            ],
        });

        let release_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("release_layout"),
            entries: &[
                dynamic_uniform_entry::<CompactParams>(0, compute),
                storage_buffer_entry(1, true),
                storage_buffer_entry(2, true),
                storage_texture_3d_entry(3, compute, VOXEL_FORMAT),
                storage_texture_3d_entry(4, compute, VOXEL_FORMAT),
                storage_texture_3d_entry(5, compute, VOXEL_FORMAT),
            ],
        });

        let resources = &*ctx.resources;
        let params_buffer = resources.buffer(params)?;
        let surface_list = resources.buffer(resources.surface_list)?;
        let surface_stats = resources.buffer(resources.surface_stats)?;
        let surface_dispatch = resources.buffer(resources.surface_dispatch)?;

        let merge_bind_group = merge_bind_group(device, &merge_layout, resources, params_buffer)?;

        let emit_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("emit_surfaces_bind_group"),
            layout: &emit_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: dynamic_uniform_binding::<CompactParams>(params_buffer) },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(resources.occupancy_view()),
                },
                wgpu::BindGroupEntry { binding: 2, resource: surface_list.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: surface_stats.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: surface_dispatch.as_entire_binding() },
            ],
        });

        let release_bind_groups = Axis::ALL
            .iter()
            .map(|&axis| {
                let [albedo, normal, emission] = resources.axis_views(axis);
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("release_bind_group"),
                    layout: &release_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: dynamic_uniform_binding::<CompactParams>(params_buffer),
                        },
                        wgpu::BindGroupEntry { binding: 1, resource: surface_list.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: surface_stats.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(albedo) },
                        wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(normal) },
                        wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(emission) },
                    ],
                })
            })
            .collect();

        let merge_pipeline = compute_pipeline(device, "compact_merge_pipeline", &merge_layout, &merge_shader, "main");
        let emit_pipeline = compute_pipeline(device, "emit_surfaces_pipeline", &emit_layout, &emit_shader, "main");
        let release_sparse_pipeline =
            compute_pipeline(device, "release_sparse_pipeline", &release_layout, &release_shader, "release_sparse");
        let release_dense_pipeline =
            compute_pipeline(device, "release_dense_pipeline", &release_layout, &release_shader, "release_dense");

        log::info!("Compaction pipeline ready ({} parameter slots)", slots);
        Ok(Self {
            merge_pipeline,
            emit_pipeline,
            release_sparse_pipeline,
            release_dense_pipeline,
            params,
            merge_bind_group,
            emit_bind_group,
            release_bind_groups,
        })
    }

    fn record(&self, frame: &mut FrameContext<'_>, cascade: u32) -> Result<()> {
        self.record_passes(frame, cascade, ReleaseMode::Listed)
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
        assert_eq!(std::mem::size_of::<CompactParams>(), 32);
    }

    #[test]
    fn test_params_content() {
        let layout = GridLayout::new(64, 3, 3, 2).unwrap();
        let p = CompactParams::new(&layout, 2, Axis::Y, 1000);
        assert_eq!(p.cascade, 2);
        assert_eq!(p.axis, 1);
        assert_eq!(p.capacity, 1000);
        assert_eq!(p.dense_groups, 8 * 8 * 8);
        assert_eq!(merge_groups(&layout), 8);
    }

    #[test]
    fn test_slots_are_distinct() {
        let mut slots: Vec<u32> = (0..4)
            .flat_map(|c| Axis::ALL.map(|a| compact_slot(c, a)))
            .collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), 12);
        assert_eq!(merge_groups(&GridLayout::new(4, 1, 1, 2).unwrap()), 1);
    }
}
