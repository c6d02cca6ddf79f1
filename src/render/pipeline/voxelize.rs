//! Multi-axis voxelization render pipeline
//!
//! Each cascade is rasterized three times with orthographic projections down
//! X, Y and Z. The fragment stage keeps only fragments of triangles whose
//! dominant axis is the pass axis and stores their attributes straight into
//! that axis' isotropic grid. There is no depth buffer; the colour target
//! exists only because a render pass needs an attachment and is never
//! written.

use bytemuck::{Pod, Zeroable};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::{Axis, AxisProjection};
use crate::render::buffer::DRAW_INDIRECT_STRIDE;
use crate::render::pipeline::{
    create_slot_buffer, dynamic_uniform_binding, dynamic_uniform_entry, storage_texture_3d_entry,
    uniform_slot_offset, FrameContext, PipelineStage, Stage, StageBuildContext,
};
use crate::render::registry::{BufferHandle, ResourceRegistry, TextureHandle};
use crate::render::resources::VOXEL_FORMAT;
use crate::render::sync::{Access, ResourceId, ResourceState};
use crate::scene::MeshVertex;
use crate::voxel::layout::GridLayout;

const DUMMY_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

/// Per `(cascade, axis)` pass parameters (80 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VoxelizeParams {
    pub view_projection: [[f32; 4]; 4],
    pub grid_size: u32,
    pub axis: u32,
    pub raster_extent: u32,
    pub _pad: u32,
}

impl VoxelizeParams {
    pub fn new(layout: &GridLayout, projection: &AxisProjection) -> Self {
        Self {
            view_projection: projection.view_projection().to_cols_array_2d(),
            grid_size: layout.grid_size(),
            axis: projection.axis.index() as u32,
            raster_extent: layout.raster_extent(),
            _pad: 0,
        }
    }
}

/// Uniform slot of one axis pass
pub fn pass_slot(cascade: u32, axis: Axis) -> u32 {
    cascade * 3 + axis.index() as u32
}

/// Vertex buffer layout of [`MeshVertex`]. Texcoord, tangent and bitangent
/// are not read by the voxelizer.
pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] = [
        // position
        wgpu::VertexAttribute { format: wgpu::VertexFormat::Float32x3, offset: 0, shader_location: 0 },
        // normal
        wgpu::VertexAttribute { format: wgpu::VertexFormat::Float32x3, offset: 20, shader_location: 1 },
        // material
        wgpu::VertexAttribute { format: wgpu::VertexFormat::Uint32, offset: 56, shader_location: 2 },
    ];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<MeshVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

/// Voxelization render pipeline
pub struct VoxelizePipeline {
    pipeline: wgpu::RenderPipeline,
    params: BufferHandle,
    target: TextureHandle,
    target_view: wgpu::TextureView,
    scene_bind_group: wgpu::BindGroup,
    /// One per axis: the three attribute textures of that axis grid
    grid_bind_groups: Vec<wgpu::BindGroup>,
}

impl PipelineStage for VoxelizePipeline {
    const STAGE: Stage = Stage::Voxelization;

    fn build(ctx: &mut StageBuildContext<'_>) -> Result<Self> {
        let device = ctx.device;
        let layout = *ctx.resources.layout();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("voxelize_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/voxelize.wgsl").into()),
        });

        let registry = &mut ctx.resources.registry;
        let params = create_slot_buffer(device, registry, "voxelize_params", layout.cascade_count() * 3);
        let extent = layout.raster_extent();
        let target = registry.create_texture(device, &wgpu::TextureDescriptor {
            label: Some("voxelize_dummy_target"),
            size: wgpu::Extent3d { width: extent, height: extent, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DUMMY_TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let resources = &*ctx.resources;
        let target_view = resources.registry.texture(target)?.create_view(&wgpu::TextureViewDescriptor::default());

        // Bind group 0: pass params + material table
        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxelize_scene_layout"),
            entries: &[
                dynamic_uniform_entry::<VoxelizeParams>(
                    0,
                    wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("voxelize_scene_bind_group"),
            layout: &scene_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dynamic_uniform_binding::<VoxelizeParams>(resources.buffer(params)?),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: resources.buffer(ctx.scene.materials)?.as_entire_binding(),
                },
            ],
        });

        // Bind group 1: albedo, normal, emission of the pass axis
        let grid_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxelize_grid_layout"),
            entries: &[
                storage_texture_3d_entry(0, wgpu::ShaderStages::FRAGMENT, VOXEL_FORMAT),
                storage_texture_3d_entry(1, wgpu::ShaderStages::FRAGMENT, VOXEL_FORMAT),
                storage_texture_3d_entry(2, wgpu::ShaderStages::FRAGMENT, VOXEL_FORMAT),
            ],
        });

        let grid_bind_groups = Axis::ALL
            .iter()
            .map(|&axis| {
                let [albedo, normal, emission] = resources.axis_views(axis);
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("voxelize_grid_bind_group"),
                    layout: &grid_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(albedo) },
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(normal) },
                        wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(emission) },
                    ],
                })
            })
            .collect();

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("voxelize_pipeline_layout"),
            bind_group_layouts: &[&scene_layout, &grid_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("voxelize_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: DUMMY_TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::empty(),
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Both windings are voxelized
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        log::info!(
            "Voxelize pipeline ready ({}x{} raster, {} pass slots)",
            extent,
            extent,
            layout.cascade_count() * 3
        );
        Ok(Self { pipeline, params, target, target_view, scene_bind_group, grid_bind_groups })
    }

    fn record(&self, frame: &mut FrameContext<'_>, cascade: u32) -> Result<()> {
        use Access::*;
        use ResourceState::*;

        let region = frame
            .tracker
            .region(cascade)
            .ok_or_else(|| Error::Config(format!("Cascade {cascade} has no region yet")))?;

        frame.declare(Stage::Voxelization, cascade, &[
            (ResourceId::IndirectDraws, Read(IndirectArgument)),
            (ResourceId::AxisGrids, Write(StorageWrite)),
        ])?;

        let resources = frame.resources;
        let scene = frame.scene;
        let profiler = frame.profiler;
        let layout = *resources.layout();
        let params_buffer = resources.buffer(self.params)?;
        for projection in AxisProjection::all(&region) {
            let slot = pass_slot(cascade, projection.axis);
            let params = VoxelizeParams::new(&layout, &projection);
            frame
                .queue
                .write_buffer(params_buffer, uniform_slot_offset(slot) as u64, bytemuck::bytes_of(&params));
        }

        let vertices = resources.buffer(scene.vertices)?;
        let indices = resources.buffer(scene.indices)?;
        let draws = resources.buffer(scene.draws)?;
        let draw_count = scene.instance_count();

        let encoder = frame.recorder.encoder(Stage::Voxelization.lane());
        for axis in Axis::ALL {
            let timestamp_writes = profiler.and_then(|p| {
                p.render_pass_timestamp_writes(Stage::Voxelization, axis == Axis::X, axis == Axis::Z)
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("voxelize_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Discard,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.scene_bind_group, &[uniform_slot_offset(pass_slot(cascade, axis))]);
            pass.set_bind_group(1, &self.grid_bind_groups[axis.index()], &[]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
            // Culled entries carry an instance count of 0
            for draw in 0..draw_count {
                pass.draw_indexed_indirect(draws, draw as u64 * DRAW_INDIRECT_STRIDE);
            }
        }

        log::debug!("Voxelize cascade {}: 3 axis passes, {} indirect draws each", cascade, draw_count);
        Ok(())
    }

    fn destroy(self, registry: &mut ResourceRegistry) -> Result<()> {
        drop(self.target_view);
        registry.release_texture(self.target)?;
        registry.release_buffer(self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Aabb;
    use glam::Vec3;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<VoxelizeParams>(), 80);
    }

    #[test]
    fn test_vertex_layout_matches_mesh_vertex() {
        let layout = vertex_layout();
        assert_eq!(layout.array_stride, 60);
        assert_eq!(std::mem::offset_of!(MeshVertex, normal), 20);
        assert_eq!(std::mem::offset_of!(MeshVertex, material), 56);
    }

    #[test]
    fn test_pass_slots_are_distinct() {
        let mut slots: Vec<u32> = (0..3).flat_map(|c| Axis::ALL.map(|a| pass_slot(c, a))).collect();
        slots.sort();
        slots.dedup();
        assert_eq!(slots, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_params_carry_axis_and_extent() {
        let layout = GridLayout::new(64, 3, 3, 2).unwrap();
        let projection = AxisProjection::new(Axis::Y, &Aabb::cube(Vec3::ZERO, 6.0));
        let params = VoxelizeParams::new(&layout, &projection);
        assert_eq!(params.axis, 1);
        assert_eq!(params.raster_extent, 128);
        assert_eq!(params.grid_size, 64);
    }
}
