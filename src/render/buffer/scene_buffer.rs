//! GPU buffers for scene geometry, instance bounds and indirect draws

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::core::error::{CapacityError, Error};
use crate::core::types::Result;
use crate::math::Aabb;
use crate::render::registry::{BufferHandle, ResourceRegistry};
use crate::scene::{Material, MeshVertex, SceneGeometry};

/// Instance bounds read by cull.wgsl (32 bytes, w unused)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceAabb {
    pub center: [f32; 4],
    pub half_extent: [f32; 4],
}

impl InstanceAabb {
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            center: aabb.center().extend(0.0).to_array(),
            half_extent: aabb.half_extent().extend(0.0).to_array(),
        }
    }

    pub fn center(&self) -> Vec3 {
        Vec3::new(self.center[0], self.center[1], self.center[2])
    }

    pub fn half_extent(&self) -> Vec3 {
        Vec3::new(self.half_extent[0], self.half_extent[1], self.half_extent[2])
    }
}

/// wgpu `DrawIndexedIndirectArgs` layout (20 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    /// Written by culling: 1 visible, 0 culled
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    /// Always 0; non-zero first instance needs an optional feature
    pub first_instance: u32,
}

/// Compacted visible-instance record for an external box visualizer (32 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DebugBox {
    /// xyz center, w holds the instance index as a float
    pub center: [f32; 4],
    pub half_extent: [f32; 4],
}

impl DebugBox {
    pub fn instance_index(&self) -> u32 {
        self.center[3] as u32
    }
}

pub const DRAW_INDIRECT_STRIDE: u64 = std::mem::size_of::<DrawIndexedIndirect>() as u64;

/// Indirect draw templates, one per submesh, instance count zeroed
pub fn draw_templates(scene: &SceneGeometry) -> Vec<DrawIndexedIndirect> {
    scene
        .submeshes
        .iter()
        .map(|s| DrawIndexedIndirect {
            index_count: s.index_count,
            instance_count: 0,
            first_index: s.first_index,
            base_vertex: s.base_vertex,
            first_instance: 0,
        })
        .collect()
}

/// One bounds record per submesh
pub fn instance_aabbs(scene: &SceneGeometry) -> Vec<InstanceAabb> {
    scene.submeshes.iter().map(|s| InstanceAabb::from_aabb(&s.bounds)).collect()
}

/// Scene data uploaded for culling and voxelization
pub struct SceneBuffers {
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
    pub instances: BufferHandle,
    /// Indirect draw commands, culled in place
    pub draws: BufferHandle,
    /// Single atomic u32
    pub draw_count: BufferHandle,
    pub debug_boxes: BufferHandle,
    pub materials: BufferHandle,
    instance_count: u32,
    max_instances: u32,
    debug_box_capacity: u32,
}

impl SceneBuffers {
    /// Validate and upload `scene`. Instance, draw and debug buffers are
    /// sized for `max_instances` so instances can be replaced later.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        registry: &mut ResourceRegistry,
        scene: &SceneGeometry,
        max_instances: u32,
        max_materials: u32,
        debug_box_capacity: u32,
    ) -> Result<Self> {
        scene.validate(max_instances, max_materials)?;

        let slots = max_instances.max(1) as u64;

        // Zero-sized buffers cannot be bound
        let vertex_bytes: &[u8] = if scene.vertices.is_empty() {
            &[0; std::mem::size_of::<MeshVertex>()]
        } else {
            bytemuck::cast_slice(&scene.vertices)
        };
        let index_bytes: &[u8] = if scene.indices.is_empty() {
            &[0; 4]
        } else {
            bytemuck::cast_slice(&scene.indices)
        };

        let vertices = registry.create_buffer_init(device, "scene_vertices", vertex_bytes, wgpu::BufferUsages::VERTEX);
        let indices = registry.create_buffer_init(device, "scene_indices", index_bytes, wgpu::BufferUsages::INDEX);

        let instances = registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("instance_aabbs"),
            size: slots * std::mem::size_of::<InstanceAabb>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let draws = registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("indirect_draws"),
            size: slots * DRAW_INDIRECT_STRIDE,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let draw_count = registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("draw_count"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let debug_boxes = registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("debug_boxes"),
            size: debug_box_capacity.max(1) as u64 * std::mem::size_of::<DebugBox>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let materials = registry.create_buffer(device, &wgpu::BufferDescriptor {
            label: Some("materials"),
            size: max_materials.max(1) as u64 * std::mem::size_of::<Material>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if !scene.materials.is_empty() {
            queue.write_buffer(registry.buffer(materials)?, 0, bytemuck::cast_slice(&scene.materials));
        }

        let mut buffers = Self {
            vertices,
            indices,
            instances,
            draws,
            draw_count,
            debug_boxes,
            materials,
            instance_count: 0,
            max_instances,
            debug_box_capacity,
        };
        buffers.write_instances(queue, registry, &instance_aabbs(scene), &draw_templates(scene))?;

        log::info!(
            "Uploaded scene: {} vertices, {} triangles, {} submeshes, {} materials",
            scene.vertices.len(),
            scene.triangle_count(),
            scene.submeshes.len(),
            scene.materials.len()
        );
        Ok(buffers)
    }

    /// Replace the instance bounds and draw templates
    pub fn write_instances(
        &mut self,
        queue: &wgpu::Queue,
        registry: &ResourceRegistry,
        instances: &[InstanceAabb],
        templates: &[DrawIndexedIndirect],
    ) -> Result<()> {
        CapacityError::check("instances", instances.len(), self.max_instances as usize)?;
        if templates.len() != instances.len() {
            return Err(Error::Config(format!(
                "{} draw templates for {} instances",
                templates.len(),
                instances.len()
            )));
        }
        if !instances.is_empty() {
            queue.write_buffer(registry.buffer(self.instances)?, 0, bytemuck::cast_slice(instances));
            queue.write_buffer(registry.buffer(self.draws)?, 0, bytemuck::cast_slice(templates));
        }
        self.instance_count = instances.len() as u32;
        Ok(())
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn debug_box_capacity(&self) -> u32 {
        self.debug_box_capacity
    }
}
