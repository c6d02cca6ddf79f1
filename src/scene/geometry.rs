//! Triangle geometry handed to the voxelizer

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::core::error::{CapacityError, Error};
use crate::core::types::Result;
use crate::math::Aabb;

/// Packed vertex (60 bytes, matches `VertexInput` in voxelize.wgsl)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
    /// Index into the material table
    pub material: u32,
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, texcoord: [f32; 2], material: u32) -> Self {
        let normal = normal.normalize_or_zero();
        let tangent = if normal == Vec3::ZERO { Vec3::X } else { normal.any_orthonormal_vector() };
        let bitangent = normal.cross(tangent);
        Self {
            position: position.to_array(),
            texcoord,
            normal: normal.to_array(),
            tangent: tangent.to_array(),
            bitangent: bitangent.to_array(),
            material,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

/// Surface properties sampled by the voxelizer (32 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Material {
    /// Linear albedo, alpha is opacity
    pub albedo: [f32; 4],
    /// Emitted radiance, alpha unused
    pub emission: [f32; 4],
}

impl Material {
    pub fn diffuse(albedo: Vec3) -> Self {
        Self { albedo: albedo.extend(1.0).to_array(), emission: [0.0; 4] }
    }

    pub fn emissive(albedo: Vec3, emission: Vec3) -> Self {
        Self { albedo: albedo.extend(1.0).to_array(), emission: emission.extend(0.0).to_array() }
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.albedo[3] = opacity;
        self
    }

    pub fn albedo(&self) -> Vec4 {
        Vec4::from_array(self.albedo)
    }

    pub fn emission(&self) -> Vec4 {
        Vec4::from_array(self.emission)
    }
}

/// A contiguous index range drawn with one indirect command
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Submesh {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    /// World-space bounds of the referenced vertices
    pub bounds: Aabb,
}

/// Flattened scene: one vertex stream, one index stream, many submeshes
#[derive(Clone, Debug, Default)]
pub struct SceneGeometry {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<Submesh>,
    pub materials: Vec<Material>,
}

impl SceneGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: Material) -> u32 {
        self.materials.push(material);
        (self.materials.len() - 1) as u32
    }

    /// Append a mesh as a new submesh; indices are local to `vertices`
    pub fn add_mesh(&mut self, vertices: &[MeshVertex], indices: &[u32]) -> usize {
        let base_vertex = self.vertices.len() as i32;
        let first_index = self.indices.len() as u32;
        let bounds = Aabb::from_points(indices.iter().filter_map(|&i| vertices.get(i as usize)).map(MeshVertex::position));

        self.vertices.extend_from_slice(vertices);
        self.indices.extend_from_slice(indices);
        self.submeshes.push(Submesh {
            first_index,
            index_count: indices.len() as u32,
            base_vertex,
            bounds,
        });
        self.submeshes.len() - 1
    }

    /// Append every submesh of `other`, remapping material indices
    pub fn append(&mut self, other: &SceneGeometry) {
        let material_base = self.materials.len() as u32;
        self.materials.extend_from_slice(&other.materials);
        for sub in &other.submeshes {
            let start = sub.first_index as usize;
            let end = start + sub.index_count as usize;
            let base = sub.base_vertex as usize;
            let used = other.indices[start..end].iter().max().map_or(0, |&m| m as usize + 1);
            let verts: Vec<MeshVertex> = other.vertices[base..base + used]
                .iter()
                .map(|v| MeshVertex { material: v.material + material_base, ..*v })
                .collect();
            self.add_mesh(&verts, &other.indices[start..end]);
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Triangles of one submesh as resolved vertices
    pub fn triangles(&self, submesh: usize) -> impl Iterator<Item = [MeshVertex; 3]> + '_ {
        let sub = self.submeshes[submesh];
        let range = sub.first_index as usize..(sub.first_index + sub.index_count) as usize;
        self.indices[range].chunks_exact(3).map(move |tri| {
            let v = |i: u32| self.vertices[(sub.base_vertex + i as i32) as usize];
            [v(tri[0]), v(tri[1]), v(tri[2])]
        })
    }

    /// Check index ranges, material references and upload capacities
    pub fn validate(&self, max_instances: u32, max_materials: u32) -> Result<()> {
        CapacityError::check("instances", self.submeshes.len(), max_instances as usize)?;
        CapacityError::check("materials", self.materials.len(), max_materials as usize)?;

        if self.indices.len() % 3 != 0 {
            return Err(Error::Config(format!("index count {} is not a multiple of 3", self.indices.len())));
        }
        for (i, sub) in self.submeshes.iter().enumerate() {
            let end = sub.first_index as usize + sub.index_count as usize;
            if end > self.indices.len() || sub.index_count % 3 != 0 {
                return Err(Error::Config(format!("submesh {} has an invalid index range", i)));
            }
            for &idx in &self.indices[sub.first_index as usize..end] {
                let v = sub.base_vertex as i64 + idx as i64;
                if v < 0 || v as usize >= self.vertices.len() {
                    return Err(Error::Config(format!("submesh {} references vertex {} out of range", i, v)));
                }
            }
        }
        if let Some(v) = self.vertices.iter().find(|v| v.material as usize >= self.materials.len()) {
            return Err(Error::Config(format!("vertex references missing material {}", v.material)));
        }
        Ok(())
    }

    /// Bounds of every submesh
    pub fn bounds(&self) -> Aabb {
        self.submeshes
            .iter()
            .map(|s| s.bounds)
            .reduce(|a, b| a.merged(&b))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(material: u32) -> ([MeshVertex; 3], [u32; 3]) {
        let v = |p: Vec3| MeshVertex::new(p, Vec3::Z, [0.0, 0.0], material);
        ([v(Vec3::ZERO), v(Vec3::X), v(Vec3::Y)], [0, 1, 2])
    }

    #[test]
    fn test_struct_sizes() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 60);
        assert_eq!(std::mem::size_of::<Material>(), 32);
    }

    #[test]
    fn test_add_mesh_tracks_ranges_and_bounds() {
        let mut scene = SceneGeometry::new();
        scene.add_material(Material::diffuse(Vec3::ONE));
        let (verts, idx) = triangle(0);
        scene.add_mesh(&verts, &idx);
        scene.add_mesh(&verts, &idx);

        assert_eq!(scene.submeshes[1].first_index, 3);
        assert_eq!(scene.submeshes[1].base_vertex, 3);
        assert_eq!(scene.submeshes[0].bounds.max, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(scene.triangles(1).count(), 1);
        assert!(scene.validate(16, 16).is_ok());
    }

    #[test]
    fn test_validate_capacity() {
        let mut scene = SceneGeometry::new();
        scene.add_material(Material::diffuse(Vec3::ONE));
        let (verts, idx) = triangle(0);
        for _ in 0..3 {
            scene.add_mesh(&verts, &idx);
        }
        let err = scene.validate(2, 16).unwrap_err();
        assert!(matches!(err, Error::Capacity(CapacityError { what: "instances", requested: 3, capacity: 2 })));
        assert!(matches!(scene.validate(16, 0), Err(Error::Capacity(_))));
    }

    #[test]
    fn test_validate_rejects_missing_material() {
        let mut scene = SceneGeometry::new();
        let (verts, idx) = triangle(4);
        scene.add_mesh(&verts, &idx);
        assert!(matches!(scene.validate(16, 16), Err(Error::Config(_))));
    }

    #[test]
    fn test_append_remaps_materials() {
        let mut a = SceneGeometry::new();
        a.add_material(Material::diffuse(Vec3::X));
        let mut b = SceneGeometry::new();
        b.add_material(Material::diffuse(Vec3::Y));
        let (verts, idx) = triangle(0);
        b.add_mesh(&verts, &idx);

        a.append(&b);
        assert_eq!(a.materials.len(), 2);
        assert!(a.vertices.iter().all(|v| v.material == 1));
        assert!(a.validate(16, 16).is_ok());
    }
}
