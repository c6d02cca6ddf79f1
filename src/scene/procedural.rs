//! Procedural test scenes

use glam::Vec3;

use crate::scene::geometry::{Material, MeshVertex, SceneGeometry};

/// Two-triangle quad from four counter-clockwise corners
pub fn quad(scene: &mut SceneGeometry, corners: [Vec3; 4], material: u32) -> usize {
    let normal = (corners[1] - corners[0]).cross(corners[3] - corners[0]).normalize_or_zero();
    let uv = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
    let verts: Vec<MeshVertex> = corners
        .iter()
        .zip(uv)
        .map(|(&p, uv)| MeshVertex::new(p, normal, uv, material))
        .collect();
    scene.add_mesh(&verts, &[0, 1, 2, 0, 2, 3])
}

/// Single triangle with its face normal
pub fn triangle(scene: &mut SceneGeometry, points: [Vec3; 3], material: u32) -> usize {
    let normal = (points[1] - points[0]).cross(points[2] - points[0]).normalize_or_zero();
    let uv = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
    let verts: Vec<MeshVertex> = points
        .iter()
        .zip(uv)
        .map(|(&p, uv)| MeshVertex::new(p, normal, uv, material))
        .collect();
    scene.add_mesh(&verts, &[0, 1, 2])
}

/// Axis-aligned box with outward faces as one submesh
pub fn cuboid(scene: &mut SceneGeometry, min: Vec3, max: Vec3, material: u32) -> usize {
    let c = |x: bool, y: bool, z: bool| {
        Vec3::new(if x { max.x } else { min.x }, if y { max.y } else { min.y }, if z { max.z } else { min.z })
    };
    // Counter-clockwise seen from outside
    let faces = [
        ([c(true, false, false), c(true, true, false), c(true, true, true), c(true, false, true)], Vec3::X),
        ([c(false, false, false), c(false, false, true), c(false, true, true), c(false, true, false)], Vec3::NEG_X),
        ([c(false, true, false), c(false, true, true), c(true, true, true), c(true, true, false)], Vec3::Y),
        ([c(false, false, false), c(true, false, false), c(true, false, true), c(false, false, true)], Vec3::NEG_Y),
        ([c(false, false, true), c(true, false, true), c(true, true, true), c(false, true, true)], Vec3::Z),
        ([c(false, false, false), c(false, true, false), c(true, true, false), c(true, false, false)], Vec3::NEG_Z),
    ];

    let mut verts = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    let uv = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
    for (corners, normal) in faces {
        let base = verts.len() as u32;
        verts.extend(corners.iter().zip(uv).map(|(&p, uv)| MeshVertex::new(p, normal, uv, material)));
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    scene.add_mesh(&verts, &indices)
}

/// Cornell box of edge `size` centered on the origin: white floor, ceiling
/// and back wall, red left wall, green right wall, an emissive ceiling
/// panel and two white blocks. Open towards +Z.
pub fn cornell_box(size: f32) -> SceneGeometry {
    let mut scene = SceneGeometry::new();
    let white = scene.add_material(Material::diffuse(Vec3::splat(0.73)));
    let red = scene.add_material(Material::diffuse(Vec3::new(0.65, 0.05, 0.05)));
    let green = scene.add_material(Material::diffuse(Vec3::new(0.12, 0.45, 0.15)));
    let light = scene.add_material(Material::emissive(Vec3::ONE, Vec3::splat(1.0)));

    let h = size * 0.5;
    let p = |x: f32, y: f32, z: f32| Vec3::new(x, y, z) * h;

    // floor, facing +Y
    quad(&mut scene, [p(-1.0, -1.0, -1.0), p(-1.0, -1.0, 1.0), p(1.0, -1.0, 1.0), p(1.0, -1.0, -1.0)], white);
    // ceiling, facing -Y
    quad(&mut scene, [p(-1.0, 1.0, -1.0), p(1.0, 1.0, -1.0), p(1.0, 1.0, 1.0), p(-1.0, 1.0, 1.0)], white);
    // back wall, facing +Z
    quad(&mut scene, [p(-1.0, -1.0, -1.0), p(1.0, -1.0, -1.0), p(1.0, 1.0, -1.0), p(-1.0, 1.0, -1.0)], white);
    // left wall, facing +X
    quad(&mut scene, [p(-1.0, -1.0, -1.0), p(-1.0, 1.0, -1.0), p(-1.0, 1.0, 1.0), p(-1.0, -1.0, 1.0)], red);
    // right wall, facing -X
    quad(&mut scene, [p(1.0, -1.0, -1.0), p(1.0, -1.0, 1.0), p(1.0, 1.0, 1.0), p(1.0, 1.0, -1.0)], green);
    // light panel just below the ceiling, facing -Y
    let l = 0.25;
    let y = 0.98;
    quad(&mut scene, [p(-l, y, -l), p(l, y, -l), p(l, y, l), p(-l, y, l)], light);

    cuboid(&mut scene, p(-0.6, -1.0, -0.6), p(-0.05, 0.2, -0.05), white);
    cuboid(&mut scene, p(0.1, -1.0, 0.0), p(0.6, -0.4, 0.5), white);

    scene
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_normal(tri: &[MeshVertex; 3]) -> Vec3 {
        let [a, b, c] = tri.map(|v| v.position());
        (b - a).cross(c - a).normalize()
    }

    #[test]
    fn test_cuboid_winding_matches_normals() {
        let mut scene = SceneGeometry::new();
        scene.add_material(Material::diffuse(Vec3::ONE));
        let sub = cuboid(&mut scene, Vec3::splat(-1.0), Vec3::ONE, 0);
        assert_eq!(scene.triangles(sub).count(), 12);
        for tri in scene.triangles(sub) {
            let geometric = face_normal(&tri);
            assert!(geometric.dot(tri[0].normal()) > 0.99, "winding disagrees with normal");
            // outward
            assert!(geometric.dot(tri[0].position()) > 0.0);
        }
    }

    #[test]
    fn test_quad_normal_follows_winding() {
        let mut scene = SceneGeometry::new();
        scene.add_material(Material::diffuse(Vec3::ONE));
        let sub = quad(&mut scene, [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y], 0);
        for tri in scene.triangles(sub) {
            assert!((face_normal(&tri) - Vec3::Z).length() < 1e-6);
        }
    }

    #[test]
    fn test_cornell_box_is_valid_and_bounded() {
        let scene = cornell_box(4.0);
        assert!(scene.validate(64, 16).is_ok());
        assert_eq!(scene.submeshes.len(), 8);
        let bounds = scene.bounds();
        assert_eq!(bounds.min, Vec3::splat(-2.0));
        assert_eq!(bounds.max, Vec3::splat(2.0));
        assert!(scene.materials.iter().any(|m| m.emission[0] > 0.0));
    }
}
