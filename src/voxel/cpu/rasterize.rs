//! Reference voxelization, mirrors the three axis passes of `voxelize.wgsl`
//!
//! Pixel centers sit at `(i + 0.5) / extent` in each screen axis and a pixel
//! is covered when it lies inside or on the triangle's edges. Only the
//! triangle's dominant axis pass writes, and fragments outside the depth
//! range are clipped.

use std::collections::BTreeSet;

use glam::{UVec3, Vec2, Vec3};

use crate::math::{Aabb, Axis, AxisProjection};
use crate::render::buffer::DrawIndexedIndirect;
use crate::scene::{Material, MeshVertex, SceneGeometry};
use crate::voxel::grid::{encode_unorm8, AxisGrids, VoxelSample};

/// Set of `(axis, cell)` pairs some fragment wrote
pub type TouchedCells = BTreeSet<(usize, [u32; 3])>;

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

/// Fragment attributes for one covered pixel
fn shade(tri: &[MeshVertex; 3], bary: Vec3, material: &Material) -> VoxelSample {
    let n = tri[0].normal() * bary.x + tri[1].normal() * bary.y + tri[2].normal() * bary.z;
    let n = n.normalize_or_zero();
    VoxelSample {
        albedo: encode_unorm8(material.albedo()),
        normal: encode_unorm8((n * 0.5 + Vec3::splat(0.5)).extend(1.0)),
        emission: encode_unorm8(material.emission().truncate().extend(1.0)),
    }
}

/// Rasterize one triangle into the grid of its dominant axis
pub fn voxelize_triangle(
    grids: &mut AxisGrids,
    projections: &[AxisProjection; 3],
    tri: &[MeshVertex; 3],
    material: &Material,
    touched: &mut TouchedCells,
) {
    if material.albedo[3] <= 0.0 {
        return;
    }
    let [p0, p1, p2] = tri.map(|v| v.position());
    let face = (p1 - p0).cross(p2 - p0);
    if face == Vec3::ZERO {
        return;
    }
    let axis = Axis::dominant(face);
    let vp = projections[axis.index()].view_projection();
    let ndc = [p0, p1, p2].map(|p| vp.project_point3(p));
    let screen = ndc.map(|p| Vec2::new(p.x, p.y));

    let mut area = edge(screen[0], screen[1], screen[2]);
    if area == 0.0 {
        return;
    }
    // Orientation-independent coverage
    let (s1, s2) = if area < 0.0 {
        area = -area;
        (screen[2], screen[1])
    } else {
        (screen[1], screen[2])
    };
    let flipped = s1 != screen[1];

    let layout = grids.layout;
    let extent = layout.raster_extent();
    let scalar = layout.axis_scalar();
    let g = layout.grid_size();
    let to_pixel = |x: f32| (x + 1.0) * 0.5 * extent as f32;

    let lo = screen.iter().fold(Vec2::splat(f32::MAX), |m, s| m.min(*s));
    let hi = screen.iter().fold(Vec2::splat(f32::MIN), |m, s| m.max(*s));
    let u0 = (to_pixel(lo.x) - 0.5).ceil().max(0.0) as u32;
    let v0 = (to_pixel(lo.y) - 0.5).ceil().max(0.0) as u32;
    let u1 = ((to_pixel(hi.x) - 0.5).floor()).min(extent as f32 - 1.0);
    let v1 = ((to_pixel(hi.y) - 0.5).floor()).min(extent as f32 - 1.0);
    if u1 < 0.0 || v1 < 0.0 {
        return;
    }
    let (u1, v1) = (u1 as u32, v1 as u32);

    for v in v0..=v1 {
        for u in u0..=u1 {
            let p = Vec2::new(
                (u as f32 + 0.5) / extent as f32 * 2.0 - 1.0,
                (v as f32 + 0.5) / extent as f32 * 2.0 - 1.0,
            );
            let w0 = edge(s1, s2, p);
            let w1 = edge(s2, screen[0], p);
            let w2 = edge(screen[0], s1, p);
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let mut bary = Vec3::new(w0, w1, w2) / area;
            if flipped {
                bary = Vec3::new(bary.x, bary.z, bary.y);
            }
            let z = ndc[0].z * bary.x + ndc[1].z * bary.y + ndc[2].z * bary.z;
            if !(0.0..=1.0).contains(&z) {
                continue;
            }
            let depth = ((z * g as f32).floor() as u32).min(g - 1);
            let texel = UVec3::new(depth, u, v);
            grids.axis_mut(axis).store(texel, shade(tri, bary, material));

            let cell = axis.rotated_to_cell(UVec3::new(depth, u / scalar, v / scalar));
            touched.insert((axis.index(), cell.to_array()));
        }
    }
}

/// Voxelize every submesh whose indirect draw survived culling
pub fn voxelize_scene(
    grids: &mut AxisGrids,
    region: &Aabb,
    scene: &SceneGeometry,
    draws: &[DrawIndexedIndirect],
) -> TouchedCells {
    let projections = AxisProjection::all(region);
    let mut touched = TouchedCells::new();
    for (i, draw) in draws.iter().enumerate() {
        if draw.instance_count == 0 {
            continue;
        }
        for tri in scene.triangles(i) {
            let material = scene.materials[tri[0].material as usize];
            voxelize_triangle(grids, &projections, &tri, &material, &mut touched);
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::layout::GridLayout;

    fn setup() -> (AxisGrids, [AxisProjection; 3], Aabb) {
        let layout = GridLayout::new(8, 1, 1, 2).unwrap();
        let region = Aabb::cube(Vec3::ZERO, 8.0);
        (AxisGrids::new(layout), AxisProjection::all(&region), region)
    }

    fn tri(points: [Vec3; 3]) -> [MeshVertex; 3] {
        let n = (points[1] - points[0]).cross(points[2] - points[0]).normalize();
        points.map(|p| MeshVertex::new(p, n, [0.0, 0.0], 0))
    }

    #[test]
    fn test_triangle_writes_only_dominant_axis() {
        let (mut grids, proj, _) = setup();
        let mut touched = TouchedCells::new();
        // Facing +Z, slightly tilted
        let t = tri([Vec3::new(-3.0, -3.0, 0.3), Vec3::new(3.0, -3.0, 0.5), Vec3::new(-3.0, 3.0, 0.4)]);
        voxelize_triangle(&mut grids, &proj, &t, &Material::diffuse(Vec3::ONE), &mut touched);

        assert!(!touched.is_empty());
        assert!(touched.iter().all(|(axis, _)| *axis == Axis::Z.index()));
        assert!(grids.axis(Axis::X).is_clear());
        assert!(grids.axis(Axis::Y).is_clear());
        assert!(!grids.axis(Axis::Z).is_clear());
        // world z in [0.3, 0.5] with 1-unit cells from -4 lands in cell 4
        assert!(touched.iter().all(|(_, c)| c[2] == 4));
    }

    #[test]
    fn test_cell_coordinates_follow_world_axes() {
        let (mut grids, proj, _) = setup();
        let mut touched = TouchedCells::new();
        // Small triangle inside world cell (5, 2, 6) facing +X
        let base = Vec3::new(1.5, -1.8, 2.2);
        let t = tri([base, base + Vec3::new(0.0, 0.6, 0.0), base + Vec3::new(0.0, 0.0, 0.6)]);
        voxelize_triangle(&mut grids, &proj, &t, &Material::diffuse(Vec3::ONE), &mut touched);
        let cells: Vec<[u32; 3]> = touched.iter().map(|(_, c)| *c).collect();
        assert!(!cells.is_empty());
        assert!(cells.iter().all(|c| *c == [5, 2, 6]), "{cells:?}");
    }

    #[test]
    fn test_transparent_material_writes_nothing() {
        let (mut grids, proj, _) = setup();
        let mut touched = TouchedCells::new();
        let t = tri([Vec3::new(-3.0, -3.0, 0.0), Vec3::new(3.0, -3.0, 0.0), Vec3::new(-3.0, 3.0, 0.0)]);
        let glass = Material::diffuse(Vec3::ONE).with_opacity(0.0);
        voxelize_triangle(&mut grids, &proj, &t, &glass, &mut touched);
        assert!(touched.is_empty());
        assert!(grids.is_clear());
    }

    #[test]
    fn test_outside_region_is_clipped() {
        let (mut grids, proj, _) = setup();
        let mut touched = TouchedCells::new();
        let t = tri([Vec3::new(-3.0, -3.0, 9.0), Vec3::new(3.0, -3.0, 9.0), Vec3::new(-3.0, 3.0, 9.0)]);
        voxelize_triangle(&mut grids, &proj, &t, &Material::diffuse(Vec3::ONE), &mut touched);
        assert!(touched.is_empty());
    }

    #[test]
    fn test_winding_does_not_change_coverage() {
        let (mut a, proj, _) = setup();
        let (mut b, _, _) = setup();
        let pts = [Vec3::new(-2.2, -1.1, 0.7), Vec3::new(2.9, -2.6, 0.2), Vec3::new(0.4, 3.1, -0.6)];
        let mut ta = TouchedCells::new();
        let mut tb = TouchedCells::new();
        voxelize_triangle(&mut a, &proj, &tri(pts), &Material::diffuse(Vec3::ONE), &mut ta);
        voxelize_triangle(&mut b, &proj, &tri([pts[0], pts[2], pts[1]]), &Material::diffuse(Vec3::ONE), &mut tb);
        assert_eq!(ta, tb);
    }
}
