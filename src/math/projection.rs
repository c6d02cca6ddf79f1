//! Per-axis orthographic projections used by the voxelization passes
//!
//! Each cascade region is rasterized three times, once looking down each
//! cardinal axis from the region's min face towards its max face. The
//! up vectors are picked so screen u/v always map to positive world axes:
//!
//! | axis | forward | up  | screen u | screen v | grid plane |
//! |------|---------|-----|----------|----------|------------|
//! | X    | +X      | +Y  | +Z       | +Y       | YZ         |
//! | Y    | +Y      | +Z  | +X       | +Z       | XZ         |
//! | Z    | +Z      | +X  | +Y       | +X       | XY         |

use glam::{Mat4, UVec3, Vec3};

use crate::math::Aabb;

/// Cardinal projection axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Axis> {
        Self::ALL.get(index).copied()
    }

    /// Unit vector along the axis
    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }

    /// Camera up vector for this axis' view
    fn up(self) -> Vec3 {
        match self {
            Axis::X => Vec3::Y,
            Axis::Y => Vec3::Z,
            Axis::Z => Vec3::X,
        }
    }

    /// Axis most aligned with `normal`. Ties go to the lower axis, the
    /// same rule `voxelize.wgsl` applies.
    pub fn dominant(normal: Vec3) -> Axis {
        let a = normal.abs();
        if a.x >= a.y && a.x >= a.z {
            Axis::X
        } else if a.y >= a.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    /// World cell `(x, y, z)` to axis-rotated `(depth, u, v)`
    pub fn cell_to_rotated(self, cell: UVec3) -> UVec3 {
        match self {
            Axis::X => UVec3::new(cell.x, cell.z, cell.y),
            Axis::Y => UVec3::new(cell.y, cell.x, cell.z),
            Axis::Z => UVec3::new(cell.z, cell.y, cell.x),
        }
    }

    /// Axis-rotated `(depth, u, v)` back to world cell `(x, y, z)`
    pub fn rotated_to_cell(self, rotated: UVec3) -> UVec3 {
        match self {
            Axis::X => UVec3::new(rotated.x, rotated.z, rotated.y),
            Axis::Y => UVec3::new(rotated.y, rotated.x, rotated.z),
            Axis::Z => UVec3::new(rotated.z, rotated.y, rotated.x),
        }
    }
}

/// Orthographic view-projection looking down one axis of a cascade region
#[derive(Clone, Copy, Debug)]
pub struct AxisProjection {
    pub axis: Axis,
    pub view: Mat4,
    pub projection: Mat4,
}

impl AxisProjection {
    /// Build the projection for `axis` over a cubic `region`
    pub fn new(axis: Axis, region: &Aabb) -> Self {
        let world_size = region.size().max_element();
        let half = world_size * 0.5;
        let forward = axis.unit();

        let center = region.center();
        // Eye sits on the center of the region's min face
        let eye = center - forward * half;
        let view = Mat4::look_at_rh(eye, eye + forward, axis.up());
        let projection = Mat4::orthographic_rh(-half, half, -half, half, 0.0, world_size);

        Self { axis, view, projection }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Projections for all three axes
    pub fn all(region: &Aabb) -> [AxisProjection; 3] {
        Axis::ALL.map(|axis| Self::new(axis, region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Aabb {
        Aabb::cube(Vec3::new(1.0, 2.0, 3.0), 6.0)
    }

    #[test]
    fn test_dominant_axis() {
        assert_eq!(Axis::dominant(Vec3::new(0.9, 0.1, -0.2)), Axis::X);
        assert_eq!(Axis::dominant(Vec3::new(0.1, -0.9, 0.2)), Axis::Y);
        assert_eq!(Axis::dominant(Vec3::new(0.1, 0.1, -0.9)), Axis::Z);
        // tie between x and y resolves to x
        assert_eq!(Axis::dominant(Vec3::new(0.5, 0.5, 0.0)), Axis::X);
    }

    #[test]
    fn test_rotation_round_trip_per_axis() {
        let cell = UVec3::new(3, 5, 7);
        for axis in Axis::ALL {
            assert_eq!(axis.rotated_to_cell(axis.cell_to_rotated(cell)), cell);
        }
        assert_eq!(Axis::X.cell_to_rotated(cell), UVec3::new(3, 7, 5));
    }

    #[test]
    fn test_min_corner_maps_to_ndc_origin_corner() {
        let region = region();
        for axis in Axis::ALL {
            let vp = AxisProjection::new(axis, &region).view_projection();
            let ndc = vp.project_point3(region.min);
            assert!((ndc.x + 1.0).abs() < 1e-5, "{axis:?} x = {}", ndc.x);
            assert!((ndc.y + 1.0).abs() < 1e-5, "{axis:?} y = {}", ndc.y);
            assert!(ndc.z.abs() < 1e-5, "{axis:?} z = {}", ndc.z);

            let far = vp.project_point3(region.max);
            assert!((far - Vec3::ONE).abs().max_element() < 1e-5, "{axis:?} max = {far}");
        }
    }

    #[test]
    fn test_screen_axes_follow_table() {
        let region = region();
        let center = region.center();
        // Moving along +Z shifts screen u for the X projection
        let vp = AxisProjection::new(Axis::X, &region).view_projection();
        let a = vp.project_point3(center);
        let b = vp.project_point3(center + Vec3::Z);
        assert!(b.x > a.x);
        assert!((b.y - a.y).abs() < 1e-6);

        // Moving along +X shifts screen v for the Z projection
        let vp = AxisProjection::new(Axis::Z, &region).view_projection();
        let b = vp.project_point3(center + Vec3::X);
        let a = vp.project_point3(center);
        assert!(b.y > a.y);
        assert!((b.x - a.x).abs() < 1e-6);
    }
}
