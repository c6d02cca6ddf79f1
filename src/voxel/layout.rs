//! Voxel grid dimensions and atlas addressing
//!
//! The canonical atlas packs six direction slots along X and one region per
//! cascade along Y:
//!
//! ```text
//!   y ^
//!     | [c2 +X][c2 -X][c2 +Y][c2 -Y][c2 +Z][c2 -Z]
//!     | [c1 +X][c1 -X][c1 +Y] ...
//!     | [c0 +X][c0 -X][c0 +Y] ...
//!     +--------------------------------------------> x
//! ```
//!
//! Every mip level keeps the same packing at `grid_size >> mip` resolution.

use glam::UVec3;
use thiserror::Error;

use crate::math::Axis;

/// Number of packed projection directions in the atlas
pub const NUM_DIRECTIONS: u32 = 6;

/// Number of isotropic working grids (one per cardinal axis)
pub const NUM_AXES: u32 = 3;

/// Raster supersampling of the per-axis grids in their projection plane
pub const DEFAULT_AXIS_SCALAR: u32 = 2;

/// Coordinates are packed into 10 bits each in a surface entry
pub const MAX_GRID_SIZE: u32 = 1024;

/// Largest side of a per-axis grid's projection plane
pub const MAX_RASTER_EXTENT: u32 = MAX_GRID_SIZE * 2;

/// Cascades are packed into the upper 30 bits of a surface entry's meta word
pub const MAX_CASCADES: u32 = 64;

/// Grid construction failures
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GridError {
    #[error("grid size must be non-zero")]
    ZeroGridSize,
    #[error("grid size {0} is not a power of two")]
    NotPowerOfTwo(u32),
    #[error("grid size {0} exceeds the maximum of {MAX_GRID_SIZE}")]
    GridTooLarge(u32),
    #[error("cascade count must be non-zero")]
    ZeroCascadeCount,
    #[error("cascade count {0} exceeds the maximum of {MAX_CASCADES}")]
    TooManyCascades(u32),
    #[error("mip count must be non-zero")]
    ZeroMipCount,
    #[error("{requested} mips requested but a {grid_size}^3 grid supports {max}")]
    TooManyMips { requested: u32, max: u32, grid_size: u32 },
    #[error("axis scalar must be non-zero")]
    ZeroAxisScalar,
    #[error("grid size {grid_size} x axis scalar {axis_scalar} exceeds the raster limit of {MAX_RASTER_EXTENT}")]
    RasterTooLarge { grid_size: u32, axis_scalar: u32 },
    #[error("grid region size {0} must be positive and finite")]
    InvalidRegionSize(f32),
    #[error("surface capacity {requested} exceeds the maximum of {max}")]
    SurfaceCapacity { requested: u64, max: u64 },
}

/// Direction slot in the anisotropic atlas
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    PosX = 0,
    NegX = 1,
    PosY = 2,
    NegY = 3,
    PosZ = 4,
    NegZ = 5,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::PosX,
        Direction::NegX,
        Direction::PosY,
        Direction::NegY,
        Direction::PosZ,
        Direction::NegZ,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<Direction> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn axis(self) -> Axis {
        match self {
            Direction::PosX | Direction::NegX => Axis::X,
            Direction::PosY | Direction::NegY => Axis::Y,
            Direction::PosZ | Direction::NegZ => Axis::Z,
        }
    }

    pub fn is_positive(self) -> bool {
        self.index() % 2 == 0
    }

    pub fn vector(self) -> glam::Vec3 {
        let unit = self.axis().unit();
        if self.is_positive() { unit } else { -unit }
    }
}

/// Validated dimensions of every voxel resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridLayout {
    grid_size: u32,
    cascade_count: u32,
    mip_count: u32,
    axis_scalar: u32,
}

impl GridLayout {
    /// Validate and build a layout
    pub fn new(grid_size: u32, cascade_count: u32, mip_count: u32, axis_scalar: u32) -> Result<Self, GridError> {
        if grid_size == 0 {
            return Err(GridError::ZeroGridSize);
        }
        if !grid_size.is_power_of_two() {
            return Err(GridError::NotPowerOfTwo(grid_size));
        }
        if grid_size > MAX_GRID_SIZE {
            return Err(GridError::GridTooLarge(grid_size));
        }
        if cascade_count == 0 {
            return Err(GridError::ZeroCascadeCount);
        }
        if cascade_count > MAX_CASCADES {
            return Err(GridError::TooManyCascades(cascade_count));
        }
        if mip_count == 0 {
            return Err(GridError::ZeroMipCount);
        }
        let max = Self::max_mip_count(grid_size);
        if mip_count > max {
            return Err(GridError::TooManyMips { requested: mip_count, max, grid_size });
        }
        if axis_scalar == 0 {
            return Err(GridError::ZeroAxisScalar);
        }
        match grid_size.checked_mul(axis_scalar) {
            Some(extent) if extent <= MAX_RASTER_EXTENT => {}
            _ => return Err(GridError::RasterTooLarge { grid_size, axis_scalar }),
        }
        Ok(Self { grid_size, cascade_count, mip_count, axis_scalar })
    }

    /// Mips a power-of-two grid can hold down to 1^3
    pub fn max_mip_count(grid_size: u32) -> u32 {
        grid_size.max(1).ilog2() + 1
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn cascade_count(&self) -> u32 {
        self.cascade_count
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    pub fn axis_scalar(&self) -> u32 {
        self.axis_scalar
    }

    /// Cells in one cascade (`grid_size^3`)
    pub fn cell_count(&self) -> u64 {
        (self.grid_size as u64).pow(3)
    }

    /// Default surface list capacity: one entry per cell per direction
    pub fn default_surface_capacity(&self) -> u64 {
        self.cell_count() * NUM_DIRECTIONS as u64
    }

    /// Resolve a configured capacity, rejecting values above the default
    pub fn surface_capacity(&self, configured: Option<u32>) -> Result<u32, GridError> {
        let max = self.default_surface_capacity().min(u32::MAX as u64);
        match configured {
            None => Ok(max as u32),
            Some(requested) if requested as u64 <= max => Ok(requested),
            Some(requested) => Err(GridError::SurfaceCapacity { requested: requested as u64, max }),
        }
    }

    /// Side of the projection plane in texels
    pub fn raster_extent(&self) -> u32 {
        self.grid_size * self.axis_scalar
    }

    /// Extent of one isotropic per-axis grid in axis-rotated `(depth, u, v)` order
    pub fn isotropic_extent(&self, _axis: Axis) -> UVec3 {
        UVec3::new(self.grid_size, self.raster_extent(), self.raster_extent())
    }

    /// Resolution of one direction slot at `mip`
    pub fn mip_resolution(&self, mip: u32) -> u32 {
        (self.grid_size >> mip).max(1)
    }

    /// Full atlas extent at mip 0
    pub fn atlas_extent(&self) -> UVec3 {
        self.atlas_mip_extent(0)
    }

    /// Full atlas extent at `mip`
    pub fn atlas_mip_extent(&self, mip: u32) -> UVec3 {
        let g = self.mip_resolution(mip);
        UVec3::new(g * NUM_DIRECTIONS, g * self.cascade_count, g)
    }

    /// Occupancy channel extent (single mip, no direction slots)
    pub fn occupancy_extent(&self) -> UVec3 {
        UVec3::new(self.grid_size, self.grid_size * self.cascade_count, self.grid_size)
    }

    /// Atlas texel of `local` inside `(cascade, direction)` at `mip`
    pub fn atlas_texel(&self, cascade: u32, direction: Direction, mip: u32, local: UVec3) -> UVec3 {
        let g = self.mip_resolution(mip);
        UVec3::new(
            direction.index() * g + local.x,
            cascade * g + local.y,
            local.z,
        )
    }

    /// Occupancy texel of `cell` inside `cascade`
    pub fn occupancy_texel(&self, cascade: u32, cell: UVec3) -> UVec3 {
        UVec3::new(cell.x, cascade * self.grid_size + cell.y, cell.z)
    }

    /// Origin and extent of the atlas block shown by a debug visualizer
    pub fn debug_region(&self, cascade: u32, mip: u32, direction: Direction) -> (UVec3, UVec3) {
        let mip = mip.min(self.mip_count - 1);
        let cascade = cascade.min(self.cascade_count - 1);
        let g = self.mip_resolution(mip);
        (self.atlas_texel(cascade, direction, mip, UVec3::ZERO), UVec3::splat(g))
    }

    /// Linear index of a cell, x fastest
    pub fn cell_index(&self, cell: UVec3) -> usize {
        let g = self.grid_size as usize;
        cell.x as usize + cell.y as usize * g + cell.z as usize * g * g
    }

    /// Inverse of [`GridLayout::cell_index`]
    pub fn cell_from_index(&self, index: usize) -> UVec3 {
        let g = self.grid_size as usize;
        UVec3::new((index % g) as u32, ((index / g) % g) as u32, (index / (g * g)) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scenario_extents() {
        let layout = GridLayout::new(64, 3, 3, DEFAULT_AXIS_SCALAR).unwrap();
        assert_eq!(layout.atlas_extent(), UVec3::new(384, 192, 64));
        assert_eq!(layout.isotropic_extent(Axis::X), UVec3::new(64, 128, 128));
        assert_eq!(layout.atlas_mip_extent(2), UVec3::new(96, 48, 16));
        assert_eq!(layout.occupancy_extent(), UVec3::new(64, 192, 64));
        assert_eq!(layout.default_surface_capacity(), 64 * 64 * 64 * 6);
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        assert_eq!(GridLayout::new(0, 3, 3, 2), Err(GridError::ZeroGridSize));
        assert_eq!(GridLayout::new(64, 0, 3, 2), Err(GridError::ZeroCascadeCount));
        assert_eq!(GridLayout::new(64, 3, 0, 2), Err(GridError::ZeroMipCount));
        assert_eq!(GridLayout::new(64, 3, 3, 0), Err(GridError::ZeroAxisScalar));
    }

    #[test]
    fn test_invalid_sizes_are_rejected() {
        assert_eq!(GridLayout::new(48, 3, 3, 2), Err(GridError::NotPowerOfTwo(48)));
        assert_eq!(GridLayout::new(2048, 1, 1, 2), Err(GridError::GridTooLarge(2048)));
        assert_eq!(
            GridLayout::new(4, 1, 4, 2),
            Err(GridError::TooManyMips { requested: 4, max: 3, grid_size: 4 })
        );
        assert!(GridLayout::new(4, 1, 3, 2).is_ok());
        assert!(GridLayout::new(1, 1, 1, 1).is_ok());
    }

    #[test]
    fn test_raster_extent_is_bounded() {
        assert_eq!(
            GridLayout::new(1024, 1, 1, 1 << 23),
            Err(GridError::RasterTooLarge { grid_size: 1024, axis_scalar: 1 << 23 })
        );
        assert_eq!(
            GridLayout::new(256, 1, 1, 16),
            Err(GridError::RasterTooLarge { grid_size: 256, axis_scalar: 16 })
        );
        let widest = GridLayout::new(MAX_GRID_SIZE, 1, 1, 2).unwrap();
        assert_eq!(widest.raster_extent(), MAX_RASTER_EXTENT);
    }

    #[test]
    fn test_surface_capacity_resolution() {
        let layout = GridLayout::new(8, 1, 1, 2).unwrap();
        assert_eq!(layout.surface_capacity(None), Ok(8 * 8 * 8 * 6));
        assert_eq!(layout.surface_capacity(Some(10)), Ok(10));
        assert!(layout.surface_capacity(Some(8 * 8 * 8 * 6 + 1)).is_err());
    }

    #[test]
    fn test_atlas_texel_packing() {
        let layout = GridLayout::new(64, 3, 3, 2).unwrap();
        let texel = layout.atlas_texel(2, Direction::NegY, 1, UVec3::new(1, 2, 3));
        assert_eq!(texel, UVec3::new(3 * 32 + 1, 2 * 32 + 2, 3));
        let (origin, extent) = layout.debug_region(9, 9, Direction::PosZ);
        assert_eq!(origin, UVec3::new(4 * 16, 2 * 16, 0));
        assert_eq!(extent, UVec3::splat(16));
    }

    #[test]
    fn test_cell_index_round_trip() {
        let layout = GridLayout::new(8, 1, 1, 2).unwrap();
        let cell = UVec3::new(1, 6, 3);
        assert_eq!(layout.cell_from_index(layout.cell_index(cell)), cell);
        assert_eq!(layout.cell_index(UVec3::new(1, 0, 0)), 1);
    }

    #[test]
    fn test_direction_vectors() {
        assert_eq!(Direction::NegZ.vector(), -glam::Vec3::Z);
        assert_eq!(Direction::PosY.axis(), Axis::Y);
        assert!(Direction::PosX.is_positive());
        assert!(!Direction::NegX.is_positive());
    }
}
