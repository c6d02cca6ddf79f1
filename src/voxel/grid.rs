//! CPU mirrors of the voxel textures
//!
//! Texel storage matches the GPU textures (`Rgba8Unorm` as `[u8; 4]`,
//! `R32Uint` as `u32`), laid out x fastest, so GPU readbacks can be wrapped
//! directly and compared with the reference models in [`crate::voxel::cpu`].

use glam::{UVec3, Vec4};

use crate::math::Axis;
use crate::voxel::layout::{Direction, GridLayout};

/// One `Rgba8Unorm` texel
pub type Texel = [u8; 4];

/// Float to unorm8 with round-to-nearest, as the GPU stores it
pub fn encode_unorm8(v: Vec4) -> Texel {
    let q = |x: f32| (x.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(v.x), q(v.y), q(v.z), q(v.w)]
}

pub fn decode_unorm8(t: Texel) -> Vec4 {
    Vec4::new(t[0] as f32, t[1] as f32, t[2] as f32, t[3] as f32) / 255.0
}

fn linear(extent: UVec3, texel: UVec3) -> usize {
    texel.x as usize + texel.y as usize * extent.x as usize + texel.z as usize * (extent.x * extent.y) as usize
}

/// Attributes one fragment writes into an isotropic grid
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VoxelSample {
    pub albedo: Texel,
    pub normal: Texel,
    pub emission: Texel,
}

/// One axis' working grid, addressed in axis-rotated `(depth, u, v)` order
#[derive(Clone, Debug, PartialEq)]
pub struct IsotropicVolume {
    pub axis: Axis,
    extent: UVec3,
    pub albedo: Vec<Texel>,
    pub normal: Vec<Texel>,
    pub emission: Vec<Texel>,
}

impl IsotropicVolume {
    pub fn new(axis: Axis, extent: UVec3) -> Self {
        let n = (extent.x * extent.y * extent.z) as usize;
        Self {
            axis,
            extent,
            albedo: vec![[0; 4]; n],
            normal: vec![[0; 4]; n],
            emission: vec![[0; 4]; n],
        }
    }

    pub fn extent(&self) -> UVec3 {
        self.extent
    }

    pub fn store(&mut self, rotated: UVec3, sample: VoxelSample) {
        let i = linear(self.extent, rotated);
        self.albedo[i] = sample.albedo;
        self.normal[i] = sample.normal;
        self.emission[i] = sample.emission;
    }

    pub fn load(&self, rotated: UVec3) -> VoxelSample {
        let i = linear(self.extent, rotated);
        VoxelSample {
            albedo: self.albedo[i],
            normal: self.normal[i],
            emission: self.emission[i],
        }
    }

    /// Zero the `axis_scalar^2` texels covering one cell
    pub fn clear_cell(&mut self, cell: UVec3, axis_scalar: u32) {
        let r = self.axis.cell_to_rotated(cell);
        for v in 0..axis_scalar {
            for u in 0..axis_scalar {
                let t = UVec3::new(r.x, r.y * axis_scalar + u, r.z * axis_scalar + v);
                self.store(t, VoxelSample::default());
            }
        }
    }

    pub fn clear(&mut self) {
        self.albedo.fill([0; 4]);
        self.normal.fill([0; 4]);
        self.emission.fill([0; 4]);
    }

    pub fn is_clear(&self) -> bool {
        self.albedo.iter().chain(&self.normal).chain(&self.emission).all(|t| *t == [0; 4])
    }
}

/// The three per-axis working grids of one cascade build
#[derive(Clone, Debug, PartialEq)]
pub struct AxisGrids {
    pub layout: GridLayout,
    pub volumes: [IsotropicVolume; 3],
}

impl AxisGrids {
    pub fn new(layout: GridLayout) -> Self {
        let volumes = Axis::ALL.map(|axis| IsotropicVolume::new(axis, layout.isotropic_extent(axis)));
        Self { layout, volumes }
    }

    pub fn axis(&self, axis: Axis) -> &IsotropicVolume {
        &self.volumes[axis.index()]
    }

    pub fn axis_mut(&mut self, axis: Axis) -> &mut IsotropicVolume {
        &mut self.volumes[axis.index()]
    }

    pub fn is_clear(&self) -> bool {
        self.volumes.iter().all(IsotropicVolume::is_clear)
    }
}

/// The canonical atlas with every mip level
#[derive(Clone, Debug, PartialEq)]
pub struct AtlasVolume {
    layout: GridLayout,
    mips: Vec<Vec<Texel>>,
}

impl AtlasVolume {
    pub fn new(layout: GridLayout) -> Self {
        let mips = (0..layout.mip_count())
            .map(|m| {
                let e = layout.atlas_mip_extent(m);
                vec![[0; 4]; (e.x * e.y * e.z) as usize]
            })
            .collect();
        Self { layout, mips }
    }

    /// Wrap texels read back from the GPU. `None` if a level has the wrong size.
    pub fn from_mips(layout: GridLayout, mips: Vec<Vec<Texel>>) -> Option<Self> {
        let ok = mips.len() == layout.mip_count() as usize
            && mips.iter().enumerate().all(|(m, data)| {
                let e = layout.atlas_mip_extent(m as u32);
                data.len() == (e.x * e.y * e.z) as usize
            });
        ok.then_some(Self { layout, mips })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn mip(&self, mip: u32) -> &[Texel] {
        &self.mips[mip as usize]
    }

    pub fn get(&self, mip: u32, texel: UVec3) -> Texel {
        self.mips[mip as usize][linear(self.layout.atlas_mip_extent(mip), texel)]
    }

    pub fn set(&mut self, mip: u32, texel: UVec3, value: Texel) {
        let i = linear(self.layout.atlas_mip_extent(mip), texel);
        self.mips[mip as usize][i] = value;
    }

    /// Texel of `local` in one cascade's direction slot
    pub fn slot(&self, cascade: u32, direction: Direction, mip: u32, local: UVec3) -> Texel {
        self.get(mip, self.layout.atlas_texel(cascade, direction, mip, local))
    }

    pub fn set_slot(&mut self, cascade: u32, direction: Direction, mip: u32, local: UVec3, value: Texel) {
        let t = self.layout.atlas_texel(cascade, direction, mip, local);
        self.set(mip, t, value);
    }

    /// Occupied cells of one slot at `mip`
    pub fn occupied_cells(&self, cascade: u32, direction: Direction, mip: u32) -> Vec<UVec3> {
        let g = self.layout.mip_resolution(mip);
        let mut out = Vec::new();
        for z in 0..g {
            for y in 0..g {
                for x in 0..g {
                    let local = UVec3::new(x, y, z);
                    if self.slot(cascade, direction, mip, local)[3] > 0 {
                        out.push(local);
                    }
                }
            }
        }
        out
    }
}

/// Per-cell axis bitmask for every cascade
#[derive(Clone, Debug, PartialEq)]
pub struct OccupancyVolume {
    layout: GridLayout,
    masks: Vec<u32>,
}

impl OccupancyVolume {
    pub fn new(layout: GridLayout) -> Self {
        let e = layout.occupancy_extent();
        Self { layout, masks: vec![0; (e.x * e.y * e.z) as usize] }
    }

    pub fn from_masks(layout: GridLayout, masks: Vec<u32>) -> Option<Self> {
        let e = layout.occupancy_extent();
        (masks.len() == (e.x * e.y * e.z) as usize).then_some(Self { layout, masks })
    }

    pub fn get(&self, cascade: u32, cell: UVec3) -> u32 {
        self.masks[linear(self.layout.occupancy_extent(), self.layout.occupancy_texel(cascade, cell))]
    }

    pub fn set(&mut self, cascade: u32, cell: UVec3, mask: u32) {
        let i = linear(self.layout.occupancy_extent(), self.layout.occupancy_texel(cascade, cell));
        self.masks[i] = mask;
    }

    pub fn masks(&self) -> &[u32] {
        &self.masks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout::new(4, 2, 3, 2).unwrap()
    }

    #[test]
    fn test_unorm8_rounding() {
        assert_eq!(encode_unorm8(Vec4::new(0.0, 1.0, 0.5, 2.0)), [0, 255, 128, 255]);
        assert_eq!(encode_unorm8(Vec4::splat(-1.0)), [0; 4]);
        assert_eq!(decode_unorm8([255, 0, 0, 51]), Vec4::new(1.0, 0.0, 0.0, 0.2));
    }

    #[test]
    fn test_clear_cell_covers_supersampled_texels() {
        let mut grids = AxisGrids::new(layout());
        let cell = UVec3::new(1, 2, 3);
        let vol = grids.axis_mut(Axis::Y);
        let r = Axis::Y.cell_to_rotated(cell);
        let sample = VoxelSample { albedo: [1, 2, 3, 4], ..Default::default() };
        vol.store(UVec3::new(r.x, r.y * 2 + 1, r.z * 2 + 1), sample);
        assert!(!grids.is_clear());
        grids.axis_mut(Axis::Y).clear_cell(cell, 2);
        assert!(grids.is_clear());
    }

    #[test]
    fn test_atlas_slots_do_not_alias() {
        let mut atlas = AtlasVolume::new(layout());
        atlas.set_slot(1, Direction::NegZ, 1, UVec3::new(1, 1, 1), [9, 9, 9, 9]);
        assert_eq!(atlas.slot(1, Direction::NegZ, 1, UVec3::ONE), [9, 9, 9, 9]);
        assert_eq!(atlas.slot(0, Direction::NegZ, 1, UVec3::ONE), [0; 4]);
        assert_eq!(atlas.slot(1, Direction::PosZ, 1, UVec3::ONE), [0; 4]);
        assert_eq!(atlas.occupied_cells(1, Direction::NegZ, 1), vec![UVec3::ONE]);
    }

    #[test]
    fn test_from_mips_rejects_wrong_sizes() {
        let layout = layout();
        assert!(AtlasVolume::from_mips(layout, vec![vec![[0; 4]; 3]]).is_none());
        let atlas = AtlasVolume::new(layout);
        let mips = (0..3).map(|m| atlas.mip(m).to_vec()).collect();
        assert_eq!(AtlasVolume::from_mips(layout, mips), Some(atlas));
    }

    #[test]
    fn test_occupancy_per_cascade() {
        let mut occ = OccupancyVolume::new(layout());
        occ.set(1, UVec3::new(3, 0, 2), 0b101);
        assert_eq!(occ.get(1, UVec3::new(3, 0, 2)), 0b101);
        assert_eq!(occ.get(0, UVec3::new(3, 0, 2)), 0);
    }
}
