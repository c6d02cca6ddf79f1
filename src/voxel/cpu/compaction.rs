//! Reference compaction, mirrors `compact_merge.wgsl`, `emit_surfaces.wgsl`
//! and `release.wgsl`

use glam::{UVec3, Vec3, Vec4};
use rayon::prelude::*;

use crate::math::Axis;
use crate::voxel::grid::{decode_unorm8, encode_unorm8, AtlasVolume, AxisGrids, OccupancyVolume, Texel};
use crate::voxel::layout::{Direction, GridLayout, NUM_DIRECTIONS};
use crate::voxel::surface::{SurfaceDispatch, SurfaceListEntry, SurfaceStats};

/// Workgroup edge of the dense per-cell passes
pub const MERGE_WORKGROUP_EDGE: u32 = 8;

/// Result of merging the three axis grids into one cell
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MergedCell {
    /// Bit `a` set when axis `a` had a sample
    pub mask: u32,
    /// Mip 0 value of every direction slot
    pub slots: [Texel; NUM_DIRECTIONS as usize],
}

/// Merge one cell's samples from every axis grid
pub fn merge_cell(grids: &AxisGrids, cell: UVec3) -> MergedCell {
    let s = grids.layout.axis_scalar();
    let mut mask = 0u32;
    let mut albedo = Vec4::ZERO;
    let mut normal = Vec3::ZERO;
    let mut emission = Vec3::ZERO;
    let mut axes = 0u32;

    for axis in Axis::ALL {
        let volume = grids.axis(axis);
        let r = axis.cell_to_rotated(cell);
        let mut a_sum = Vec4::ZERO;
        let mut n_sum = Vec3::ZERO;
        let mut e_sum = Vec3::ZERO;
        let mut n = 0u32;
        for v in 0..s {
            for u in 0..s {
                let sample = volume.load(UVec3::new(r.x, r.y * s + u, r.z * s + v));
                if sample.albedo[3] == 0 {
                    continue;
                }
                a_sum += decode_unorm8(sample.albedo);
                n_sum += decode_unorm8(sample.normal).truncate() * 2.0 - Vec3::ONE;
                e_sum += decode_unorm8(sample.emission).truncate();
                n += 1;
            }
        }
        if n > 0 {
            mask |= 1 << axis.index();
            let inv = 1.0 / n as f32;
            albedo += a_sum * inv;
            normal += n_sum;
            emission += e_sum * inv;
            axes += 1;
        }
    }

    if axes == 0 {
        return MergedCell::default();
    }

    let inv = 1.0 / axes as f32;
    let albedo = albedo * inv;
    let emission = emission * inv;
    let len = normal.length();
    let opacity = albedo.w;
    let radiance = (albedo.truncate() + emission) * opacity;

    let mut slots = [[0u8; 4]; NUM_DIRECTIONS as usize];
    for d in Direction::ALL {
        let weight = if len > 0.0 { (normal / len).dot(d.vector()).max(0.0) } else { 1.0 };
        slots[d.index() as usize] = encode_unorm8((radiance * weight).extend(opacity));
    }
    MergedCell { mask, slots }
}

/// Merge pass over a whole cascade. Every cell of the cascade's atlas
/// region is written, empty ones with zero. Returns the number of occupied
/// `(cell, axis)` pairs.
pub fn merge_cascade(
    grids: &AxisGrids,
    cascade: u32,
    atlas: &mut AtlasVolume,
    occupancy: &mut OccupancyVolume,
) -> u32 {
    let layout = grids.layout;
    let cells = layout.cell_count() as usize;
    let merged: Vec<MergedCell> = (0..cells)
        .into_par_iter()
        .map(|i| merge_cell(grids, layout.cell_from_index(i)))
        .collect();

    let mut requested = 0u32;
    for (i, m) in merged.iter().enumerate() {
        let cell = layout.cell_from_index(i);
        occupancy.set(cascade, cell, m.mask);
        requested += m.mask.count_ones();
        for d in Direction::ALL {
            atlas.set_slot(cascade, d, 0, cell, m.slots[d.index() as usize]);
        }
    }
    requested
}

/// Emit pass: entries in linear cell order (x fastest), then axis,
/// clamped to `capacity`
pub fn emit_surfaces(
    layout: &GridLayout,
    occupancy: &OccupancyVolume,
    cascade: u32,
    capacity: u32,
) -> (Vec<SurfaceListEntry>, SurfaceStats) {
    let mut entries = Vec::new();
    let mut requested = 0u32;
    for i in 0..layout.cell_count() as usize {
        let cell = layout.cell_from_index(i);
        let mask = occupancy.get(cascade, cell);
        for axis in Axis::ALL {
            if mask & (1 << axis.index()) == 0 {
                continue;
            }
            if requested < capacity {
                entries.push(SurfaceListEntry::new(cascade, axis, cell));
            }
            requested += 1;
        }
    }
    (entries, SurfaceStats::clamped(requested, capacity))
}

/// Groups of one axis' dense clear, one invocation per cell
pub fn dense_clear_groups(layout: &GridLayout) -> u32 {
    let g = layout.grid_size().div_ceil(MERGE_WORKGROUP_EDGE);
    g * g * g
}

/// Release pass: zero every listed cell in its axis grid, then the whole
/// grid if entries were dropped
pub fn release(grids: &mut AxisGrids, entries: &[SurfaceListEntry], stats: &SurfaceStats) {
    let s = grids.layout.axis_scalar();
    for entry in &entries[..stats.count as usize] {
        grids.axis_mut(entry.axis()).clear_cell(entry.cell(), s);
    }
    if stats.overflowed() {
        for volume in &mut grids.volumes {
            volume.clear();
        }
    }
}

/// Everything one compaction run produces
#[derive(Clone, Debug, PartialEq)]
pub struct CompactionOutput {
    pub entries: Vec<SurfaceListEntry>,
    pub stats: SurfaceStats,
    pub dispatch: SurfaceDispatch,
}

/// Merge and emit without releasing, so it can be re-run on the same grids
pub fn scan(
    grids: &AxisGrids,
    cascade: u32,
    capacity: u32,
    atlas: &mut AtlasVolume,
    occupancy: &mut OccupancyVolume,
) -> CompactionOutput {
    let requested = merge_cascade(grids, cascade, atlas, occupancy);
    let (entries, stats) = emit_surfaces(&grids.layout, occupancy, cascade, capacity);
    debug_assert_eq!(requested, stats.requested);
    let dispatch = SurfaceDispatch::derive(&stats, dense_clear_groups(&grids.layout));
    CompactionOutput { entries, stats, dispatch }
}

/// Scan, then clear every axis grid densely. The grids are shared by all
/// cascades, so nothing is left behind for the next one.
pub fn scan_and_clear(
    grids: &mut AxisGrids,
    cascade: u32,
    capacity: u32,
    atlas: &mut AtlasVolume,
    occupancy: &mut OccupancyVolume,
) -> CompactionOutput {
    let out = scan(grids, cascade, capacity, atlas, occupancy);
    for volume in &mut grids.volumes {
        volume.clear();
    }
    out
}

/// Full compaction: scan then release the axis grids
pub fn compact(
    grids: &mut AxisGrids,
    cascade: u32,
    capacity: u32,
    atlas: &mut AtlasVolume,
    occupancy: &mut OccupancyVolume,
) -> CompactionOutput {
    let out = scan(grids, cascade, capacity, atlas, occupancy);
    release(grids, &out.entries, &out.stats);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Aabb, AxisProjection};
    use crate::scene::{Material, MeshVertex};
    use crate::voxel::cpu::rasterize::{voxelize_triangle, TouchedCells};
    use crate::voxel::grid::VoxelSample;

    fn layout() -> GridLayout {
        GridLayout::new(8, 2, 3, 2).unwrap()
    }

    fn state() -> (AxisGrids, AtlasVolume, OccupancyVolume) {
        let l = layout();
        (AxisGrids::new(l), AtlasVolume::new(l), OccupancyVolume::new(l))
    }

    fn opaque(normal: Vec3) -> VoxelSample {
        VoxelSample {
            albedo: [255, 128, 0, 255],
            normal: encode_unorm8((normal * 0.5 + Vec3::splat(0.5)).extend(1.0)),
            emission: [0, 0, 0, 255],
        }
    }

    fn put(grids: &mut AxisGrids, axis: Axis, cell: UVec3, sample: VoxelSample) {
        let r = axis.cell_to_rotated(cell);
        grids.axis_mut(axis).store(UVec3::new(r.x, r.y * 2, r.z * 2), sample);
    }

    #[test]
    fn test_merge_mask_and_hemisphere_weights() {
        let (mut grids, _, _) = state();
        let cell = UVec3::new(2, 3, 4);
        put(&mut grids, Axis::Y, cell, opaque(Vec3::Y));
        let merged = merge_cell(&grids, cell);
        assert_eq!(merged.mask, 0b010);
        let pos_y = merged.slots[Direction::PosY.index() as usize];
        let neg_y = merged.slots[Direction::NegY.index() as usize];
        assert_eq!(pos_y, [255, 128, 0, 255]);
        assert_eq!(&neg_y[..3], &[0, 0, 0]);
        // opacity is direction independent
        assert!(merged.slots.iter().all(|s| s[3] == 255));
        assert_eq!(merge_cell(&grids, UVec3::ZERO), MergedCell::default());
    }

    #[test]
    fn test_emit_order_is_linear_then_axis() {
        let (mut grids, mut atlas, mut occ) = state();
        put(&mut grids, Axis::Z, UVec3::new(1, 0, 0), opaque(Vec3::Z));
        put(&mut grids, Axis::X, UVec3::new(1, 0, 0), opaque(Vec3::X));
        put(&mut grids, Axis::Y, UVec3::new(0, 1, 0), opaque(Vec3::Y));
        put(&mut grids, Axis::X, UVec3::new(7, 7, 7), opaque(Vec3::X));

        let out = scan(&grids, 1, 100, &mut atlas, &mut occ);
        let got: Vec<(UVec3, Axis)> = out.entries.iter().map(|e| (e.cell(), e.axis())).collect();
        assert_eq!(
            got,
            vec![
                (UVec3::new(1, 0, 0), Axis::X),
                (UVec3::new(1, 0, 0), Axis::Z),
                (UVec3::new(0, 1, 0), Axis::Y),
                (UVec3::new(7, 7, 7), Axis::X),
            ]
        );
        assert!(out.entries.iter().all(|e| e.cascade() == 1));
        assert_eq!(out.stats, SurfaceStats { count: 4, requested: 4, dropped: 0, capacity: 100 });
        assert_eq!(out.dispatch.sparse.x, 1);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let (mut grids, mut atlas, mut occ) = state();
        for i in 0..8 {
            put(&mut grids, Axis::ALL[i % 3], UVec3::new(i as u32, (i * 3 % 8) as u32, 2), opaque(Vec3::X));
        }
        let first = scan(&grids, 0, 1000, &mut atlas, &mut occ);
        let atlas_first = atlas.clone();
        let second = scan(&grids, 0, 1000, &mut atlas, &mut occ);
        assert_eq!(first, second);
        assert_eq!(atlas, atlas_first);
    }

    #[test]
    fn test_scan_and_clear_leaves_no_samples() {
        let (mut grids, mut atlas, mut occ) = state();
        put(&mut grids, Axis::Y, UVec3::new(4, 5, 6), opaque(Vec3::Y));
        let expected = scan(&grids, 1, 100, &mut atlas.clone(), &mut occ.clone());
        let out = scan_and_clear(&mut grids, 1, 100, &mut atlas, &mut occ);
        assert_eq!(out, expected);
        assert!(grids.is_clear());
        // The merged result stays in the atlas
        assert_eq!(occ.get(1, UVec3::new(4, 5, 6)), 0b010);
    }

    #[test]
    fn test_overflow_clamps_and_clears_densely() {
        let (mut grids, mut atlas, mut occ) = state();
        for x in 0..8 {
            put(&mut grids, Axis::X, UVec3::new(x, 0, 0), opaque(Vec3::X));
        }
        let out = compact(&mut grids, 0, 5, &mut atlas, &mut occ);
        assert_eq!(out.entries.len(), 5);
        assert_eq!(out.stats.dropped, 3);
        assert_eq!(out.dispatch.dense.x, dense_clear_groups(&layout()));
        assert!(grids.is_clear());
    }

    #[test]
    fn test_release_clears_only_what_was_listed() {
        let (mut grids, mut atlas, mut occ) = state();
        put(&mut grids, Axis::Z, UVec3::new(3, 3, 3), opaque(Vec3::Z));
        let out = compact(&mut grids, 0, 100, &mut atlas, &mut occ);
        assert_eq!(out.dispatch.dense.total_groups(), 0);
        assert!(grids.is_clear());
        // atlas keeps the merged result
        assert_eq!(atlas.occupied_cells(0, Direction::PosZ, 0), vec![UVec3::new(3, 3, 3)]);
    }

    #[test]
    fn test_stale_atlas_cells_are_overwritten() {
        let (mut grids, mut atlas, mut occ) = state();
        put(&mut grids, Axis::X, UVec3::new(1, 1, 1), opaque(Vec3::X));
        compact(&mut grids, 0, 100, &mut atlas, &mut occ);
        put(&mut grids, Axis::X, UVec3::new(2, 2, 2), opaque(Vec3::X));
        compact(&mut grids, 0, 100, &mut atlas, &mut occ);
        assert_eq!(atlas.occupied_cells(0, Direction::PosX, 0), vec![UVec3::new(2, 2, 2)]);
        assert_eq!(occ.get(0, UVec3::new(1, 1, 1)), 0);
    }

    #[test]
    fn test_single_triangle_surface_list_matches_raster() {
        let l = GridLayout::new(16, 1, 1, 2).unwrap();
        let mut grids = AxisGrids::new(l);
        let mut atlas = AtlasVolume::new(l);
        let mut occ = OccupancyVolume::new(l);
        let region = Aabb::cube(Vec3::ZERO, 4.0);
        let proj = AxisProjection::all(&region);

        let pts = [Vec3::new(-1.7, -0.3, -1.2), Vec3::new(1.4, 0.6, -0.9), Vec3::new(-0.2, 0.2, 1.6)];
        let n = (pts[1] - pts[0]).cross(pts[2] - pts[0]).normalize();
        let tri = pts.map(|p| MeshVertex::new(p, n, [0.0, 0.0], 0));
        let mut touched = TouchedCells::new();
        voxelize_triangle(&mut grids, &proj, &tri, &Material::diffuse(Vec3::ONE), &mut touched);
        assert!(!touched.is_empty());

        let out = compact(&mut grids, 0, l.default_surface_capacity() as u32, &mut atlas, &mut occ);
        let listed: TouchedCells = out
            .entries
            .iter()
            .map(|e| (e.axis().index(), e.cell().to_array()))
            .collect();
        assert_eq!(listed, touched);
        let dominant = Axis::dominant(n).index();
        assert!(listed.iter().all(|(axis, _)| *axis == dominant));
    }
}
