//! CPU reference models of the GPU voxel build
//!
//! Each submodule mirrors one shader stage closely enough that the GPU
//! results can be checked against it: culling exactly, coverage exactly,
//! colors within one quantization step.

pub mod culling;
pub mod rasterize;
pub mod compaction;
pub mod mipmap;

use crate::math::Aabb;
use crate::render::buffer::scene_buffer::{draw_templates, instance_aabbs};
use crate::render::buffer::DrawIndexedIndirect;
use crate::scene::SceneGeometry;
use crate::voxel::grid::{AtlasVolume, AxisGrids, OccupancyVolume};
use crate::voxel::layout::GridLayout;

pub use compaction::CompactionOutput;
pub use culling::CullOutput;
pub use rasterize::TouchedCells;

/// Result of building one cascade on the CPU
#[derive(Clone, Debug)]
pub struct CascadeBuild {
    pub draws: Vec<DrawIndexedIndirect>,
    pub cull: CullOutput,
    pub touched: TouchedCells,
    pub compaction: CompactionOutput,
}

/// CPU counterpart of a voxel context: owns mirrors of every GPU volume
pub struct CpuVoxelizer {
    pub layout: GridLayout,
    pub grids: AxisGrids,
    pub atlas: AtlasVolume,
    pub occupancy: OccupancyVolume,
    pub surface_capacity: u32,
    pub debug_box_capacity: u32,
}

impl CpuVoxelizer {
    pub fn new(layout: GridLayout, surface_capacity: u32, debug_box_capacity: u32) -> Self {
        Self {
            layout,
            grids: AxisGrids::new(layout),
            atlas: AtlasVolume::new(layout),
            occupancy: OccupancyVolume::new(layout),
            surface_capacity,
            debug_box_capacity,
        }
    }

    /// Cull, voxelize, compact and filter one cascade over `region`
    pub fn build_cascade(&mut self, scene: &SceneGeometry, cascade: u32, region: &Aabb) -> CascadeBuild {
        let instances = instance_aabbs(scene);
        let mut draws = draw_templates(scene);
        let cull = culling::cull_instances(region, &instances, &mut draws, self.debug_box_capacity);
        let touched = rasterize::voxelize_scene(&mut self.grids, region, scene, &draws);
        let compaction = compaction::compact(
            &mut self.grids,
            cascade,
            self.surface_capacity,
            &mut self.atlas,
            &mut self.occupancy,
        );
        mipmap::generate_mips(&mut self.atlas, cascade);
        CascadeBuild { draws, cull, touched, compaction }
    }

    /// Cull, voxelize and compact one cascade, clearing the grids densely
    /// and skipping the mip filter
    pub fn scan_cascade(&mut self, scene: &SceneGeometry, cascade: u32, region: &Aabb) -> CascadeBuild {
        let instances = instance_aabbs(scene);
        let mut draws = draw_templates(scene);
        let cull = culling::cull_instances(region, &instances, &mut draws, self.debug_box_capacity);
        let touched = rasterize::voxelize_scene(&mut self.grids, region, scene, &draws);
        let compaction = compaction::scan_and_clear(
            &mut self.grids,
            cascade,
            self.surface_capacity,
            &mut self.atlas,
            &mut self.occupancy,
        );
        CascadeBuild { draws, cull, touched, compaction }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::procedural;
    use crate::voxel::layout::Direction;
    use glam::Vec3;

    #[test]
    fn test_cornell_box_build() {
        let layout = GridLayout::new(16, 2, 3, 2).unwrap();
        let capacity = layout.default_surface_capacity() as u32;
        let mut cpu = CpuVoxelizer::new(layout, capacity, 64);
        let scene = procedural::cornell_box(4.0);

        let build = cpu.build_cascade(&scene, 0, &Aabb::cube(Vec3::ZERO, 4.5));
        assert_eq!(build.cull.draw_count, scene.submeshes.len() as u32);
        assert!(build.compaction.stats.count > 0);
        assert_eq!(build.compaction.stats.dropped, 0);
        assert!(cpu.grids.is_clear());
        assert!(!cpu.atlas.occupied_cells(0, Direction::PosY, 2).is_empty());
    }

    #[test]
    fn test_scan_does_not_leak_into_other_cascades() {
        let layout = GridLayout::new(16, 2, 3, 2).unwrap();
        let capacity = layout.default_surface_capacity() as u32;
        let mut scene = SceneGeometry::new();
        let m = scene.add_material(crate::scene::Material::diffuse(Vec3::ONE));
        // Inside cascade 1's region only
        procedural::cuboid(&mut scene, Vec3::splat(2.6), Vec3::splat(3.4), m);
        let regions = [Aabb::cube(Vec3::ZERO, 4.0), Aabb::cube(Vec3::ZERO, 8.0)];

        let mut cpu = CpuVoxelizer::new(layout, capacity, 16);
        let scanned = cpu.scan_cascade(&scene, 1, &regions[1]);
        assert!(scanned.compaction.stats.count > 0);
        assert!(cpu.grids.is_clear());

        // Lower cascade first, as a rebuild of both would order them
        let lower = cpu.build_cascade(&scene, 0, &regions[0]);
        assert_eq!(lower.cull.draw_count, 0);
        assert_eq!(lower.compaction.stats.count, 0);
        assert!(cpu.atlas.occupied_cells(0, Direction::PosX, 0).is_empty());
        let upper = cpu.build_cascade(&scene, 1, &regions[1]);
        assert_eq!(upper.compaction.entries, scanned.compaction.entries);
    }

    #[test]
    fn test_two_cascades_use_disjoint_regions() {
        let layout = GridLayout::new(16, 2, 3, 2).unwrap();
        let capacity = layout.default_surface_capacity() as u32;
        let scene = procedural::cornell_box(4.0);
        let mut both = CpuVoxelizer::new(layout, capacity, 64);
        both.build_cascade(&scene, 0, &Aabb::cube(Vec3::ZERO, 4.5));
        both.build_cascade(&scene, 1, &Aabb::cube(Vec3::ZERO, 9.0));

        let mut only_upper = CpuVoxelizer::new(layout, capacity, 64);
        only_upper.build_cascade(&scene, 1, &Aabb::cube(Vec3::ZERO, 9.0));
        for mip in 0..layout.mip_count() {
            for d in Direction::ALL {
                assert_eq!(both.atlas.occupied_cells(1, d, mip), only_upper.atlas.occupied_cells(1, d, mip));
            }
            assert!(!both.atlas.occupied_cells(0, Direction::PosY, mip).is_empty());
        }
    }

    #[test]
    fn test_instance_outside_region_writes_nothing() {
        let layout = GridLayout::new(8, 1, 1, 2).unwrap();
        let mut cpu = CpuVoxelizer::new(layout, 8 * 8 * 8 * 6, 16);
        let mut scene = SceneGeometry::new();
        let m = scene.add_material(crate::scene::Material::diffuse(Vec3::ONE));
        procedural::cuboid(&mut scene, Vec3::splat(20.0), Vec3::splat(21.0), m);

        let build = cpu.build_cascade(&scene, 0, &Aabb::cube(Vec3::ZERO, 4.0));
        assert_eq!(build.cull.draw_count, 0);
        assert_eq!(build.draws[0].instance_count, 0);
        assert!(build.touched.is_empty());
        assert_eq!(build.compaction.stats.count, 0);
        assert_eq!(build.compaction.dispatch.sparse.total_groups(), 0);
    }
}
