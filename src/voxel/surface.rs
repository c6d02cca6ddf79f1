//! Sparse surface list records shared with the compaction shaders

use bytemuck::{Pod, Zeroable};
use glam::UVec3;

use crate::math::Axis;

/// Invocations per workgroup of every pass driven by the surface list
pub const SURFACE_WORKGROUP_SIZE: u32 = 64;

/// Per-dimension workgroup limit guaranteed by wgpu's default limits
pub const MAX_GROUPS_PER_DIMENSION: u32 = 65_535;

const COORD_BITS: u32 = 10;
const COORD_MASK: u32 = (1 << COORD_BITS) - 1;

/// One occupied `(cell, axis)` pair (8 bytes, matches `SurfaceEntry` in WGSL)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct SurfaceListEntry {
    /// x | y << 10 | z << 20
    pub coord: u32,
    /// axis | cascade << 2
    pub meta: u32,
}

impl SurfaceListEntry {
    pub fn new(cascade: u32, axis: Axis, cell: UVec3) -> Self {
        Self {
            coord: (cell.x & COORD_MASK) | (cell.y & COORD_MASK) << COORD_BITS | (cell.z & COORD_MASK) << (2 * COORD_BITS),
            meta: axis.index() as u32 | cascade << 2,
        }
    }

    pub fn cell(&self) -> UVec3 {
        UVec3::new(
            self.coord & COORD_MASK,
            (self.coord >> COORD_BITS) & COORD_MASK,
            (self.coord >> (2 * COORD_BITS)) & COORD_MASK,
        )
    }

    pub fn axis(&self) -> Axis {
        // The low two bits are always written from a valid axis
        Axis::from_index((self.meta & 3) as usize).unwrap_or(Axis::X)
    }

    pub fn cascade(&self) -> u32 {
        self.meta >> 2
    }
}

/// wgpu `DispatchIndirectArgs` layout (12 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectCommand {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchIndirectCommand {
    /// Workgroups covering `count` items at [`SURFACE_WORKGROUP_SIZE`] each,
    /// folded into Y once X would pass the per-dimension limit
    pub fn for_count(count: u32) -> Self {
        Self::for_groups(count.div_ceil(SURFACE_WORKGROUP_SIZE))
    }

    /// Fold a linear group count into X and Y
    pub fn for_groups(groups: u32) -> Self {
        if groups <= MAX_GROUPS_PER_DIMENSION {
            Self { x: groups, y: 1, z: 1 }
        } else {
            Self { x: MAX_GROUPS_PER_DIMENSION, y: groups.div_ceil(MAX_GROUPS_PER_DIMENSION), z: 1 }
        }
    }

    /// Workgroups launched
    pub fn total_groups(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    /// Invocations launched
    pub fn total_invocations(&self) -> u64 {
        self.total_groups() * SURFACE_WORKGROUP_SIZE as u64
    }
}

/// Surface counters written by the emit pass (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SurfaceStats {
    /// Live entries in the list, `min(requested, capacity)`
    pub count: u32,
    /// Occupied `(cell, axis)` pairs found by the merge pass
    pub requested: u32,
    /// Entries that did not fit
    pub dropped: u32,
    pub capacity: u32,
}

impl SurfaceStats {
    /// Clamp `requested` into `capacity`
    pub fn clamped(requested: u32, capacity: u32) -> Self {
        let count = requested.min(capacity);
        Self { count, requested, dropped: requested - count, capacity }
    }

    pub fn overflowed(&self) -> bool {
        self.dropped > 0
    }
}

/// Both commands the emit pass writes into the dispatch buffer
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SurfaceDispatch {
    /// Sparse pass over the live list
    pub sparse: DispatchIndirectCommand,
    /// Dense fallback clear, zero unless entries were dropped
    pub dense: DispatchIndirectCommand,
}

impl SurfaceDispatch {
    /// Byte offset of [`SurfaceDispatch::dense`] for `dispatch_workgroups_indirect`
    pub const DENSE_OFFSET: u64 = std::mem::size_of::<DispatchIndirectCommand>() as u64;

    /// `dense_groups` is the group count of a full-grid clear of one axis
    pub fn derive(stats: &SurfaceStats, dense_groups: u32) -> Self {
        Self {
            sparse: DispatchIndirectCommand::for_count(stats.count),
            dense: if stats.overflowed() {
                DispatchIndirectCommand::for_groups(dense_groups)
            } else {
                DispatchIndirectCommand::for_groups(0)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<SurfaceListEntry>(), 8);
        assert_eq!(std::mem::size_of::<DispatchIndirectCommand>(), 12);
        assert_eq!(std::mem::size_of::<SurfaceStats>(), 16);
        assert_eq!(std::mem::size_of::<SurfaceDispatch>(), 24);
    }

    #[test]
    fn test_entry_packing() {
        let entry = SurfaceListEntry::new(2, Axis::Z, UVec3::new(1023, 5, 700));
        assert_eq!(entry.cell(), UVec3::new(1023, 5, 700));
        assert_eq!(entry.axis(), Axis::Z);
        assert_eq!(entry.cascade(), 2);
        assert_eq!(entry.coord, 1023 | 5 << 10 | 700 << 20);
    }

    #[test]
    fn test_dispatch_for_every_count_small_grid() {
        // 8^3 cells, six directions
        let max = 8 * 8 * 8 * 6;
        for c in 0..=max {
            let cmd = DispatchIndirectCommand::for_count(c);
            assert_eq!(cmd, DispatchIndirectCommand { x: c.div_ceil(64), y: 1, z: 1 });
            assert!(cmd.total_invocations() >= c as u64);
            assert!(cmd.total_invocations() < c as u64 + 64 || c == 0);
        }
    }

    #[test]
    fn test_dispatch_sampled_default_grid() {
        let max: u32 = 64 * 64 * 64 * 6;
        for c in (0..=max).step_by(997).chain([max - 1, max]) {
            let cmd = DispatchIndirectCommand::for_count(c);
            assert_eq!(cmd.y, 1);
            assert_eq!(cmd.x, c.div_ceil(64));
        }
    }

    #[test]
    fn test_dispatch_folds_past_dimension_limit() {
        let c = 256 * 256 * 256 * 6;
        let cmd = DispatchIndirectCommand::for_count(c);
        let groups = c.div_ceil(64);
        assert_eq!(cmd.x, MAX_GROUPS_PER_DIMENSION);
        assert_eq!(cmd.y, groups.div_ceil(MAX_GROUPS_PER_DIMENSION));
        assert!(cmd.total_groups() >= groups as u64);
    }

    #[test]
    fn test_stats_clamp() {
        let stats = SurfaceStats::clamped(120, 100);
        assert_eq!(stats.count, 100);
        assert_eq!(stats.dropped, 20);
        assert!(stats.overflowed());
        assert!(!SurfaceStats::clamped(5, 100).overflowed());
    }

    #[test]
    fn test_dense_clear_only_on_overflow() {
        let ok = SurfaceDispatch::derive(&SurfaceStats::clamped(65, 100), 512);
        assert_eq!(ok.sparse.x, 2);
        assert_eq!(ok.dense.total_groups(), 0);
        let over = SurfaceDispatch::derive(&SurfaceStats::clamped(130, 100), 512);
        assert_eq!(over.dense.x, 512);
    }
}
