//! Reference anisotropic down-sampling, mirrors `mipgen.wgsl`

use glam::{UVec3, Vec4};

use crate::voxel::grid::{decode_unorm8, encode_unorm8, AtlasVolume};
use crate::voxel::layout::Direction;

/// Smallest representable opacity; parents of occupied children never drop below it
pub const MIN_COVERAGE: f32 = 1.0 / 255.0;

/// Filter one parent from its 2x2x2 children in one direction slot
///
/// Children are paired along the slot's axis and composited front to back,
/// where front is the child a ray travelling along the slot direction meets
/// first. The four composites are averaged.
pub fn filter_parent(children: &[[[Vec4; 2]; 2]; 2], direction: Direction) -> Vec4 {
    let axis = direction.axis().index();
    let (front_k, back_k) = if direction.is_positive() { (0, 1) } else { (1, 0) };

    let mut sum = Vec4::ZERO;
    let mut occupied = false;
    for i in 0..2 {
        for j in 0..2 {
            // children[z][y][x]
            let at = |k: usize| {
                let mut c = [0usize; 3];
                c[axis] = k;
                c[(axis + 1) % 3] = i;
                c[(axis + 2) % 3] = j;
                children[c[2]][c[1]][c[0]]
            };
            let front = at(front_k);
            let back = at(back_k);
            occupied |= front.w > 0.0 || back.w > 0.0;
            sum += front + back * (1.0 - front.w);
        }
    }
    let mut out = sum * 0.25;
    if occupied {
        out.w = out.w.max(MIN_COVERAGE);
    }
    out
}

/// Generate `level` of one cascade from `level - 1`
pub fn downsample_level(atlas: &mut AtlasVolume, cascade: u32, level: u32) {
    let g = atlas.layout().mip_resolution(level);
    for d in Direction::ALL {
        for z in 0..g {
            for y in 0..g {
                for x in 0..g {
                    let base = UVec3::new(x, y, z) * 2;
                    let mut children = [[[Vec4::ZERO; 2]; 2]; 2];
                    for (cz, plane) in children.iter_mut().enumerate() {
                        for (cy, row) in plane.iter_mut().enumerate() {
                            for (cx, child) in row.iter_mut().enumerate() {
                                let at = base + UVec3::new(cx as u32, cy as u32, cz as u32);
                                *child = decode_unorm8(atlas.slot(cascade, d, level - 1, at));
                            }
                        }
                    }
                    let parent = filter_parent(&children, d);
                    atlas.set_slot(cascade, d, level, UVec3::new(x, y, z), encode_unorm8(parent));
                }
            }
        }
    }
}

/// Levels `1..mip_count` of one cascade, in order
pub fn generate_mips(atlas: &mut AtlasVolume, cascade: u32) {
    for level in 1..atlas.layout().mip_count() {
        downsample_level(atlas, cascade, level);
    }
}
