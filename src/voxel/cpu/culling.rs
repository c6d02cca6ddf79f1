//! Reference instance culling, mirrors `cull.wgsl`

use crate::math::Aabb;
use crate::render::buffer::{DebugBox, DrawIndexedIndirect, InstanceAabb};

/// What one culling pass produces besides the masked draws
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CullOutput {
    /// Visible instances, including ones whose debug box was dropped
    pub draw_count: u32,
    /// Append list in the order this model visits instances
    pub debug_boxes: Vec<DebugBox>,
}

/// Mask `draws` in place against `volume`
///
/// Slot order of `draws` is preserved; only `instance_count` changes.
pub fn cull_instances(
    volume: &Aabb,
    instances: &[InstanceAabb],
    draws: &mut [DrawIndexedIndirect],
    debug_capacity: u32,
) -> CullOutput {
    let mut out = CullOutput::default();
    for (index, (instance, draw)) in instances.iter().zip(draws.iter_mut()).enumerate() {
        let visible = volume.overlaps_instance(instance.center(), instance.half_extent());
        draw.instance_count = visible as u32;
        if !visible {
            continue;
        }
        let slot = out.draw_count;
        out.draw_count += 1;
        if slot < debug_capacity {
            let mut center = instance.center;
            center[3] = index as f32;
            out.debug_boxes.push(DebugBox { center, half_extent: instance.half_extent });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn instance(center: Vec3, half: f32) -> InstanceAabb {
        InstanceAabb::from_aabb(&Aabb::from_center_half_extent(center, Vec3::splat(half)))
    }

    fn templates(n: usize) -> Vec<DrawIndexedIndirect> {
        (0..n)
            .map(|i| DrawIndexedIndirect { index_count: 3, first_index: 3 * i as u32, ..Default::default() })
            .collect()
    }

    #[test]
    fn test_mask_matches_intersection_set() {
        let volume = Aabb::cube(Vec3::ZERO, 6.0);
        let instances = vec![
            instance(Vec3::ZERO, 0.5),
            instance(Vec3::new(10.0, 0.0, 0.0), 0.5),
            instance(Vec3::new(3.4, 0.0, 0.0), 0.5),
            instance(Vec3::new(0.0, -3.6, 0.0), 0.5),
        ];
        let mut draws = templates(instances.len());
        let out = cull_instances(&volume, &instances, &mut draws, 16);

        let mask: Vec<u32> = draws.iter().map(|d| d.instance_count).collect();
        assert_eq!(mask, vec![1, 0, 1, 0]);
        assert_eq!(out.draw_count, 2);
        let indices: Vec<u32> = out.debug_boxes.iter().map(DebugBox::instance_index).collect();
        assert_eq!(indices, vec![0, 2]);
        // template fields untouched
        assert_eq!(draws[2].first_index, 6);
    }

    #[test]
    fn test_outside_instance_contributes_nothing() {
        let volume = Aabb::cube(Vec3::ZERO, 6.0);
        let instances = vec![instance(Vec3::splat(50.0), 1.0)];
        let mut draws = templates(1);
        draws[0].instance_count = 1;
        let out = cull_instances(&volume, &instances, &mut draws, 16);
        assert_eq!(out.draw_count, 0);
        assert_eq!(draws[0].instance_count, 0);
        assert!(out.debug_boxes.is_empty());
    }

    #[test]
    fn test_empty_and_degenerate() {
        let mut none: Vec<DrawIndexedIndirect> = Vec::new();
        assert_eq!(cull_instances(&Aabb::cube(Vec3::ZERO, 6.0), &[], &mut none, 4).draw_count, 0);

        let instances = vec![instance(Vec3::ZERO, 1.0)];
        let mut draws = templates(1);
        let out = cull_instances(&Aabb::cube(Vec3::ZERO, 0.0), &instances, &mut draws, 4);
        assert_eq!(out.draw_count, 0);
    }

    #[test]
    fn test_debug_list_clamps_but_counter_counts() {
        let volume = Aabb::cube(Vec3::ZERO, 6.0);
        let instances: Vec<_> = (0..5).map(|i| instance(Vec3::splat(i as f32 * 0.1), 0.1)).collect();
        let mut draws = templates(5);
        let out = cull_instances(&volume, &instances, &mut draws, 3);
        assert_eq!(out.draw_count, 5);
        assert_eq!(out.debug_boxes.len(), 3);
    }
}
