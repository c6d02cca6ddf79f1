//! Voxel pipeline configuration and cascade placement

use std::path::Path;

use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::types::Result;
use crate::math::Aabb;
use crate::voxel::layout::{Direction, GridError, GridLayout, DEFAULT_AXIS_SCALAR};

/// Startup configuration for the voxel build pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelConfig {
    /// Cells per side of one cascade (power of two)
    pub grid_size: u32,
    /// Number of nested cascades
    pub cascade_count: u32,
    /// World units covered by cascade 0; cascade `c` covers `size * 2^c`
    pub grid_region_size: f32,
    /// Atlas mip levels including mip 0
    pub mip_count: u32,
    /// Per-axis raster supersampling
    pub axis_scalar: u32,
    /// Surface list capacity, `None` sizes it for every cell and direction
    pub surface_capacity: Option<u32>,
    /// Maximum submesh instances uploaded for culling
    pub max_instances: u32,
    /// Maximum material records
    pub max_materials: u32,
    /// Debug boxes kept per culling pass
    pub debug_box_capacity: u32,
    /// Upper bound on a frame wait, `None` blocks until the GPU finishes
    pub frame_timeout_ms: Option<u64>,
    /// Enable timestamp queries when the adapter supports them
    pub profiling: bool,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            grid_size: 64,
            cascade_count: 3,
            grid_region_size: 6.0,
            mip_count: 3,
            axis_scalar: DEFAULT_AXIS_SCALAR,
            surface_capacity: None,
            max_instances: 4096,
            max_materials: 256,
            debug_box_capacity: 4096,
            frame_timeout_ms: None,
            profiling: false,
        }
    }
}

impl VoxelConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: VoxelConfig = serde_json::from_str(&json)?;
        log::info!("Loaded voxel config from {}", path.display());
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate and derive the grid layout
    pub fn layout(&self) -> std::result::Result<GridLayout, GridError> {
        if !(self.grid_region_size.is_finite() && self.grid_region_size > 0.0) {
            return Err(GridError::InvalidRegionSize(self.grid_region_size));
        }
        GridLayout::new(self.grid_size, self.cascade_count, self.mip_count, self.axis_scalar)
    }

    pub fn frame_timeout(&self) -> Option<std::time::Duration> {
        self.frame_timeout_ms.map(std::time::Duration::from_millis)
    }
}

/// Per-rebuild cascade parameters plus the debug view selectors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CascadeSettings {
    pub cascade_count: u32,
    pub cascade_index: u32,
    pub grid_region_size: f32,
    pub grid_resolution: u32,
    /// Debug selector only
    pub current_mip: u32,
    /// Debug selector only, a direction slot index
    pub current_face: u32,
}

impl CascadeSettings {
    pub fn from_config(config: &VoxelConfig) -> Self {
        Self {
            cascade_count: config.cascade_count,
            cascade_index: 0,
            grid_region_size: config.grid_region_size,
            grid_resolution: config.grid_size,
            current_mip: 0,
            current_face: 0,
        }
    }

    /// World size covered by `cascade`
    pub fn region_size(&self, cascade: u32) -> f32 {
        self.grid_region_size * (1u32 << cascade.min(31)) as f32
    }

    /// World size of one cell in `cascade`
    pub fn voxel_size(&self, cascade: u32) -> f32 {
        self.region_size(cascade) / self.grid_resolution.max(1) as f32
    }

    /// Selected debug face, clamped to a valid slot
    pub fn debug_face(&self) -> Direction {
        Direction::from_index(self.current_face).unwrap_or(Direction::PosX)
    }

    /// Atlas sub-region picked by the debug selectors, as (origin, extent)
    pub fn debug_region(&self, layout: &GridLayout) -> (UVec3, UVec3) {
        layout.debug_region(self.cascade_index, self.current_mip, self.debug_face())
    }

    /// Name of the fixed topology field `other` would change, if any
    pub fn topology_differs(&self, other: &CascadeSettings) -> Option<&'static str> {
        if self.grid_resolution != other.grid_resolution {
            Some("grid size")
        } else if self.cascade_count != other.cascade_count {
            Some("cascade count")
        } else {
            None
        }
    }
}

/// Places cascades around a focus point and tracks which need a rebuild
///
/// Each cascade's center is snapped to its own voxel size so that small
/// focus movements leave the grid contents valid.
#[derive(Debug, Clone)]
pub struct CascadeTracker {
    settings: CascadeSettings,
    centers: Vec<Option<Vec3>>,
    dirty: Vec<bool>,
}

impl CascadeTracker {
    pub fn new(settings: CascadeSettings) -> Self {
        let n = settings.cascade_count as usize;
        Self {
            settings,
            centers: vec![None; n],
            dirty: vec![true; n],
        }
    }

    pub fn settings(&self) -> &CascadeSettings {
        &self.settings
    }

    /// Replace the debug selectors and region size. Topology is fixed.
    pub fn set_settings(&mut self, settings: CascadeSettings) {
        if settings.grid_region_size != self.settings.grid_region_size {
            self.mark_all_dirty();
        }
        self.settings = CascadeSettings {
            cascade_count: self.settings.cascade_count,
            grid_resolution: self.settings.grid_resolution,
            ..settings
        };
    }

    /// Snap `focus` onto cascade `c`'s voxel lattice
    pub fn snapped_center(&self, cascade: u32, focus: Vec3) -> Vec3 {
        let voxel = self.settings.voxel_size(cascade);
        (focus / voxel).round() * voxel
    }

    /// Move the focus point; cascades whose snapped center changed become dirty
    pub fn update(&mut self, focus: Vec3) {
        for c in 0..self.settings.cascade_count {
            let snapped = self.snapped_center(c, focus);
            let slot = &mut self.centers[c as usize];
            if *slot != Some(snapped) {
                log::debug!("Cascade {} recentered to {:?}", c, snapped);
                *slot = Some(snapped);
                self.dirty[c as usize] = true;
            }
        }
    }

    /// Geometry changed, rebuild everything
    pub fn mark_all_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = true);
    }

    pub fn mark_dirty(&mut self, cascade: u32) {
        if let Some(d) = self.dirty.get_mut(cascade as usize) {
            *d = true;
        }
    }

    pub fn is_dirty(&self, cascade: u32) -> bool {
        self.dirty.get(cascade as usize).copied().unwrap_or(false)
    }

    /// Dirty cascades in ascending order; clears the flags
    pub fn take_dirty(&mut self) -> Vec<u32> {
        let out: Vec<u32> = (0..self.settings.cascade_count)
            .filter(|&c| self.dirty[c as usize] && self.centers[c as usize].is_some())
            .collect();
        for &c in &out {
            self.dirty[c as usize] = false;
        }
        out
    }

    /// World-space region of `cascade`, `None` before the first update
    pub fn region(&self, cascade: u32) -> Option<Aabb> {
        let center = (*self.centers.get(cascade as usize)?)?;
        Some(Aabb::cube(center, self.settings.region_size(cascade)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_reference_scenario() {
        let config = VoxelConfig::default();
        let layout = config.layout().unwrap();
        assert_eq!(layout.grid_size(), 64);
        assert_eq!(layout.cascade_count(), 3);
        assert_eq!(layout.mip_count(), 3);
        assert_eq!(config.grid_region_size, 6.0);
    }

    #[test]
    fn test_load_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxel.json");
        std::fs::write(&path, r#"{ "grid_size": 32, "surface_capacity": 1000 }"#).unwrap();

        let config = VoxelConfig::load(&path).unwrap();
        assert_eq!(config.grid_size, 32);
        assert_eq!(config.surface_capacity, Some(1000));
        assert_eq!(config.cascade_count, 3);
        assert_eq!(config.frame_timeout_ms, None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("voxel.json");
        let config = VoxelConfig { profiling: true, frame_timeout_ms: Some(250), ..Default::default() };
        config.save(&path).unwrap();
        assert_eq!(VoxelConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ grid_size: ").unwrap();
        assert!(matches!(VoxelConfig::load(&path), Err(crate::core::Error::Json(_))));
    }

    #[test]
    fn test_region_size_validation() {
        let config = VoxelConfig { grid_region_size: 0.0, ..Default::default() };
        assert_eq!(config.layout(), Err(GridError::InvalidRegionSize(0.0)));
        let config = VoxelConfig { grid_size: 0, ..Default::default() };
        assert_eq!(config.layout(), Err(GridError::ZeroGridSize));
    }

    #[test]
    fn test_cascade_scale() {
        let settings = CascadeSettings::from_config(&VoxelConfig::default());
        assert_eq!(settings.region_size(0), 6.0);
        assert_eq!(settings.region_size(2), 24.0);
        assert!((settings.voxel_size(1) - 12.0 / 64.0).abs() < 1e-6);
    }

    #[test]
    fn test_tracker_marks_only_moved_cascades() {
        let settings = CascadeSettings::from_config(&VoxelConfig::default());
        let mut tracker = CascadeTracker::new(settings);
        assert!(tracker.region(0).is_none());

        tracker.update(Vec3::ZERO);
        assert_eq!(tracker.take_dirty(), vec![0, 1, 2]);
        assert!(tracker.take_dirty().is_empty());

        // Smaller than half a cascade-0 voxel: nothing moves
        tracker.update(Vec3::new(0.03, 0.0, 0.0));
        assert!(tracker.take_dirty().is_empty());

        // Past half a cascade-0 voxel (6/64) but under half a cascade-1 voxel
        tracker.update(Vec3::new(0.06, 0.0, 0.0));
        assert_eq!(tracker.take_dirty(), vec![0]);

        tracker.mark_all_dirty();
        assert_eq!(tracker.take_dirty(), vec![0, 1, 2]);
    }

    #[test]
    fn test_tracker_keeps_topology() {
        let settings = CascadeSettings::from_config(&VoxelConfig::default());
        let mut tracker = CascadeTracker::new(settings);
        tracker.set_settings(CascadeSettings { grid_resolution: 128, current_mip: 2, ..settings });
        assert_eq!(tracker.settings().grid_resolution, 64);
        assert_eq!(tracker.settings().current_mip, 2);
        assert_eq!(settings.topology_differs(&CascadeSettings { cascade_count: 4, ..settings }), Some("cascade count"));
    }

    #[test]
    fn test_debug_region_follows_selectors() {
        let config = VoxelConfig::default();
        let layout = config.layout().unwrap();
        let settings = CascadeSettings {
            cascade_index: 1,
            current_mip: 1,
            current_face: 4,
            ..CascadeSettings::from_config(&config)
        };
        assert_eq!(
            settings.debug_region(&layout),
            layout.debug_region(1, 1, Direction::PosZ)
        );
        // Out of range face falls back to +X
        let settings = CascadeSettings { current_face: 17, ..settings };
        assert_eq!(settings.debug_face(), Direction::PosX);
    }

    #[test]
    fn test_region_is_centered_cube() {
        let settings = CascadeSettings::from_config(&VoxelConfig::default());
        let mut tracker = CascadeTracker::new(settings);
        tracker.update(Vec3::ZERO);
        let region = tracker.region(1).unwrap();
        assert_eq!(region.size(), Vec3::splat(12.0));
        assert_eq!(region.center(), Vec3::ZERO);
    }
}
