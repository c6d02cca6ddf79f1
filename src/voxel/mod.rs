//! Voxel grid layout, configuration and CPU reference models

pub mod layout;
pub mod config;
pub mod surface;
pub mod grid;
pub mod cpu;

pub use layout::{Direction, GridError, GridLayout, NUM_DIRECTIONS};
pub use config::{CascadeSettings, CascadeTracker, VoxelConfig};
pub use surface::{DispatchIndirectCommand, SurfaceDispatch, SurfaceListEntry, SurfaceStats};
pub use grid::{AtlasVolume, AxisGrids, OccupancyVolume};
