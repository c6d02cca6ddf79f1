//! Voxcone - sparse voxelization and cascaded voxel atlas for cone-traced GI

pub mod core;
pub mod math;
pub mod voxel;
pub mod render;
pub mod scene;
