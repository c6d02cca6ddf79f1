//! Scene geometry consumed by the voxel build

pub mod geometry;
pub mod procedural;

pub use geometry::{Material, MeshVertex, SceneGeometry, Submesh};
