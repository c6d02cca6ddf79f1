//! GPU side of the voxel build

pub mod context;
pub mod registry;
pub mod sync;
pub mod readback;
pub mod resources;
pub mod buffer;
pub mod pipeline;
pub mod atlas;
pub mod profiler;
pub mod voxel_context;

pub use atlas::{AtlasUniform, VoxelAtlasReader};
pub use context::GpuContext;
pub use resources::VoxelResources;
pub use voxel_context::VoxelPipelineContext;
