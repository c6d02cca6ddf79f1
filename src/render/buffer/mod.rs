//! GPU buffer management

pub mod scene_buffer;

pub use scene_buffer::{
    DebugBox, DrawIndexedIndirect, InstanceAabb, SceneBuffers, DRAW_INDIRECT_STRIDE,
};
