//! Mathematical utilities

pub mod aabb;
pub mod projection;

pub use aabb::Aabb;
pub use projection::{Axis, AxisProjection};
