//! Error types for the voxel GI pipeline

use std::time::Duration;

use thiserror::Error;

use crate::render::sync::SyncError;
use crate::voxel::layout::GridError;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid voxel grid: {0}")]
    Grid(#[from] GridError),

    #[error("Capacity exceeded: {0}")]
    Capacity(#[from] CapacityError),

    #[error("Storage texture format {0:?} is not supported by this adapter")]
    UnsupportedFormat(wgpu::TextureFormat),

    #[error("Resource ordering violation: {0}")]
    Sync(#[from] SyncError),

    #[error("GPU did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Cannot change {0} on a built voxel context")]
    Reconfigure(&'static str),

    #[error("Stale or foreign resource handle")]
    StaleHandle,
}

/// A fixed-capacity container was asked to hold more than it can
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{what}: {requested} requested, capacity {capacity}")]
pub struct CapacityError {
    pub what: &'static str,
    pub requested: usize,
    pub capacity: usize,
}

impl CapacityError {
    /// Return `Err` when `requested` exceeds `capacity`
    pub fn check(what: &'static str, requested: usize, capacity: usize) -> Result<(), CapacityError> {
        if requested > capacity {
            Err(CapacityError { what, requested, capacity })
        } else {
            Ok(())
        }
    }
}
