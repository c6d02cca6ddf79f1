//! Frame ordering: logical queue lanes and resource ownership tracking
//!
//! wgpu exposes a single queue and inserts the memory barriers between
//! passes itself. What it cannot check is the pipeline's ownership rules:
//! every shared resource has one writer stage per frame, nobody reads a
//! resource before that writer has run, and the compaction release hands the
//! per-axis grids back zeroed before another cascade or frame uses them.
//! [`FrameSync`] validates those rules while
//! commands are recorded and keeps a log of every state or lane change.
//! [`FrameRecorder`] maps the graphics and compute lanes onto separate
//! command encoders submitted in recording order.

use std::collections::HashMap;

use thiserror::Error;

use crate::render::pipeline::Stage;

/// Logical queue a pass is recorded on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    Graphics,
    Compute,
}

/// Shared resources whose ownership is tracked
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    IndirectDraws,
    DrawCount,
    DebugBoxes,
    AxisGrids,
    Occupancy,
    SurfaceList,
    SurfaceStats,
    SurfaceDispatch,
    AtlasBase,
    AtlasMips,
}

impl ResourceId {
    /// One physical resource used by every cascade in turn, as opposed to a
    /// resource with a disjoint sub-region per cascade
    pub fn is_shared(self) -> bool {
        matches!(self, ResourceId::AxisGrids)
    }
}

/// How a resource is bound when accessed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    StorageWrite,
    StorageRead,
    Sampled,
    IndirectArgument,
    CopySource,
    CopyDestination,
    /// Handed back zeroed for the next cycle
    Released,
}

/// One access declared by a stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Write(ResourceState),
    Read(ResourceState),
    /// Owner-side clear that returns the resource to its initial contents
    Release,
}

/// A recorded state or lane change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub resource: ResourceId,
    pub stage: Stage,
    pub from_state: ResourceState,
    pub to_state: ResourceState,
    pub from_lane: Option<Lane>,
    pub to_lane: Lane,
}

impl Transition {
    /// Ownership moves between lanes
    pub fn is_lane_transfer(&self) -> bool {
        self.from_lane.is_some_and(|l| l != self.to_lane)
    }
}

/// Ordering rule violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{resource:?} written by both {first:?} and {second:?} in one frame")]
    MultipleWriters { resource: ResourceId, first: Stage, second: Stage },
    #[error("{reader:?} reads {resource:?} before any stage wrote it this frame")]
    ReadBeforeWrite { resource: ResourceId, reader: Stage },
    #[error("{stage:?} released {resource:?} it did not read")]
    ReleaseWithoutRead { resource: ResourceId, stage: Stage },
    #[error("{resource:?} was released by {releaser:?} and then touched by {stage:?}")]
    UseAfterRelease { resource: ResourceId, releaser: Stage, stage: Stage },
    #[error("{stage:?} wrote {resource:?} for cascade {cascade} while it still holds cascade {holder}")]
    SharedInUse { resource: ResourceId, stage: Stage, holder: u32, cascade: u32 },
    #[error("{resource:?} still holds cascade {holder} at the end of the frame")]
    NotReleased { resource: ResourceId, holder: u32 },
}

#[derive(Clone, Copy, Debug)]
struct Tracked {
    writer: Option<Stage>,
    readers_seen: bool,
    released_by: Option<Stage>,
    state: ResourceState,
    lane: Option<Lane>,
    /// Cascade whose data a shared resource carries until released
    holder: Option<u32>,
}

impl Default for Tracked {
    fn default() -> Self {
        Self {
            writer: None,
            readers_seen: false,
            released_by: None,
            state: ResourceState::Undefined,
            lane: None,
            holder: None,
        }
    }
}

/// Per-frame ownership validator
///
/// Resources are keyed by `(resource, cascade)` because cascades occupy
/// disjoint sub-regions and may be rebuilt in one frame. Shared resources
/// have a single key and must be released before the next cascade writes
/// them.
#[derive(Debug, Default)]
pub struct FrameSync {
    frame: u64,
    tracked: HashMap<(ResourceId, u32), Tracked>,
    transitions: Vec<Transition>,
}

impl FrameSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new frame. Ownership resets, the last state of each resource
    /// carries over.
    pub fn begin_frame(&mut self) {
        self.frame += 1;
        self.transitions.clear();
        for t in self.tracked.values_mut() {
            t.writer = None;
            t.readers_seen = false;
            t.released_by = None;
            t.holder = None;
        }
    }

    /// Check that every shared resource was handed back this frame
    pub fn end_frame(&self) -> Result<(), SyncError> {
        for (&(resource, _), t) in &self.tracked {
            if let Some(holder) = t.holder {
                return Err(SyncError::NotReleased { resource, holder });
            }
        }
        Ok(())
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Declare an access and validate it against this frame's history
    pub fn access(
        &mut self,
        stage: Stage,
        lane: Lane,
        resource: ResourceId,
        cascade: u32,
        access: Access,
    ) -> Result<(), SyncError> {
        let tracked = self.tracked.entry(Self::key(resource, cascade)).or_default();

        if let Some(releaser) = tracked.released_by {
            // Only a new writer may pick the resource up again
            let rewrite = matches!(access, Access::Write(_)) && tracked.writer.is_none_or(|w| w == stage);
            if !rewrite {
                return Err(SyncError::UseAfterRelease { resource, releaser, stage });
            }
        }

        let state = match access {
            Access::Write(state) => {
                if resource.is_shared() {
                    match tracked.holder {
                        Some(holder) if holder != cascade => {
                            return Err(SyncError::SharedInUse { resource, stage, holder, cascade });
                        }
                        _ => tracked.holder = Some(cascade),
                    }
                }
                match tracked.writer {
                    Some(first) if first != stage => {
                        return Err(SyncError::MultipleWriters { resource, first, second: stage });
                    }
                    _ => tracked.writer = Some(stage),
                }
                tracked.released_by = None;
                state
            }
            Access::Read(state) => {
                if tracked.writer.is_none() {
                    return Err(SyncError::ReadBeforeWrite { resource, reader: stage });
                }
                tracked.readers_seen = true;
                state
            }
            Access::Release => {
                if !tracked.readers_seen && tracked.writer != Some(stage) {
                    return Err(SyncError::ReleaseWithoutRead { resource, stage });
                }
                tracked.released_by = Some(stage);
                tracked.holder = None;
                ResourceState::Released
            }
        };

        if tracked.state != state || tracked.lane != Some(lane) {
            let transition = Transition {
                resource,
                stage,
                from_state: tracked.state,
                to_state: state,
                from_lane: tracked.lane,
                to_lane: lane,
            };
            log::trace!(
                "frame {} cascade {}: {:?} {:?} -> {:?} ({:?} -> {:?}) by {:?}",
                self.frame,
                cascade,
                resource,
                transition.from_state,
                transition.to_state,
                transition.from_lane,
                transition.to_lane,
                stage
            );
            self.transitions.push(transition);
            tracked.state = state;
            tracked.lane = Some(lane);
        }
        Ok(())
    }

    /// Transitions recorded since `begin_frame`
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Current state of one resource
    pub fn state(&self, resource: ResourceId, cascade: u32) -> ResourceState {
        self.tracked
            .get(&Self::key(resource, cascade))
            .map_or(ResourceState::Undefined, |t| t.state)
    }

    fn key(resource: ResourceId, cascade: u32) -> (ResourceId, u32) {
        (resource, if resource.is_shared() { 0 } else { cascade })
    }
}

/// Records commands per lane and submits them in order
///
/// A new encoder starts whenever the lane changes, so each command buffer
/// belongs to exactly one lane and submission order is the dependency order.
pub struct FrameRecorder {
    device: wgpu::Device,
    current: Option<(Lane, wgpu::CommandEncoder)>,
    finished: Vec<(Lane, wgpu::CommandBuffer)>,
}

impl FrameRecorder {
    pub fn new(device: &wgpu::Device) -> Self {
        Self { device: device.clone(), current: None, finished: Vec::new() }
    }

    /// Encoder for `lane`, opening a new command buffer on a lane change
    pub fn encoder(&mut self, lane: Lane) -> &mut wgpu::CommandEncoder {
        let switch = !matches!(&self.current, Some((l, _)) if *l == lane);
        if switch {
            self.flush();
            let label = match lane {
                Lane::Graphics => "voxel_graphics_lane",
                Lane::Compute => "voxel_compute_lane",
            };
            let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(label),
            });
            self.current = Some((lane, encoder));
        }
        match &mut self.current {
            Some((_, encoder)) => encoder,
            None => unreachable!("encoder opened above"),
        }
    }

    fn flush(&mut self) {
        if let Some((lane, encoder)) = self.current.take() {
            self.finished.push((lane, encoder.finish()));
        }
    }

    /// Submit everything in one `queue.submit`
    pub fn submit(mut self, queue: &wgpu::Queue) -> wgpu::SubmissionIndex {
        self.flush();
        log::debug!("Submitting {} command buffers", self.finished.len());
        queue.submit(self.finished.into_iter().map(|(_, buffer)| buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_cascade(sync: &mut FrameSync, cascade: u32) -> Result<(), SyncError> {
        use Access::*;
        use ResourceId::*;
        use ResourceState::*;
        sync.access(Stage::Culling, Lane::Compute, IndirectDraws, cascade, Write(StorageWrite))?;
        sync.access(Stage::Culling, Lane::Compute, DrawCount, cascade, Write(StorageWrite))?;
        sync.access(Stage::Voxelization, Lane::Graphics, IndirectDraws, cascade, Read(IndirectArgument))?;
        sync.access(Stage::Voxelization, Lane::Graphics, AxisGrids, cascade, Write(StorageWrite))?;
        sync.access(Stage::Compaction, Lane::Compute, AxisGrids, cascade, Read(Sampled))?;
        sync.access(Stage::Compaction, Lane::Compute, AtlasBase, cascade, Write(StorageWrite))?;
        sync.access(Stage::Compaction, Lane::Compute, SurfaceDispatch, cascade, Write(StorageWrite))?;
        sync.access(Stage::Compaction, Lane::Compute, SurfaceDispatch, cascade, Read(IndirectArgument))?;
        sync.access(Stage::Compaction, Lane::Compute, AxisGrids, cascade, Release)?;
        sync.access(Stage::Mip, Lane::Compute, AtlasBase, cascade, Read(Sampled))?;
        sync.access(Stage::Mip, Lane::Compute, AtlasMips, cascade, Write(StorageWrite))
    }

    #[test]
    fn test_pipeline_order_is_accepted() {
        let mut sync = FrameSync::new();
        sync.begin_frame();
        full_cascade(&mut sync, 0).unwrap();
        full_cascade(&mut sync, 1).unwrap();
        sync.end_frame().unwrap();

        // compute -> graphics transfer of the draw buffer
        assert!(sync.transitions().iter().any(|t| t.resource == ResourceId::IndirectDraws
            && t.is_lane_transfer()
            && t.to_state == ResourceState::IndirectArgument));
        // storage write -> indirect argument of the dispatch buffer
        assert!(sync.transitions().iter().any(|t| t.resource == ResourceId::SurfaceDispatch
            && t.from_state == ResourceState::StorageWrite
            && t.to_state == ResourceState::IndirectArgument));
        assert_eq!(sync.state(ResourceId::AxisGrids, 0), ResourceState::Released);
        assert_eq!(sync.state(ResourceId::AxisGrids, 1), ResourceState::Released);
    }

    #[test]
    fn test_second_writer_is_rejected() {
        let mut sync = FrameSync::new();
        sync.begin_frame();
        sync.access(Stage::Compaction, Lane::Compute, ResourceId::AtlasBase, 0, Access::Write(ResourceState::StorageWrite)).unwrap();
        let err = sync
            .access(Stage::Mip, Lane::Compute, ResourceId::AtlasBase, 0, Access::Write(ResourceState::StorageWrite))
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::MultipleWriters { resource: ResourceId::AtlasBase, first: Stage::Compaction, second: Stage::Mip }
        );
        // another cascade is a separate sub-region
        sync.access(Stage::Mip, Lane::Compute, ResourceId::AtlasBase, 1, Access::Write(ResourceState::StorageWrite)).unwrap();
    }

    #[test]
    fn test_shared_grids_need_release_between_cascades() {
        use Access::*;
        use ResourceState::*;
        let mut sync = FrameSync::new();
        sync.begin_frame();
        sync.access(Stage::Voxelization, Lane::Graphics, ResourceId::AxisGrids, 1, Write(StorageWrite)).unwrap();
        sync.access(Stage::Compaction, Lane::Compute, ResourceId::AxisGrids, 1, Read(Sampled)).unwrap();
        // Compacted without handing the grids back
        assert_eq!(sync.end_frame(), Err(SyncError::NotReleased { resource: ResourceId::AxisGrids, holder: 1 }));

        let err = sync
            .access(Stage::Voxelization, Lane::Graphics, ResourceId::AxisGrids, 0, Write(StorageWrite))
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::SharedInUse { resource: ResourceId::AxisGrids, stage: Stage::Voxelization, holder: 1, cascade: 0 }
        );

        sync.access(Stage::Compaction, Lane::Compute, ResourceId::AxisGrids, 1, Release).unwrap();
        sync.access(Stage::Voxelization, Lane::Graphics, ResourceId::AxisGrids, 0, Write(StorageWrite)).unwrap();
        assert!(sync.end_frame().is_err());
    }

    #[test]
    fn test_read_before_write_is_rejected() {
        let mut sync = FrameSync::new();
        sync.begin_frame();
        let err = sync
            .access(Stage::Mip, Lane::Compute, ResourceId::AtlasBase, 0, Access::Read(ResourceState::Sampled))
            .unwrap_err();
        assert!(matches!(err, SyncError::ReadBeforeWrite { .. }));
    }

    #[test]
    fn test_ownership_resets_each_frame() {
        let mut sync = FrameSync::new();
        sync.begin_frame();
        full_cascade(&mut sync, 0).unwrap();
        sync.begin_frame();
        assert!(sync.transitions().is_empty());
        full_cascade(&mut sync, 0).unwrap();
        assert_eq!(sync.frame(), 2);
    }

    #[test]
    fn test_use_after_release_is_rejected() {
        let mut sync = FrameSync::new();
        sync.begin_frame();
        full_cascade(&mut sync, 0).unwrap();
        let err = sync
            .access(Stage::Mip, Lane::Compute, ResourceId::AxisGrids, 0, Access::Read(ResourceState::Sampled))
            .unwrap_err();
        assert!(matches!(err, SyncError::UseAfterRelease { .. }));
    }

    #[test]
    fn test_release_requires_a_read() {
        let mut sync = FrameSync::new();
        sync.begin_frame();
        sync.access(Stage::Voxelization, Lane::Graphics, ResourceId::AxisGrids, 0, Access::Write(ResourceState::StorageWrite)).unwrap();
        let err = sync.access(Stage::Compaction, Lane::Compute, ResourceId::AxisGrids, 0, Access::Release).unwrap_err();
        assert!(matches!(err, SyncError::ReleaseWithoutRead { .. }));
    }
}
