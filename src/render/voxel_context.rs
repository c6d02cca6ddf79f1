//! Owner of everything one voxel build needs
//!
//! A [`VoxelPipelineContext`] is created once from a [`VoxelConfig`] and a
//! scene. Each [`rebuild`](VoxelPipelineContext::rebuild) records every dirty
//! cascade through all four stages into a single submission; the caller
//! decides when to [`wait`](VoxelPipelineContext::wait) for it.

use glam::Vec3;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::atlas::VoxelAtlasReader;
use crate::render::buffer::{DrawIndexedIndirect, InstanceAabb, SceneBuffers};
use crate::render::context::GpuContext;
use crate::render::pipeline::{
    CompactionPipeline, CullingPipeline, FrameContext, MipPipeline, PipelineStage, StageBuildContext,
    VoxelizePipeline,
};
use crate::render::profiler::{GpuProfiler, GpuTimings};
use crate::render::resources::VoxelResources;
use crate::render::sync::{FrameRecorder, FrameSync, Lane};
use crate::scene::SceneGeometry;
use crate::voxel::config::{CascadeSettings, CascadeTracker, VoxelConfig};
use crate::voxel::layout::GridLayout;

/// Which stages a recorded frame runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameKind {
    /// Cull, voxelize, compact with release, filter mips
    Rebuild,
    /// Cull, voxelize, compact with a dense clear, no mips
    Scan,
    /// Cull only
    Cull,
}

/// Voxel build pipeline with its resources, stages and trackers
pub struct VoxelPipelineContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: VoxelConfig,
    resources: VoxelResources,
    scene: SceneBuffers,
    culling: CullingPipeline,
    voxelize: VoxelizePipeline,
    compaction: CompactionPipeline,
    mipgen: MipPipeline,
    atlas_reader: VoxelAtlasReader,
    sync: FrameSync,
    tracker: CascadeTracker,
    profiler: Option<GpuProfiler>,
}

impl VoxelPipelineContext {
    /// Validate `config`, allocate every resource, upload `scene` and build
    /// the four stages
    pub fn new(gpu: &GpuContext, config: VoxelConfig, scene: &SceneGeometry) -> Result<Self> {
        let layout = config.layout()?;
        let capacity = layout.surface_capacity(config.surface_capacity)?;
        let device = &gpu.device;
        let queue = &gpu.queue;

        let mut resources = VoxelResources::new(&gpu.adapter, device, layout, capacity)?;
        let scene_buffers = SceneBuffers::new(
            device,
            queue,
            &mut resources.registry,
            scene,
            config.max_instances,
            config.max_materials,
            config.debug_box_capacity,
        )?;

        let mut ctx = StageBuildContext { device, resources: &mut resources, scene: &scene_buffers };
        let culling = CullingPipeline::build(&mut ctx)?;
        let voxelize = VoxelizePipeline::build(&mut ctx)?;
        let compaction = CompactionPipeline::build(&mut ctx)?;
        let mipgen = MipPipeline::build(&mut ctx)?;

        let tracker = CascadeTracker::new(CascadeSettings::from_config(&config));
        let atlas_reader = VoxelAtlasReader::new(device, queue, &mut resources, &tracker)?;

        let profiler = match (config.profiling, gpu.timestamps) {
            (true, true) => Some(GpuProfiler::new(device, queue, true)),
            (true, false) => {
                log::warn!("Profiling requested but the adapter has no timestamp queries");
                None
            }
            _ => None,
        };

        log::info!(
            "Voxel context ready: {} cascades of {}^3, {} mips, {} buffers and {} textures registered",
            layout.cascade_count(),
            layout.grid_size(),
            layout.mip_count(),
            resources.registry.buffer_count(),
            resources.registry.texture_count()
        );

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            config,
            resources,
            scene: scene_buffers,
            culling,
            voxelize,
            compaction,
            mipgen,
            atlas_reader,
            sync: FrameSync::new(),
            tracker,
            profiler,
        })
    }

    /// Move the focus point and rebuild every cascade that became dirty.
    /// Returns `None` when nothing needed rebuilding.
    pub fn rebuild(&mut self, focus: Vec3) -> Result<Option<wgpu::SubmissionIndex>> {
        self.tracker.update(focus);
        let dirty = self.tracker.take_dirty();
        if dirty.is_empty() {
            return Ok(None);
        }
        match self.record_frame(&dirty, FrameKind::Rebuild) {
            Ok(index) => Ok(Some(index)),
            Err(e) => {
                for &cascade in &dirty {
                    self.tracker.mark_dirty(cascade);
                }
                Err(e)
            }
        }
    }

    /// Cull, voxelize and compact `cascade` so its surface list and
    /// counters can be read back and compared between runs. The axis grids
    /// are cleared densely before the submission ends, so any cascade can be
    /// rebuilt or scanned next.
    pub fn scan(&mut self, cascade: u32) -> Result<wgpu::SubmissionIndex> {
        self.check_cascade(cascade)?;
        self.record_frame(&[cascade], FrameKind::Scan)
    }

    /// Re-run culling of `cascade` alone, refreshing the draw buffer, draw
    /// count and debug boxes
    pub fn cull(&mut self, cascade: u32) -> Result<wgpu::SubmissionIndex> {
        self.check_cascade(cascade)?;
        self.record_frame(&[cascade], FrameKind::Cull)
    }

    fn check_cascade(&self, cascade: u32) -> Result<()> {
        if self.tracker.region(cascade).is_none() {
            return Err(Error::Config(format!("Cascade {cascade} has no region yet")));
        }
        Ok(())
    }

    fn record_frame(&mut self, cascades: &[u32], kind: FrameKind) -> Result<wgpu::SubmissionIndex> {
        self.sync.begin_frame();
        let mut recorder = FrameRecorder::new(&self.device);
        {
            let mut frame = FrameContext {
                queue: &self.queue,
                recorder: &mut recorder,
                sync: &mut self.sync,
                resources: &self.resources,
                scene: &self.scene,
                tracker: &self.tracker,
                profiler: self.profiler.as_ref(),
            };
            for &cascade in cascades {
                self.culling.record(&mut frame, cascade)?;
                if kind == FrameKind::Cull {
                    continue;
                }
                self.voxelize.record(&mut frame, cascade)?;
                if kind == FrameKind::Scan {
                    self.compaction.record_scan(&mut frame, cascade)?;
                    continue;
                }
                self.compaction.record(&mut frame, cascade)?;
                self.mipgen.record(&mut frame, cascade)?;
            }
        }
        self.sync.end_frame()?;

        if let Some(profiler) = &self.profiler {
            profiler.resolve(recorder.encoder(Lane::Compute));
        }
        if kind == FrameKind::Rebuild {
            self.atlas_reader.update(&self.queue, &self.resources, &self.tracker)?;
        }

        log::debug!(
            "Frame {}: {:?} of cascades {:?}, {} transitions",
            self.sync.frame(),
            kind,
            cascades,
            self.sync.transitions().len()
        );
        Ok(recorder.submit(&self.queue))
    }

    /// Block until `submission` finished, bounded by the configured frame
    /// timeout
    pub fn wait(&self, submission: wgpu::SubmissionIndex) -> Result<()> {
        let timeout = self.config.frame_timeout();
        self.device
            .poll(wgpu::PollType::Wait { submission_index: Some(submission), timeout })
            .map_err(|e| match e {
                wgpu::PollError::Timeout => Error::Timeout(timeout.unwrap_or_default()),
                other => Error::Gpu(other.to_string()),
            })?;
        Ok(())
    }

    /// Replace cascade settings. Grid size and cascade count are fixed for
    /// the lifetime of the context.
    pub fn apply_settings(&mut self, settings: CascadeSettings) -> Result<()> {
        if let Some(field) = self.tracker.settings().topology_differs(&settings) {
            return Err(Error::Reconfigure(field));
        }
        self.tracker.set_settings(settings);
        Ok(())
    }

    /// Replace instance bounds and draw templates; every cascade is rebuilt
    /// on the next [`rebuild`](Self::rebuild)
    pub fn update_instances(&mut self, instances: &[InstanceAabb], templates: &[DrawIndexedIndirect]) -> Result<()> {
        self.scene.write_instances(&self.queue, &self.resources.registry, instances, templates)?;
        self.tracker.mark_all_dirty();
        Ok(())
    }

    /// Timings of the last profiled submission, `None` without profiling
    pub fn read_timings(&mut self) -> Option<GpuTimings> {
        let profiler = self.profiler.as_mut()?;
        profiler.read_results(&self.device);
        Some(profiler.latest_timings())
    }

    pub fn layout(&self) -> &GridLayout {
        self.resources.layout()
    }

    pub fn config(&self) -> &VoxelConfig {
        &self.config
    }

    pub fn resources(&self) -> &VoxelResources {
        &self.resources
    }

    pub fn scene_buffers(&self) -> &SceneBuffers {
        &self.scene
    }

    pub fn tracker(&self) -> &CascadeTracker {
        &self.tracker
    }

    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    pub fn atlas_reader(&self) -> &VoxelAtlasReader {
        &self.atlas_reader
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Destroy every GPU resource of the context
    pub fn destroy(self) -> Result<()> {
        let Self { mut resources, culling, voxelize, compaction, mipgen, .. } = self;
        culling.destroy(&mut resources.registry)?;
        voxelize.destroy(&mut resources.registry)?;
        compaction.destroy(&mut resources.registry)?;
        mipgen.destroy(&mut resources.registry)?;
        resources.destroy();
        log::info!("Voxel context destroyed");
        Ok(())
    }
}
