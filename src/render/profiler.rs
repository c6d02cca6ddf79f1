//! GPU profiling using wgpu timestamp queries

use crate::render::pipeline::Stage;

/// Per-stage GPU timing data (in milliseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GpuTimings {
    pub cull_ms: f32,
    pub voxelize_ms: f32,
    pub compact_ms: f32,
    pub mip_ms: f32,
    pub total_gpu_ms: f32,
}

impl GpuTimings {
    /// Convert raw begin/end pairs in stage order
    pub fn from_timestamps(timestamps: &[u64], ns_per_tick: f64) -> Option<Self> {
        if timestamps.len() < TOTAL_TIMESTAMPS as usize {
            return None;
        }
        let ms = |begin: u64, end: u64| -> f32 {
            (end.wrapping_sub(begin) as f64 * ns_per_tick / 1_000_000.0) as f32
        };
        let cull_ms = ms(timestamps[0], timestamps[1]);
        let voxelize_ms = ms(timestamps[2], timestamps[3]);
        let compact_ms = ms(timestamps[4], timestamps[5]);
        let mip_ms = ms(timestamps[6], timestamps[7]);
        Some(Self {
            cull_ms,
            voxelize_ms,
            compact_ms,
            mip_ms,
            total_gpu_ms: cull_ms + voxelize_ms + compact_ms + mip_ms,
        })
    }
}

/// GPU profiler using timestamp queries
///
/// Each stage owns one begin/end pair. When several cascades are rebuilt in
/// one submission the pair is rewritten, so timings describe the last
/// cascade recorded.
pub struct GpuProfiler {
    enabled: bool,
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    read_buffer: wgpu::Buffer,
    timestamp_period: f32,
    /// Stores the latest resolved timings
    latest_timings: GpuTimings,
    /// Rolling average over N frames
    frame_timings: std::collections::VecDeque<GpuTimings>,
    max_history: usize,
}

const NUM_PASSES: u32 = 4; // cull, voxelize, compact, mip
const TIMESTAMPS_PER_PASS: u32 = 2; // begin + end
const TOTAL_TIMESTAMPS: u32 = NUM_PASSES * TIMESTAMPS_PER_PASS;

impl GpuProfiler {
    /// Requires `wgpu::Features::TIMESTAMP_QUERY` on `device`
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, enabled: bool) -> Self {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("gpu_profiler_queries"),
            ty: wgpu::QueryType::Timestamp,
            count: TOTAL_TIMESTAMPS,
        });

        let buffer_size = (TOTAL_TIMESTAMPS as u64) * std::mem::size_of::<u64>() as u64;

        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gpu_profiler_resolve"),
            size: buffer_size,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let read_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gpu_profiler_read"),
            size: buffer_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let timestamp_period = queue.get_timestamp_period();
        log::info!("GPU profiler ready (period {} ns/tick)", timestamp_period);

        Self {
            enabled,
            query_set,
            resolve_buffer,
            read_buffer,
            timestamp_period,
            latest_timings: GpuTimings::default(),
            frame_timings: std::collections::VecDeque::new(),
            max_history: 60,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Timestamp writes for a compute stage recorded as one pass
    pub fn compute_pass_timestamp_writes(&self, stage: Stage) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        if !self.enabled {
            return None;
        }
        let pass_index = stage as u32;
        Some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(pass_index * 2),
            end_of_pass_write_index: Some(pass_index * 2 + 1),
        })
    }

    /// Timestamp writes for one of a stage's render passes. The first pass
    /// writes the begin stamp and the last writes the end stamp.
    pub fn render_pass_timestamp_writes(
        &self,
        stage: Stage,
        first: bool,
        last: bool,
    ) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        if !self.enabled || !(first || last) {
            return None;
        }
        let pass_index = stage as u32;
        Some(wgpu::RenderPassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: first.then_some(pass_index * 2),
            end_of_pass_write_index: last.then_some(pass_index * 2 + 1),
        })
    }

    /// Resolve queries and copy to readable buffer. Call after all passes, before submit.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        if !self.enabled {
            return;
        }
        encoder.resolve_query_set(&self.query_set, 0..TOTAL_TIMESTAMPS, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(
            &self.resolve_buffer, 0,
            &self.read_buffer, 0,
            (TOTAL_TIMESTAMPS as u64) * std::mem::size_of::<u64>() as u64,
        );
    }

    /// Read back results of the last resolved submission
    pub fn read_results(&mut self, device: &wgpu::Device) {
        if !self.enabled {
            return;
        }

        let buffer_slice = self.read_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        // Poll device to process the map
        device.poll(wgpu::PollType::Wait { submission_index: None, timeout: None }).ok();

        if let Ok(Ok(())) = rx.try_recv() {
            let data = buffer_slice.get_mapped_range();
            let timestamps: &[u64] = bytemuck::cast_slice(&data);

            if let Some(timings) = GpuTimings::from_timestamps(timestamps, self.timestamp_period as f64) {
                log::debug!(
                    "GPU: cull {:.3}ms voxelize {:.3}ms compact {:.3}ms mip {:.3}ms",
                    timings.cull_ms,
                    timings.voxelize_ms,
                    timings.compact_ms,
                    timings.mip_ms
                );
                self.frame_timings.push_back(timings);
                if self.frame_timings.len() > self.max_history {
                    self.frame_timings.pop_front();
                }
                self.latest_timings = timings;
            }

            drop(data);
            self.read_buffer.unmap();
        }
    }

    /// Get latest per-stage timings
    pub fn latest_timings(&self) -> GpuTimings {
        self.latest_timings
    }

    /// Get averaged timings over the history window
    pub fn average_timings(&self) -> GpuTimings {
        average(self.frame_timings.iter())
    }
}

fn average<'a>(timings: impl ExactSizeIterator<Item = &'a GpuTimings>) -> GpuTimings {
    let n = timings.len();
    if n == 0 {
        return GpuTimings::default();
    }
    let mut avg = GpuTimings::default();
    for t in timings {
        avg.cull_ms += t.cull_ms;
        avg.voxelize_ms += t.voxelize_ms;
        avg.compact_ms += t.compact_ms;
        avg.mip_ms += t.mip_ms;
        avg.total_gpu_ms += t.total_gpu_ms;
    }
    let n = n as f32;
    avg.cull_ms /= n;
    avg.voxelize_ms /= n;
    avg.compact_ms /= n;
    avg.mip_ms /= n;
    avg.total_gpu_ms /= n;
    avg
}
