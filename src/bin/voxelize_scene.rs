//! Headless voxelization of a procedural Cornell box.
//!
//! Usage: cargo run --release --bin voxelize_scene -- [CONFIG] [OPTIONS]
//!
//! Arguments:
//!   CONFIG            Voxel config JSON (default: built-in defaults)
//!
//! Options:
//!   --size <METERS>   Cornell box edge length (default: 4.0)
//!   --save <PATH>     Write the effective config as JSON

use std::path::PathBuf;
use std::time::Instant;

use glam::Vec3;

use voxcone::core::Result;
use voxcone::render::{GpuContext, VoxelPipelineContext};
use voxcone::scene::procedural;
use voxcone::voxel::{Direction, VoxelConfig};

fn main() {
    voxcone::core::logging::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).filter(|a| !a.starts_with("--")).map(PathBuf::from);
    let size = parse_f32_arg(&args, "--size").unwrap_or(4.0);

    let config = match &config_path {
        Some(path) => VoxelConfig::load(path)?,
        None => VoxelConfig::default(),
    };
    if let Some(path) = parse_str_arg(&args, "--save") {
        config.save(&PathBuf::from(path))?;
    }

    let gpu = GpuContext::new_blocking()?;
    let scene = procedural::cornell_box(size);
    log::info!(
        "Cornell box: edge {}m, {} triangles, {} submeshes",
        size,
        scene.triangle_count(),
        scene.submeshes.len()
    );

    let mut ctx = VoxelPipelineContext::new(&gpu, config, &scene)?;
    let start = Instant::now();
    if let Some(submission) = ctx.rebuild(Vec3::ZERO)? {
        ctx.wait(submission)?;
    }
    log::info!("Built {} cascades in {:.2?}", ctx.layout().cascade_count(), start.elapsed());

    // Surface buffers hold the last cascade compacted, so scan each in turn
    let layout = *ctx.layout();
    for cascade in 0..layout.cascade_count() {
        let submission = ctx.scan(cascade)?;
        ctx.wait(submission)?;
        let stats = ctx.resources().read_surface_stats(ctx.device(), ctx.queue())?;
        log::info!(
            "Cascade {}: {} surfaces ({} requested, {} dropped, capacity {})",
            cascade,
            stats.count,
            stats.requested,
            stats.dropped,
            stats.capacity
        );
    }

    let atlas = ctx.resources().read_atlas(ctx.device(), ctx.queue())?;
    for mip in 0..layout.mip_count() {
        let occupied: usize = (0..layout.cascade_count())
            .map(|c| atlas.occupied_cells(c, Direction::PosY, mip).len())
            .sum();
        log::info!("Mip {}: {} occupied +Y cells across cascades", mip, occupied);
    }

    if let Some(timings) = ctx.read_timings() {
        log::info!(
            "GPU: cull {:.3}ms voxelize {:.3}ms compact {:.3}ms mip {:.3}ms",
            timings.cull_ms,
            timings.voxelize_ms,
            timings.compact_ms,
            timings.mip_ms
        );
    }

    ctx.destroy()
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
