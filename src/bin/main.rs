//! voxel-tracer CLI
//!
//! Command-line interface for baking and inspecting voxel light volumes.

#![allow(
    clippy::uninlined_format_args,
    clippy::needless_pass_by_value,
    clippy::cast_precision_loss,
    clippy::doc_markdown
)]

use std::path::PathBuf;
use std::process;

use voxel_tracer::prelude::*;
use voxel_tracer::volume::texture3d::{load_texture3d, read_header};

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "voxel-tracer")]
#[command(version = voxel_tracer::VERSION)]
#[command(about = "Voxel lighting baker for volumetric fog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Bake the built-in Cornell box into a directory of .texture3d volumes
    Bake {
        /// Output directory
        #[arg(short, long, default_value = "voxel_bake")]
        output: PathBuf,
        /// Bake configuration (JSON); defaults are used for missing fields
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Cornell box edge length
        #[arg(long, default_value = "2.0")]
        size: f32,
        /// Grid resolution per axis (overrides the config)
        #[arg(short, long)]
        resolution: Option<u32>,
        /// Use the wgpu compute backend
        #[cfg(feature = "gpu")]
        #[arg(long)]
        gpu: bool,
    },

    /// Display .texture3d file information
    Info {
        /// Input file
        file: PathBuf,
    },

    /// Write the default configuration as JSON
    InitConfig {
        /// Output file
        #[arg(default_value = "voxel_tracer.json")]
        output: PathBuf,
    },
}

#[cfg(feature = "cli")]
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        #[cfg(feature = "gpu")]
        Commands::Bake {
            output,
            config,
            size,
            resolution,
            gpu,
        } => cmd_bake(output, config, size, resolution, gpu),
        #[cfg(not(feature = "gpu"))]
        Commands::Bake {
            output,
            config,
            size,
            resolution,
        } => cmd_bake(output, config, size, resolution, false),
        Commands::Info { file } => cmd_info(file),
        Commands::InitConfig { output } => cmd_init_config(output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI not enabled. Build with --features cli");
    process::exit(1);
}

#[cfg(feature = "cli")]
fn cmd_bake(
    output: PathBuf,
    config: Option<PathBuf>,
    size: f32,
    resolution: Option<u32>,
    gpu: bool,
) -> BakeResult<()> {
    let mut config = match config {
        Some(path) => BakeConfig::load(&path)?,
        None => BakeConfig {
            voxel_name: "CornellBox".into(),
            // walls sit on the box faces; keep them strictly inside the grid
            volume_size: Vec3::splat(size * 1.2),
            ..Default::default()
        },
    };
    if let Some(r) = resolution {
        config.resolution_override = Some(UVec3::splat(r));
    }

    let scene = cornell_box(size);
    let store = DirectoryVolumeStore::open(&output)?;

    #[cfg(feature = "gpu")]
    let gpu_kernels = if gpu {
        match voxel_tracer::kernels::gpu::GpuKernels::new() {
            Ok(k) => Some(k),
            Err(e) => {
                log::warn!("GPU unavailable ({}), falling back to CPU", e);
                None
            }
        }
    } else {
        None
    };
    #[cfg(not(feature = "gpu"))]
    let _ = gpu;

    let cpu = CpuKernels;
    #[cfg(feature = "gpu")]
    let kernels: &dyn VolumeKernels = match &gpu_kernels {
        Some(k) => k,
        None => &cpu,
    };
    #[cfg(not(feature = "gpu"))]
    let kernels: &dyn VolumeKernels = &cpu;

    let mut tracer = VoxelTracer::new(config, &store, kernels)?;
    let report = tracer.bake(&scene, &scene)?;

    println!("Baked {} into {}", scene.scene_name(), output.display());
    println!("  Grid:        {:?}", tracer.grid().resolution_array());
    println!("  Triangles:   {}", report.voxelize.triangles);
    println!("  Covered:     {} voxels", report.voxelize.covered_voxels);
    println!("  Bounces:     {}", report.bounce.iterations);
    println!(
        "  Dispatches:  {} ({} readback stalls)",
        report.dispatch.dispatches, report.dispatch.stalls
    );
    for t in &report.timings {
        println!("  {:<30} {:>9.2} ms", t.stage, t.elapsed.as_secs_f64() * 1000.0);
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn cmd_info(path: PathBuf) -> BakeResult<()> {
    let header = read_header(&path)?;
    let volume = load_texture3d(&path)?;
    let grid = header.grid;
    println!("File:        {}", path.display());
    println!("Version:     {}", header.version);
    println!("Format:      {:?}", header.format);
    println!("Resolution:  {:?}", grid.resolution_array());
    println!("Center:      {}", grid.center);
    println!("Size:        {}", grid.size);
    println!("Voxel size:  {}", grid.voxel_size());
    println!("CRC32:       {:#010x}", header.crc32);
    println!("Covered:     {} voxels", volume.covered_count());
    println!("Total RGB:   {}", volume.total_rgb());
    Ok(())
}

#[cfg(feature = "cli")]
fn cmd_init_config(output: PathBuf) -> BakeResult<()> {
    BakeConfig::default().save(&output)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}
