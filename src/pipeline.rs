//! Bake pipeline (Deep Fried Edition)
//!
//! [`VoxelTracer`] runs the stages of a bake in order. Each stage loads its
//! inputs from the [`VolumeStore`] by name and persists its outputs, so any
//! stage can be re-run on its own after an earlier bake.
//!
//! # Features
//!
//! - **Pre-flight**: scene and kernel checks abort before the first dispatch
//! - **Named buffers**: every output lands under `{voxel_name}_{role}`
//! - **Stage timing**: start and end of every stage go to a [`BakeObserver`]
//!
//! # Stage order
//!
//! ```text
//! clean_volumes -> generate_voxel_buffers -> capture_environment
//!   -> trace_direct_surface -> trace_direct_volumetric
//!   -> trace_environment_surface -> trace_environment_volumetric
//!   -> combine_direct_surface -> trace_bounce_surface -> trace_bounce_volumetric
//!   -> combine_surface -> combine_volumetric -> apply_post_adjustments
//! ```

use std::borrow::Cow;
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, info};

use crate::combine::BufferCombiner;
use crate::config::BakeConfig;
use crate::denoise::VolumeDenoiser;
use crate::dispatch::{DispatchStats, Dispatcher, KernelLibrary};
use crate::environment::Cubemap;
use crate::error::{BakeError, BakeResult};
use crate::grid::VoxelGrid;
use crate::kernels::VolumeKernels;
use crate::meta::{ExtractionStats, MetaRenderer, SoftwareMetaRenderer, SurfaceMetaExtractor};
use crate::observe::{BakeObserver, LogObserver, StageTiming};
use crate::post::PostProcessor;
use crate::scene::{SceneLightProvider, SceneSurfaceProvider, VisibilitySet};
use crate::trace::bounce::BounceInputs;
use crate::trace::{BounceLightTracer, BounceStats, DirectLightTracer, EnvironmentLightTracer};
use crate::volume::store::VolumeStore;
use crate::volume::{BufferRole, TexelFormat, TexelVolume, Volume3D};
use crate::voxelize::{SceneVoxelizer, VoxelizeStats};

/// Summary of a full bake
#[derive(Debug, Clone, Default)]
pub struct BakeReport {
    /// Meta extraction counters
    pub extraction: ExtractionStats,
    /// Voxelizer counters
    pub voxelize: VoxelizeStats,
    /// Surface bounce counters
    pub bounce: BounceStats,
    /// Dispatch and stall counters
    pub dispatch: DispatchStats,
    /// Wall time per stage, in order
    pub timings: Vec<StageTiming>,
}

/// Drives a bake against a volume store
pub struct VoxelTracer<'a> {
    config: BakeConfig,
    grid: VoxelGrid,
    store: &'a dyn VolumeStore,
    library: KernelLibrary,
    renderer: &'a dyn MetaRenderer,
    observer: &'a dyn BakeObserver,
    dispatcher: Dispatcher<'a>,
    environment_override: Option<Cubemap>,
    environment: Option<Cubemap>,
    timings: Mutex<Vec<StageTiming>>,
}

impl<'a> VoxelTracer<'a> {
    /// Validate and clamp `config`, derive the grid and set up dispatch
    pub fn new(config: BakeConfig, store: &'a dyn VolumeStore, kernels: &'a dyn VolumeKernels) -> BakeResult<Self> {
        config.validate()?;
        let config = config.clamped();
        let grid = config.grid()?;
        let dispatcher = Dispatcher::new(kernels, config.readback_interval, config.readback_stall_enabled);
        info!(
            "voxel tracer '{}': grid {:?} ({} voxels), {} kernels",
            config.voxel_name,
            grid.resolution_array(),
            grid.voxel_count(),
            kernels.name()
        );
        Ok(Self {
            config,
            grid,
            store,
            library: KernelLibrary::standard(),
            renderer: &SoftwareMetaRenderer,
            observer: &LogObserver,
            dispatcher,
            environment_override: None,
            environment: None,
            timings: Mutex::new(Vec::new()),
        })
    }

    /// Replace the kernel library
    pub fn with_library(mut self, library: KernelLibrary) -> Self {
        self.library = library;
        self
    }

    /// Replace the meta renderer
    pub fn with_renderer(mut self, renderer: &'a dyn MetaRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replace the stage observer
    pub fn with_observer(mut self, observer: &'a dyn BakeObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Use `cubemap` instead of capturing the configured sky
    pub fn with_environment(mut self, cubemap: Cubemap) -> Self {
        self.environment_override = Some(cubemap);
        self
    }

    /// Effective (clamped) configuration
    pub fn config(&self) -> &BakeConfig {
        &self.config
    }

    /// Bake grid
    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    /// Dispatch counters so far
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Store key of a buffer
    pub fn key(&self, role: BufferRole) -> String {
        role.key(&self.config.voxel_name)
    }

    /// Load a persisted buffer of this bake
    pub fn load(&self, role: BufferRole) -> BakeResult<TexelVolume> {
        let key = self.key(role);
        let volume = self.store.load(&key)?.ok_or_else(|| BakeError::MissingVolume(key.clone()))?;
        if volume.grid.resolution != self.grid.resolution {
            return Err(BakeError::GridMismatch {
                name: key,
                expected: self.grid.resolution_array(),
                found: volume.grid.resolution_array(),
            });
        }
        Ok(volume)
    }

    fn format_for(&self, role: BufferRole) -> TexelFormat {
        match role {
            BufferRole::FinalSurface | BufferRole::FinalVolumetric | BufferRole::Density => {
                self.config.output_format()
            }
            _ => self.config.intermediate_format,
        }
    }

    fn save(&self, role: BufferRole, volume: &TexelVolume) -> BakeResult<()> {
        let key = self.key(role);
        self.store.save(&key, volume, self.format_for(role))?;
        debug!("saved {} (total rgb {})", key, volume.total_rgb());
        Ok(())
    }

    fn stage<T>(&self, name: &'static str, f: impl FnOnce() -> BakeResult<T>) -> BakeResult<T> {
        self.observer.stage_started(name);
        let start = Instant::now();
        let out = f()?;
        let timing = StageTiming {
            stage: name,
            elapsed: start.elapsed(),
        };
        self.observer.stage_finished(&timing);
        if let Ok(mut t) = self.timings.lock() {
            t.push(timing);
        }
        Ok(out)
    }

    fn combiner(&self) -> BufferCombiner<'_> {
        BufferCombiner::new(&self.dispatcher, &self.library)
    }

    /// Reject scenes and kernel sets that cannot be baked
    pub fn preflight(&self, scene: &dyn SceneSurfaceProvider) -> BakeResult<()> {
        if scene.scene_name().trim().is_empty() {
            return Err(BakeError::InvalidScene("scene has no name".into()));
        }
        if !scene.is_saved() {
            return Err(BakeError::InvalidScene(format!(
                "scene '{}' must be saved before baking",
                scene.scene_name()
            )));
        }
        self.library.validate()
    }

    /// Delete every persisted buffer of this bake; returns how many existed
    pub fn clean_volumes(&self) -> BakeResult<usize> {
        self.stage("clean_volumes", || {
            let mut removed = 0;
            for role in BufferRole::ALL {
                if self.store.delete(&self.key(role))? {
                    removed += 1;
                }
            }
            debug!("removed {} volumes", removed);
            Ok(removed)
        })
    }

    /// Meta extraction and six-axis voxelization into albedo, normal and emissive
    pub fn generate_voxel_buffers(
        &self,
        scene: &dyn SceneSurfaceProvider,
    ) -> BakeResult<(ExtractionStats, VoxelizeStats)> {
        self.stage("generate_voxel_buffers", || {
            let strategy = self.config.strategy();
            let extractor = SurfaceMetaExtractor::new(
                &self.dispatcher,
                &self.library,
                self.renderer,
                strategy.as_ref(),
                self.config.meta_settings(),
            );
            let visibility = VisibilitySet::from_lod_groups(scene.lod_groups());
            let (records, extraction) = extractor.extract(scene.surfaces(), &visibility, &self.grid.bounds())?;
            info!(
                "meta ({}, {} passes): {} records from {} surfaces, {} filtered, {} LOD-excluded",
                strategy.name(),
                strategy.pass_count(),
                extraction.records,
                extraction.surfaces,
                extraction.filtered,
                extraction.lod_excluded
            );

            let voxelizer = SceneVoxelizer::new(&self.dispatcher, &self.library, self.config.voxelize_settings());
            let (buffers, stats) = voxelizer.voxelize(&self.grid, &records)?;
            info!(
                "voxelized {} triangles into {} covered voxels",
                stats.triangles, stats.covered_voxels
            );
            self.save(BufferRole::Albedo, &buffers.albedo)?;
            self.save(BufferRole::Normal, &buffers.normal)?;
            self.save(BufferRole::Emissive, &buffers.emissive)?;
            Ok((extraction, stats))
        })
    }

    fn capture(&self) -> Option<Cubemap> {
        if !self.config.enable_environment {
            return None;
        }
        Some(match &self.environment_override {
            Some(cubemap) => cubemap.clone(),
            None => Cubemap::capture(&self.config.sky, self.config.environment_resolution),
        })
    }

    fn environment(&self) -> Option<Cow<'_, Cubemap>> {
        if !self.config.enable_environment {
            return None;
        }
        match &self.environment {
            Some(cubemap) => Some(Cow::Borrowed(cubemap)),
            None => self.capture().map(Cow::Owned),
        }
    }

    /// Capture the environment cubemap (kept in memory only)
    pub fn capture_environment(&mut self) -> BakeResult<()> {
        let captured = self.stage("capture_environment", || {
            let cubemap = self.capture();
            match &cubemap {
                Some(c) => debug!("environment captured at {}²", c.resolution()),
                None => debug!("environment disabled"),
            }
            Ok(cubemap)
        })?;
        self.environment = captured;
        Ok(())
    }

    /// Direct light at surface voxels
    pub fn trace_direct_surface(&self, scene: &dyn SceneLightProvider) -> BakeResult<()> {
        self.stage("trace_direct_surface", || {
            let albedo = self.load(BufferRole::Albedo)?;
            let normal = self.load(BufferRole::Normal)?;
            let tracer = DirectLightTracer::new(&self.dispatcher, &self.library, self.config.direct_settings());
            let light = tracer.trace_surface(&albedo, &normal, &scene.lights())?;
            self.save(BufferRole::DirectSurface, &light)
        })
    }

    /// Direct light in every voxel
    pub fn trace_direct_volumetric(&self, scene: &dyn SceneLightProvider) -> BakeResult<()> {
        self.stage("trace_direct_volumetric", || {
            let albedo = self.load(BufferRole::Albedo)?;
            let tracer = DirectLightTracer::new(&self.dispatcher, &self.library, self.config.direct_settings());
            let light = tracer.trace_volumetric(&albedo, &scene.lights())?;
            self.save(BufferRole::DirectVolumetric, &light)
        })
    }

    /// Environment light at surface voxels; zeros when the environment is disabled
    pub fn trace_environment_surface(&self) -> BakeResult<()> {
        self.stage("trace_environment_surface", || {
            let light = match self.environment() {
                Some(env) => {
                    let albedo = self.load(BufferRole::Albedo)?;
                    let normal = self.load(BufferRole::Normal)?;
                    let tracer =
                        EnvironmentLightTracer::new(&self.dispatcher, &self.library, self.config.environment_settings());
                    tracer.trace_surface(&albedo, &normal, &*env)?
                }
                None => Volume3D::new(self.grid),
            };
            self.save(BufferRole::EnvironmentSurface, &light)
        })
    }

    /// Environment light in every voxel; zeros when the environment is disabled
    pub fn trace_environment_volumetric(&self) -> BakeResult<()> {
        self.stage("trace_environment_volumetric", || {
            let light = match self.environment() {
                Some(env) => {
                    let albedo = self.load(BufferRole::Albedo)?;
                    let tracer =
                        EnvironmentLightTracer::new(&self.dispatcher, &self.library, self.config.environment_settings());
                    tracer.trace_volumetric(&albedo, &*env)?
                }
                None => Volume3D::new(self.grid),
            };
            self.save(BufferRole::EnvironmentVolumetric, &light)
        })
    }

    fn surface_light(&self) -> BakeResult<TexelVolume> {
        let direct = self.load(BufferRole::DirectSurface)?;
        let environment = self.load(BufferRole::EnvironmentSurface)?;
        self.combiner().add(&direct, &environment)
    }

    /// `albedo * boost * (direct + environment) + emissive`, the bounce seed
    pub fn combine_direct_surface(&self) -> BakeResult<()> {
        self.stage("combine_direct_surface", || {
            let albedo = self.load(BufferRole::Albedo)?;
            let emissive = self.load(BufferRole::Emissive)?;
            let light = self.surface_light()?;
            let seed = self.combiner().shade(
                &albedo,
                &light,
                self.config.albedo_boost,
                &emissive,
                self.config.emissive_intensity,
            )?;
            self.save(BufferRole::CombinedDirectSurface, &seed)
        })
    }

    /// Multi-bounce indirect light at surface voxels
    pub fn trace_bounce_surface(&self) -> BakeResult<BounceStats> {
        self.stage("trace_bounce_surface", || {
            let albedo = self.load(BufferRole::Albedo)?;
            let normal = self.load(BufferRole::Normal)?;
            let emissive = self.load(BufferRole::Emissive)?;
            let seed = self.load(BufferRole::CombinedDirectSurface)?;
            let surface_light = self.surface_light()?;

            let tracer = BounceLightTracer::new(&self.dispatcher, &self.library, self.config.bounce_settings());
            let bounce = tracer.trace_surface(BounceInputs {
                albedo: &albedo,
                normal: &normal,
                emissive: &emissive,
                surface_light: &surface_light,
                seed: &seed,
            })?;
            info!(
                "bounce: {} iterations, {} gathers, {} source refreshes",
                bounce.stats.iterations, bounce.stats.samples_dispatched, bounce.stats.source_refreshes
            );
            self.save(BufferRole::BounceSurface, &bounce.light)?;
            Ok(bounce.stats)
        })
    }

    /// Source the surface bounce ended with, rebuilt from persisted buffers
    fn final_bounce_source(&self, albedo: &TexelVolume) -> BakeResult<TexelVolume> {
        if self.config.bounce_settings().clamped_bounces() <= 1 {
            return self.load(BufferRole::CombinedDirectSurface);
        }
        let emissive = self.load(BufferRole::Emissive)?;
        let gathered = self.load(BufferRole::BounceSurface)?;
        let combiner = self.combiner();
        let incoming = combiner.add(&self.surface_light()?, &gathered)?;
        combiner.shade(
            albedo,
            &incoming,
            self.config.albedo_boost,
            &emissive,
            self.config.emissive_intensity,
        )
    }

    /// Indirect light in every voxel, gathered from the final bounce source
    pub fn trace_bounce_volumetric(&self) -> BakeResult<()> {
        self.stage("trace_bounce_volumetric", || {
            let albedo = self.load(BufferRole::Albedo)?;
            let source = self.final_bounce_source(&albedo)?;
            let tracer = BounceLightTracer::new(&self.dispatcher, &self.library, self.config.bounce_settings());
            let light = tracer.trace_volumetric(&albedo, &source)?;
            self.save(BufferRole::BounceVolumetric, &light)
        })
    }

    /// `albedo * boost * (direct + environment + bounce) + emissive`
    pub fn combine_surface(&self) -> BakeResult<()> {
        self.stage("combine_surface", || {
            let albedo = self.load(BufferRole::Albedo)?;
            let emissive = self.load(BufferRole::Emissive)?;
            let bounce = self.load(BufferRole::BounceSurface)?;
            let combiner = self.combiner();
            let light = combiner.add(&self.surface_light()?, &bounce)?;
            let combined = combiner.shade(
                &albedo,
                &light,
                self.config.albedo_boost,
                &emissive,
                self.config.emissive_intensity,
            )?;
            self.save(BufferRole::CombinedSurface, &combined)
        })
    }

    /// Denoised `direct + environment + bounce` volumetric light
    pub fn combine_volumetric(&self) -> BakeResult<()> {
        self.stage("combine_volumetric", || {
            let direct = self.load(BufferRole::DirectVolumetric)?;
            let environment = self.load(BufferRole::EnvironmentVolumetric)?;
            let bounce = self.load(BufferRole::BounceVolumetric)?;
            let sum = self.combiner().sum(&direct, &[&environment, &bounce])?;
            let denoiser = VolumeDenoiser::new(&self.dispatcher, &self.library, self.config.volumetric_denoise_samples);
            let combined = denoiser.denoise(&sum)?;
            self.save(BufferRole::CombinedVolumetric, &combined)
        })
    }

    /// Grade the combined buffers and pack density
    pub fn apply_post_adjustments(&self) -> BakeResult<()> {
        self.stage("apply_post_adjustments", || {
            let albedo = self.load(BufferRole::Albedo)?;
            let surface = self.load(BufferRole::CombinedSurface)?;
            let volumetric = self.load(BufferRole::CombinedVolumetric)?;
            let post = PostProcessor::new(&self.dispatcher, &self.library, self.config.post);
            let out = post.apply(&surface, &volumetric, &albedo)?;
            self.save(BufferRole::FinalSurface, &out.final_surface)?;
            self.save(BufferRole::FinalVolumetric, &out.final_volumetric)?;
            match &out.density {
                Some(density) => self.save(BufferRole::Density, density)?,
                None => {
                    self.store.delete(&self.key(BufferRole::Density))?;
                }
            }
            Ok(())
        })
    }

    /// Run every stage in order
    pub fn bake(
        &mut self,
        surfaces: &dyn SceneSurfaceProvider,
        lights: &dyn SceneLightProvider,
    ) -> BakeResult<BakeReport> {
        self.preflight(surfaces)?;
        if let Ok(mut t) = self.timings.lock() {
            t.clear();
        }
        let bake_start = Instant::now();

        self.clean_volumes()?;
        let (extraction, voxelize) = self.generate_voxel_buffers(surfaces)?;
        self.capture_environment()?;
        self.trace_direct_surface(lights)?;
        self.trace_direct_volumetric(lights)?;
        self.trace_environment_surface()?;
        self.trace_environment_volumetric()?;
        self.combine_direct_surface()?;
        let bounce = self.trace_bounce_surface()?;
        self.trace_bounce_volumetric()?;
        self.combine_surface()?;
        self.combine_volumetric()?;
        self.apply_post_adjustments()?;

        let dispatch = self.dispatcher.stats();
        info!(
            "bake '{}' finished in {:.2} s: {} dispatches, {} readback stalls",
            self.config.voxel_name,
            bake_start.elapsed().as_secs_f64(),
            dispatch.dispatches,
            dispatch.stalls
        );
        let timings = self.timings.lock().map(|t| t.clone()).unwrap_or_default();
        Ok(BakeReport {
            extraction,
            voxelize,
            bounce,
            dispatch,
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::CpuKernels;
    use crate::scene::StaticScene;
    use crate::volume::store::MemoryVolumeStore;
    use glam::{UVec3, Vec3};

    fn config() -> BakeConfig {
        BakeConfig {
            voxel_name: "Unit".into(),
            volume_size: Vec3::splat(4.0),
            resolution_override: Some(UVec3::splat(4)),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let store = MemoryVolumeStore::new();
        let cpu = CpuKernels;
        let bad = BakeConfig {
            voxel_name: String::new(),
            ..config()
        };
        assert!(matches!(VoxelTracer::new(bad, &store, &cpu), Err(BakeError::Config(_))));
    }

    #[test]
    fn test_missing_input_is_missing_volume() {
        let store = MemoryVolumeStore::new();
        let cpu = CpuKernels;
        let tracer = VoxelTracer::new(config(), &store, &cpu).unwrap();
        match tracer.combine_direct_surface() {
            Err(BakeError::MissingVolume(key)) => assert_eq!(key, "Unit_albedo"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_grid_mismatch_on_load() {
        let store = MemoryVolumeStore::new();
        let cpu = CpuKernels;
        let tracer = VoxelTracer::new(config(), &store, &cpu).unwrap();
        let other = VoxelGrid::new(Vec3::ZERO, Vec3::splat(4.0), UVec3::splat(2)).unwrap();
        store
            .save("Unit_albedo", &Volume3D::new(other), TexelFormat::Rgba32Float)
            .unwrap();
        assert!(matches!(
            tracer.load(BufferRole::Albedo),
            Err(BakeError::GridMismatch { .. })
        ));
    }

    #[test]
    fn test_preflight() {
        let store = MemoryVolumeStore::new();
        let cpu = CpuKernels;
        let tracer = VoxelTracer::new(config(), &store, &cpu).unwrap();
        let mut scene = StaticScene::new("Room");
        tracer.preflight(&scene).unwrap();
        scene.set_saved(false);
        assert!(matches!(tracer.preflight(&scene), Err(BakeError::InvalidScene(_))));
        assert!(matches!(
            tracer.preflight(&StaticScene::new("")),
            Err(BakeError::InvalidScene(_))
        ));
    }

    #[test]
    fn test_disabled_environment_writes_zeros() {
        let store = MemoryVolumeStore::new();
        let cpu = CpuKernels;
        let cfg = BakeConfig {
            enable_environment: false,
            ..config()
        };
        let mut tracer = VoxelTracer::new(cfg, &store, &cpu).unwrap();
        tracer.capture_environment().unwrap();
        tracer.trace_environment_surface().unwrap();
        tracer.trace_environment_volumetric().unwrap();
        let zeros = tracer.load(BufferRole::EnvironmentVolumetric).unwrap();
        assert_eq!(zeros.total_rgb(), Vec3::ZERO);
        assert!(store.contains("Unit_environmentSurface"));
    }
}
