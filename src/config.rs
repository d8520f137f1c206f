//! Bake configuration
//!
//! One flat, serde-friendly struct. Missing JSON fields take their defaults.
//! [`BakeConfig::validate`] rejects settings that cannot produce a bake;
//! [`BakeConfig::clamped`] raises degenerate counts and sizes to safe minimums.

use std::fs;
use std::path::Path;

use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::environment::GradientSky;
use crate::error::{BakeError, BakeResult};
use crate::grid::VoxelGrid;
use crate::meta::hdr::HdrEncoding;
use crate::meta::{MetaExtractionStrategy, MetaSettings, SinglePassStrategy, SurfaceFilter, ThreePassStrategy};
use crate::post::PostSettings;
use crate::trace::bounce::MAX_BOUNCES;
use crate::trace::{AttenuationModel, BounceSettings, DirectSettings, EnvironmentSettings, MarchSettings};
use crate::volume::store::StoreError;
use crate::volume::TexelFormat;
use crate::voxelize::{AccumulatePolicy, VoxelizeSettings};

/// Meta extraction pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetaStrategyKind {
    /// Albedo, emissive and normal as separate layers
    ThreePass,
    /// Albedo and HDR emissive packed into 64 bits per texel
    #[default]
    SinglePass,
}

/// Every knob of a bake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
    /// Prefix of every persisted volume key
    pub voxel_name: String,

    /// Grid centre (world)
    pub volume_center: Vec3,
    /// Grid extent (world)
    pub volume_size: Vec3,
    /// World size of one voxel used to derive the resolution
    pub voxel_density_size: f32,
    /// Explicit resolution, overriding `voxel_density_size`
    pub resolution_override: Option<UVec3>,

    /// Meta pipeline
    pub meta_strategy: MetaStrategyKind,
    /// Emissive encoding of the packed pipeline
    pub hdr_encoding: HdrEncoding,
    /// Meta texels per world unit of bounds diagonal
    pub texel_density: f32,
    /// Smallest meta texture edge
    pub min_meta_resolution: u32,
    /// Dilation iterations
    pub dilation_pixel_size: u32,
    /// Only GI contributors are voxelized
    pub only_gi_contributors: bool,
    /// Only shadow casters are voxelized
    pub only_shadow_casters: bool,
    /// Skip surfaces whose bounds miss the grid
    pub require_bounds_overlap: bool,
    /// Layers that are voxelized
    pub layer_mask: u32,

    /// Disable back-face culling while voxelizing
    pub double_sided: bool,
    /// Skip records whose bounds miss the slice
    pub cull_per_slice: bool,
    /// Average albedo written from several axes
    pub blend_albedo: bool,
    /// Average emission written from several axes
    pub blend_emissive: bool,
    /// Average normals written from several axes
    pub blend_normal: bool,

    /// Direct sample dispatches, surface buffer
    pub direct_surface_samples: u32,
    /// Direct sample dispatches, volumetric buffer
    pub direct_volumetric_samples: u32,
    /// Multiplier on every light
    pub direct_intensity: f32,
    /// Falloff of local lights
    pub attenuation: AttenuationModel,

    /// Trace the environment at all
    pub enable_environment: bool,
    /// Sky used when no cubemap override is supplied
    pub sky: GradientSky,
    /// Cubemap face edge
    pub environment_resolution: u32,
    /// Environment sample dispatches, surface buffer
    pub environment_surface_samples: u32,
    /// Environment sample dispatches, volumetric buffer
    pub environment_volumetric_samples: u32,
    /// Multiplier on environment radiance
    pub environment_intensity: f32,
    /// Orient surface environment samples by the voxel normal
    pub normal_oriented_hemisphere: bool,

    /// Bounce iterations (1..=8)
    pub bounces: u32,
    /// Gather dispatches per surface bounce iteration
    pub bounce_surface_samples: u32,
    /// Gather dispatches of the volumetric bounce
    pub bounce_volumetric_samples: u32,
    /// Multiplier on gathered light
    pub indirect_intensity: f32,
    /// Multiplier on albedo wherever light is reflected
    pub albedo_boost: f32,
    /// Multiplier on emission
    pub emissive_intensity: f32,

    /// March start offset in voxels
    pub surface_offset: f32,
    /// March step in voxels
    pub ray_step: f32,
    /// Longest march in voxels
    pub max_ray_distance: f32,

    /// Dispatches between readback stalls
    pub readback_interval: u32,
    /// Enable readback stalls
    pub readback_stall_enabled: bool,

    /// Gaussian radius for volumetric buffers (0 = off)
    pub volumetric_denoise_samples: u32,
    /// Grading and density
    pub post: PostSettings,
    /// Bits per channel of the final buffers (8, 16 or 32)
    pub output_bit_depth: u32,
    /// Storage format of intermediate buffers
    pub intermediate_format: TexelFormat,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            voxel_name: "VoxelScene".to_string(),
            volume_center: Vec3::ZERO,
            volume_size: Vec3::splat(10.0),
            voxel_density_size: 0.5,
            resolution_override: None,
            meta_strategy: MetaStrategyKind::default(),
            hdr_encoding: HdrEncoding::default(),
            texel_density: 8.0,
            min_meta_resolution: 16,
            dilation_pixel_size: 2,
            only_gi_contributors: true,
            only_shadow_casters: false,
            require_bounds_overlap: true,
            layer_mask: u32::MAX,
            double_sided: false,
            cull_per_slice: true,
            blend_albedo: true,
            blend_emissive: true,
            blend_normal: false,
            direct_surface_samples: 8,
            direct_volumetric_samples: 8,
            direct_intensity: 1.0,
            attenuation: AttenuationModel::default(),
            enable_environment: true,
            sky: GradientSky::default(),
            environment_resolution: 32,
            environment_surface_samples: 16,
            environment_volumetric_samples: 16,
            environment_intensity: 1.0,
            normal_oriented_hemisphere: true,
            bounces: 2,
            bounce_surface_samples: 16,
            bounce_volumetric_samples: 16,
            indirect_intensity: 1.0,
            albedo_boost: 1.0,
            emissive_intensity: 1.0,
            surface_offset: 1.0,
            ray_step: 0.5,
            max_ray_distance: 64.0,
            readback_interval: 32,
            readback_stall_enabled: true,
            volumetric_denoise_samples: 1,
            post: PostSettings::default(),
            output_bit_depth: 16,
            intermediate_format: TexelFormat::Rgba32Float,
        }
    }
}

fn policy(blend: bool) -> AccumulatePolicy {
    if blend {
        AccumulatePolicy::Blend
    } else {
        AccumulatePolicy::FirstWriterWins
    }
}

impl BakeConfig {
    /// Parse JSON; absent fields keep their defaults
    pub fn from_json(json: &str) -> BakeResult<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()).into())
    }

    /// Pretty JSON
    pub fn to_json(&self) -> BakeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()).into())
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> BakeResult<Self> {
        let text = fs::read_to_string(path).map_err(StoreError::Io)?;
        Self::from_json(&text)
    }

    /// Save as a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> BakeResult<()> {
        fs::write(path, self.to_json()?).map_err(StoreError::Io)?;
        Ok(())
    }

    /// Reject settings that cannot produce a bake
    pub fn validate(&self) -> BakeResult<()> {
        let fail = |msg: String| Err(BakeError::Config(msg));
        if self.voxel_name.trim().is_empty() {
            return fail("voxel_name is empty".into());
        }
        if !(self.volume_size.is_finite() && self.volume_size.min_element() > 0.0) {
            return fail(format!("volume_size must be positive, got {}", self.volume_size));
        }
        if self.resolution_override.is_none() && !(self.voxel_density_size > 0.0) {
            return fail(format!(
                "voxel_density_size must be positive, got {}",
                self.voxel_density_size
            ));
        }
        if !(self.ray_step > 0.0) || !(self.max_ray_distance > 0.0) || self.surface_offset < 0.0 {
            return fail("ray march distances must be positive".into());
        }
        if !(self.texel_density > 0.0) {
            return fail(format!("texel_density must be positive, got {}", self.texel_density));
        }
        let intensities = [
            ("direct_intensity", self.direct_intensity),
            ("environment_intensity", self.environment_intensity),
            ("indirect_intensity", self.indirect_intensity),
            ("albedo_boost", self.albedo_boost),
            ("emissive_intensity", self.emissive_intensity),
        ];
        for (name, value) in intensities {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("{} must be finite and non-negative, got {}", name, value));
            }
        }
        if !matches!(self.output_bit_depth, 8 | 16 | 32) {
            return fail(format!("output_bit_depth must be 8, 16 or 32, got {}", self.output_bit_depth));
        }
        // resolution bounds live on the grid
        self.grid()?;
        Ok(())
    }

    /// Copy with degenerate counts and sizes raised to safe minimums
    pub fn clamped(&self) -> Self {
        let mut c = self.clone();
        c.resolution_override = c.resolution_override.map(|r| r.max(UVec3::ONE));
        c.min_meta_resolution = c.min_meta_resolution.max(1);
        c.environment_resolution = c.environment_resolution.max(1);
        c.direct_surface_samples = c.direct_surface_samples.max(1);
        c.direct_volumetric_samples = c.direct_volumetric_samples.max(1);
        c.environment_surface_samples = c.environment_surface_samples.max(1);
        c.environment_volumetric_samples = c.environment_volumetric_samples.max(1);
        c.bounce_surface_samples = c.bounce_surface_samples.max(1);
        c.bounce_volumetric_samples = c.bounce_volumetric_samples.max(1);
        c.bounces = c.bounces.clamp(1, MAX_BOUNCES);
        c.readback_interval = c.readback_interval.max(1);
        c
    }

    /// Grid of this bake
    pub fn grid(&self) -> BakeResult<VoxelGrid> {
        match self.resolution_override {
            Some(res) => VoxelGrid::new(self.volume_center, self.volume_size, res.max(UVec3::ONE)),
            None => VoxelGrid::from_density(self.volume_center, self.volume_size, self.voxel_density_size),
        }
    }

    /// Format of the final buffers
    pub fn output_format(&self) -> TexelFormat {
        TexelFormat::from_bit_depth(self.output_bit_depth)
    }

    /// Meta extraction settings
    pub fn meta_settings(&self) -> MetaSettings {
        MetaSettings {
            texel_density: self.texel_density,
            min_resolution: self.min_meta_resolution.max(1),
            dilation_pixel_size: self.dilation_pixel_size,
            filter: SurfaceFilter {
                only_gi_contributors: self.only_gi_contributors,
                only_shadow_casters: self.only_shadow_casters,
                require_bounds_overlap: self.require_bounds_overlap,
                layer_mask: self.layer_mask,
            },
        }
    }

    /// Meta extraction strategy
    pub fn strategy(&self) -> Box<dyn MetaExtractionStrategy> {
        match self.meta_strategy {
            MetaStrategyKind::ThreePass => Box::new(ThreePassStrategy),
            MetaStrategyKind::SinglePass => Box::new(SinglePassStrategy {
                encoding: self.hdr_encoding,
            }),
        }
    }

    /// Voxelizer settings
    pub fn voxelize_settings(&self) -> VoxelizeSettings {
        VoxelizeSettings {
            double_sided: self.double_sided,
            cull_per_slice: self.cull_per_slice,
            albedo_policy: policy(self.blend_albedo),
            emissive_policy: policy(self.blend_emissive),
            normal_policy: policy(self.blend_normal),
        }
    }

    /// Ray-march settings
    pub fn march(&self) -> MarchSettings {
        MarchSettings {
            surface_offset: self.surface_offset,
            ray_step: self.ray_step,
            max_distance: self.max_ray_distance,
        }
    }

    /// Direct tracer settings
    pub fn direct_settings(&self) -> DirectSettings {
        DirectSettings {
            surface_samples: self.direct_surface_samples,
            volumetric_samples: self.direct_volumetric_samples,
            intensity: self.direct_intensity,
            attenuation: self.attenuation,
            march: self.march(),
        }
    }

    /// Environment tracer settings
    pub fn environment_settings(&self) -> EnvironmentSettings {
        EnvironmentSettings {
            surface_samples: self.environment_surface_samples,
            volumetric_samples: self.environment_volumetric_samples,
            intensity: self.environment_intensity,
            normal_oriented_hemisphere: self.normal_oriented_hemisphere,
            march: self.march(),
        }
    }

    /// Bounce tracer settings
    pub fn bounce_settings(&self) -> BounceSettings {
        BounceSettings {
            bounces: self.bounces,
            surface_samples: self.bounce_surface_samples,
            volumetric_samples: self.bounce_volumetric_samples,
            indirect_intensity: self.indirect_intensity,
            albedo_boost: self.albedo_boost,
            emissive_intensity: self.emissive_intensity,
            march: self.march(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let c = BakeConfig::default();
        c.validate().unwrap();
        assert_eq!(c.grid().unwrap().resolution, UVec3::splat(20));
        assert_eq!(c.output_format(), TexelFormat::Rgba16Float);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c = BakeConfig::from_json(r#"{ "voxel_name": "Hall", "bounces": 3, "attenuation": "Linear" }"#).unwrap();
        assert_eq!(c.voxel_name, "Hall");
        assert_eq!(c.bounces, 3);
        assert_eq!(c.attenuation, AttenuationModel::Linear);
        assert_eq!(c.direct_surface_samples, BakeConfig::default().direct_surface_samples);
    }

    #[test]
    fn test_json_file_roundtrip() {
        let path = std::env::temp_dir().join("voxel_tracer_config_roundtrip.json");
        let mut c = BakeConfig::default();
        c.post.density = crate::post::DensityMode::Luminance(0.5);
        c.resolution_override = Some(UVec3::new(4, 5, 6));
        c.save(&path).unwrap();
        let back = BakeConfig::load(&path).unwrap();
        assert_eq!(back, c);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_bad_json_is_serialization_error() {
        let err = BakeConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, BakeError::Store(StoreError::Serialization(_))));
    }

    #[test]
    fn test_validate_rejects() {
        let cases: Vec<Box<dyn Fn(&mut BakeConfig)>> = vec![
            Box::new(|c| c.voxel_name = "  ".into()),
            Box::new(|c| c.volume_size = Vec3::new(1.0, 0.0, 1.0)),
            Box::new(|c| c.voxel_density_size = 0.0),
            Box::new(|c| c.ray_step = 0.0),
            Box::new(|c| c.indirect_intensity = f32::NAN),
            Box::new(|c| c.output_bit_depth = 12),
            Box::new(|c| c.voxel_density_size = 1e-7),
            Box::new(|c| c.resolution_override = Some(UVec3::new(8, 100_000, 8))),
        ];
        for mutate in cases {
            let mut c = BakeConfig::default();
            mutate(&mut c);
            assert!(matches!(c.validate(), Err(BakeError::Config(_))));
        }
    }

    #[test]
    fn test_clamped_raises_minimums() {
        let c = BakeConfig {
            resolution_override: Some(UVec3::new(0, 3, 0)),
            direct_surface_samples: 0,
            bounces: 0,
            min_meta_resolution: 0,
            readback_interval: 0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(c.resolution_override, Some(UVec3::new(1, 3, 1)));
        assert_eq!(c.direct_surface_samples, 1);
        assert_eq!(c.bounces, 1);
        assert_eq!(c.min_meta_resolution, 1);
        assert_eq!(c.readback_interval, 1);
        assert_eq!(BakeConfig { bounces: 99, ..Default::default() }.clamped().bounces, 8);
    }

    #[test]
    fn test_policies_follow_blend_flags() {
        let v = BakeConfig::default().voxelize_settings();
        assert_eq!(v.albedo_policy, AccumulatePolicy::Blend);
        assert_eq!(v.normal_policy, AccumulatePolicy::FirstWriterWins);
        let c = BakeConfig {
            meta_strategy: MetaStrategyKind::ThreePass,
            ..Default::default()
        };
        assert_eq!(c.strategy().pass_count(), 3);
    }
}
