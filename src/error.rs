//! Error types for the bake pipeline
//!
//! Pre-flight problems (bad configuration, unsaved scene, missing kernels) abort a
//! bake before any dispatch. Per-object data gaps are not errors; they are logged
//! and skipped by the stage that meets them.

use thiserror::Error;

use crate::volume::store::StoreError;

/// Errors surfaced by the bake pipeline
#[derive(Error, Debug)]
pub enum BakeError {
    /// Invalid bake configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The host scene cannot be baked (unsaved, unnamed, ...)
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// A compute kernel the pipeline needs is not registered
    #[error("Missing compute kernel: {0}")]
    MissingKernel(&'static str),

    /// A stage input volume was never written (or was deleted)
    #[error("Missing volume: {0}")]
    MissingVolume(String),

    /// A loaded volume does not match the grid of the current bake
    #[error("Volume {name} has resolution {found:?}, expected {expected:?}")]
    GridMismatch {
        /// Volume key
        name: String,
        /// Resolution of the bake grid
        expected: [u32; 3],
        /// Resolution found in the store
        found: [u32; 3],
    },

    /// Volume persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// GPU backend failure
    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Gpu(#[from] crate::kernels::gpu::GpuError),
}

/// Result alias used across the crate
pub type BakeResult<T> = Result<T, BakeError>;
