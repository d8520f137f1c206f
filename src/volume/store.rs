//! Named volume persistence
//!
//! Every pipeline buffer is persisted under a string key (`{voxelName}_{role}`).
//! Saving a key deletes any previous volume of that key first, so a consumer never
//! reads a stale buffer from an earlier bake.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;

use super::texture3d::{self, TEXTURE3D_EXTENSION};
use super::{TexelFormat, TexelVolume};

/// Persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed container
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Container written by a newer version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Body checksum does not match the header
    #[error("CRC32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum of the body that was read
        actual: u32,
    },

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Persist/load named 3D textures
pub trait VolumeStore: Send + Sync {
    /// Persist `volume` under `key` in `format`, replacing any previous volume
    fn save(&self, key: &str, volume: &TexelVolume, format: TexelFormat) -> Result<(), StoreError>;

    /// Load the volume stored under `key`, `None` if absent
    fn load(&self, key: &str) -> Result<Option<TexelVolume>, StoreError>;

    /// Delete the volume under `key`; returns whether one existed
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether a volume exists under `key`
    fn contains(&self, key: &str) -> bool;

    /// Every stored key, sorted
    fn keys(&self) -> Vec<String>;
}

/// In-memory store holding encoded `.texture3d` images
///
/// Volumes go through the same encoder as files, so loaded texels carry the
/// quantization of their storage format.
#[derive(Debug, Default)]
pub struct MemoryVolumeStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryVolumeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded size of a stored volume in bytes
    pub fn encoded_len(&self, key: &str) -> Option<usize> {
        self.entries
            .read()
            .ok()
            .and_then(|e| e.get(key).map(|b| b.len()))
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::other("volume store lock poisoned"))
}

impl VolumeStore for MemoryVolumeStore {
    fn save(&self, key: &str, volume: &TexelVolume, format: TexelFormat) -> Result<(), StoreError> {
        let bytes = texture3d::encode_volume(volume, format)?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        entries.insert(key.to_string(), bytes);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<TexelVolume>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        entries
            .get(key)
            .map(|bytes| texture3d::decode_volume(bytes))
            .transpose()
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Directory store: one `{key}.texture3d` file per volume
#[derive(Debug, Clone)]
pub struct DirectoryVolumeStore {
    root: PathBuf,
}

impl DirectoryVolumeStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a key
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, TEXTURE3D_EXTENSION))
    }
}

impl VolumeStore for DirectoryVolumeStore {
    fn save(&self, key: &str, volume: &TexelVolume, format: TexelFormat) -> Result<(), StoreError> {
        self.delete(key)?;
        texture3d::save_texture3d(volume, format, self.path_for(key))
    }

    fn load(&self, key: &str) -> Result<Option<TexelVolume>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        texture3d::load_texture3d(path).map(Some)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    fn keys(&self) -> Vec<String> {
        let Ok(dir) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == TEXTURE3D_EXTENSION))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }
}
