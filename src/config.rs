use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{VfsError, VfsResult};

pub const MIB: usize = 1024 * 1024;

/// SQLite's default `SQLITE_MAX_LENGTH`; no blob, and so no chunk row, can
/// be larger.
pub const MAX_CHUNK_SIZE: usize = 1_000_000_000;

/// A chunk row size must be non-zero and fit in one SQLite blob.
pub fn check_chunk_size(chunk_size: usize) -> VfsResult<()> {
    if chunk_size == 0 {
        return Err(VfsError::Config("chunk size must be greater than zero".to_string()));
    }
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(VfsError::Config(format!(
            "chunk size {} exceeds the SQLite blob limit of {} bytes",
            chunk_size, MAX_CHUNK_SIZE
        )));
    }
    Ok(())
}

/// Store settings. Every field has a default, so a TOML file only needs the
/// keys it wants to change.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VfsConfig {
    pub db_path: PathBuf,
    /// Target size of one chunk row.
    pub chunk_size: usize,
    /// Streams reaching this many bytes are stored chunked instead of inline.
    pub small_file_threshold: usize,
    /// How much is pulled from an input stream per read.
    pub read_buffer_size: usize,
    /// Window used when handing out inline content as a stream.
    pub stream_window_size: usize,
    pub busy_timeout_ms: u64,
    /// SQLite page cache, in pages.
    pub cache_size: i64,
    pub mmap_size: i64,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/virtual_files.db"),
            chunk_size: MIB,
            small_file_threshold: MIB,
            read_buffer_size: 8192,
            stream_window_size: 64 * 1024,
            busy_timeout_ms: 5000,
            cache_size: 2000,
            mmap_size: 64 * MIB as i64,
        }
    }
}

impl VfsConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into(), ..Self::default() }
    }

    pub fn from_toml_str(text: &str) -> VfsResult<Self> {
        let config: VfsConfig =
            toml::from_str(text).map_err(|e| VfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> VfsResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VfsError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> VfsResult<()> {
        let sizes = [
            ("chunk_size", self.chunk_size),
            ("small_file_threshold", self.small_file_threshold),
            ("read_buffer_size", self.read_buffer_size),
            ("stream_window_size", self.stream_window_size),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(VfsError::Config(format!("{} must be greater than zero", field)));
            }
        }
        check_chunk_size(self.chunk_size)
    }
}
