//! The database-backed file tree.
//!
//! One `VirtualFs` is built at startup and shared by reference. Structural
//! mutations go through the writer connection, whose mutex is the store's
//! write lock. Reads open their own connection and rely on SQLite's WAL
//! snapshots instead of the lock.

pub mod nodes;
pub mod schema;
pub mod stats;
pub mod streaming;

use chrono::{DateTime, Utc};
use log::info;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::VfsConfig;
use crate::error::VfsResult;

pub use stats::SystemStats;
pub use streaming::ContentStream;

/// Node metadata, without content.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub parent_path: Option<String>,
    pub is_directory: bool,
    pub size: u64,
    pub mime_type: Option<String>,
    pub hash: String,
    pub is_chunked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// One row of a directory listing.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FileContent {
    pub info: NodeInfo,
    pub content: Vec<u8>,
}

pub(crate) const NODE_COLUMNS: &str = "id, path, name, parent_path, is_directory, size, mime_type, \
     hash, is_chunked, created_at, updated_at, accessed_at";

impl NodeInfo {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(NodeInfo {
            id: row.get(0)?,
            path: row.get(1)?,
            name: row.get(2)?,
            parent_path: row.get(3)?,
            is_directory: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
            size: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u64,
            mime_type: row.get(6)?,
            hash: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            is_chunked: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            accessed_at: row.get(11)?,
        })
    }
}

impl From<NodeInfo> for DirEntry {
    fn from(info: NodeInfo) -> Self {
        DirEntry {
            path: info.path,
            name: info.name,
            is_directory: info.is_directory,
            size: info.size,
            mime_type: info.mime_type,
            created_at: info.created_at,
            updated_at: info.updated_at,
            accessed_at: info.accessed_at,
        }
    }
}

pub struct VirtualFs {
    config: VfsConfig,
    writer: Mutex<Connection>,
}

impl VirtualFs {
    /// Open (creating if needed) the database named by `config.db_path` and
    /// run any pending migrations before returning.
    pub fn open(config: VfsConfig) -> VfsResult<Self> {
        config.validate()?;
        if let Some(dir) = config.db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut conn = open_connection(&config)?;
        schema::migrate(&mut conn)?;
        info!(
            "opened virtual file store at {} (schema v{})",
            config.db_path.display(),
            schema::current_version(&conn)?
        );
        Ok(Self { config, writer: Mutex::new(conn) })
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Acquire the write lock. Held for the whole of a structural mutation.
    pub(crate) fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock()
    }

    /// A fresh connection for lock-free reads.
    pub(crate) fn reader(&self) -> VfsResult<Connection> {
        open_connection(&self.config)
    }
}

fn open_connection(config: &VfsConfig) -> VfsResult<Connection> {
    let conn = Connection::open(&config.db_path)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = {};
         PRAGMA mmap_size = {};
         PRAGMA temp_store = FILE;
         PRAGMA foreign_keys = ON;",
        config.cache_size, config.mmap_size
    ))?;
    Ok(conn)
}

/// Lowercase hex SHA-256, the format stored in the `hash` column.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
