//! Table bootstrap and versioned upgrades.
//!
//! The base table is created idempotently; everything added later is an
//! ordered migration keyed by `PRAGMA user_version`. Each step commits
//! together with its version bump, so an interrupted startup resumes at the
//! first step that did not land.

use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, Connection, Transaction};

use crate::error::VfsResult;
use crate::paths::{ROOT, ROOT_NAME};

const BASE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS virtual_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL,
        parent_path TEXT,
        is_directory BOOLEAN DEFAULT 0,
        size INTEGER DEFAULT 0,
        content BLOB,
        mime_type TEXT,
        hash TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        accessed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_virtual_files_path ON virtual_files(path);
    CREATE INDEX IF NOT EXISTS idx_virtual_files_parent ON virtual_files(parent_path);
    CREATE INDEX IF NOT EXISTS idx_virtual_files_directory ON virtual_files(is_directory);
    CREATE INDEX IF NOT EXISTS idx_virtual_files_name ON virtual_files(name);
    CREATE INDEX IF NOT EXISTS idx_virtual_files_size ON virtual_files(size);";

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    apply: fn(&Transaction) -> rusqlite::Result<()>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "add is_chunked column to virtual_files",
        apply: add_is_chunked,
    },
    Migration {
        version: 2,
        description: "create file_chunks table",
        apply: create_chunk_table,
    },
];

pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

pub fn current_version(conn: &Connection) -> VfsResult<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the database up to the latest schema and make sure `/` exists.
pub fn migrate(conn: &mut Connection) -> VfsResult<()> {
    conn.execute_batch(BASE_SCHEMA)?;
    let current = current_version(conn)?;
    debug!("schema version: current={}, target={}", current, latest_version());
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!("applying migration {}: {}", migration.version, migration.description);
        let tx = conn.transaction()?;
        (migration.apply)(&tx)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
    }
    ensure_root(conn)?;
    Ok(())
}

fn ensure_root(conn: &Connection) -> VfsResult<()> {
    let now = Utc::now();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO virtual_files
            (path, name, parent_path, is_directory, size, hash, is_chunked, created_at, updated_at, accessed_at)
         VALUES (?1, ?2, NULL, 1, 0, '', 0, ?3, ?3, ?3)",
        params![ROOT, ROOT_NAME, now],
    )?;
    if inserted > 0 {
        info!("created root directory");
    }
    Ok(())
}

fn column_exists(tx: &Transaction, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_is_chunked(tx: &Transaction) -> rusqlite::Result<()> {
    if column_exists(tx, "virtual_files", "is_chunked")? {
        debug!("is_chunked column already present");
        return Ok(());
    }
    tx.execute_batch("ALTER TABLE virtual_files ADD COLUMN is_chunked BOOLEAN DEFAULT 0;")
}

fn create_chunk_table(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS file_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_data BLOB NOT NULL,
            chunk_size INTEGER NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (file_id) REFERENCES virtual_files(id) ON DELETE CASCADE,
            UNIQUE(file_id, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_file_chunks_file_id ON file_chunks(file_id);
        CREATE INDEX IF NOT EXISTS idx_file_chunks_index ON file_chunks(file_id, chunk_index);",
    )
}
