use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use super::nodes::fetch_node;
use super::VirtualFs;
use crate::error::{VfsError, VfsResult};
use crate::paths;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SystemStats {
    pub total_items: u64,
    pub total_directories: u64,
    pub total_files: u64,
    /// Logical bytes across all files.
    pub total_size: u64,
    pub chunked_files: u64,
    pub total_chunks: u64,
    /// Size of the database file itself, `page_count * page_size`.
    pub database_size: u64,
    pub last_updated: DateTime<Utc>,
}

impl VirtualFs {
    pub fn get_system_stats(&self) -> VfsResult<SystemStats> {
        let conn = self.reader()?;
        let (total_items, total_directories, total_files, total_size, chunked_files) = conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN is_directory = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_directory = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_directory = 0 THEN size ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_chunked = 1 THEN 1 ELSE 0 END), 0)
                 FROM virtual_files",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )?;
        let total_chunks: i64 = conn.query_row("SELECT COUNT(*) FROM file_chunks", [], |row| row.get(0))?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;

        Ok(SystemStats {
            total_items: total_items as u64,
            total_directories: total_directories as u64,
            total_files: total_files as u64,
            total_size: total_size as u64,
            chunked_files: chunked_files as u64,
            total_chunks: total_chunks as u64,
            database_size: (page_count * page_size) as u64,
            last_updated: Utc::now(),
        })
    }

    /// Sum of the sizes of every file below `path`. A file counts as its own
    /// size.
    pub fn get_directory_size(&self, path: &str) -> VfsResult<u64> {
        let path = paths::absolute(path);
        let conn = self.reader()?;
        let info = fetch_node(&conn, &path)?.ok_or_else(|| VfsError::NotFound(path.clone()))?;
        if !info.is_directory {
            return Ok(info.size);
        }
        let total: i64 = conn.query_row(
            "WITH RECURSIVE subtree(path, size, is_directory) AS (
                SELECT path, size, is_directory FROM virtual_files WHERE parent_path = ?1
                UNION ALL
                SELECT vf.path, vf.size, vf.is_directory
                FROM virtual_files vf JOIN subtree s ON vf.parent_path = s.path
            )
            SELECT COALESCE(SUM(size), 0) FROM subtree WHERE is_directory = 0",
            params![path],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }
}
