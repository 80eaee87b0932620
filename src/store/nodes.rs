//! Path-addressed CRUD over the node table.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::time::Duration;

use super::{content_hash, DirEntry, FileContent, NodeInfo, VirtualFs, NODE_COLUMNS};
use crate::error::{VfsError, VfsResult};
use crate::mime;
use crate::paths::{self, ROOT};
use crate::validate::validate_name;

/// Where a node about to be created will live.
pub(crate) struct NewNode {
    pub path: String,
    pub name: String,
    pub parent: String,
}

pub(crate) fn fetch_node(conn: &Connection, path: &str) -> VfsResult<Option<NodeInfo>> {
    let node = conn
        .query_row(
            &format!("SELECT {} FROM virtual_files WHERE path = ?1", NODE_COLUMNS),
            params![path],
            NodeInfo::from_row,
        )
        .optional()?;
    Ok(node)
}

pub(crate) fn fetch_file(conn: &Connection, path: &str) -> VfsResult<NodeInfo> {
    match fetch_node(conn, path)? {
        Some(info) if !info.is_directory => Ok(info),
        _ => Err(VfsError::NotFound(path.to_string())),
    }
}

fn require_directory(conn: &Connection, path: &str) -> VfsResult<()> {
    match fetch_node(conn, path)? {
        Some(info) if info.is_directory => Ok(()),
        _ => Err(VfsError::InvalidParent(path.to_string())),
    }
}

/// Structural checks shared by every create: the name passes validation,
/// the parent is an existing directory and the path is free.
pub(crate) fn prepare_new_node(conn: &Connection, path: &str) -> VfsResult<NewNode> {
    if path == ROOT {
        return Err(VfsError::AlreadyExists(path.to_string()));
    }
    let name = paths::name_of(path);
    validate_name(&name)?;
    let parent = paths::parent_of(path).unwrap_or_else(|| ROOT.to_string());
    require_directory(conn, &parent)?;
    if fetch_node(conn, path)?.is_some() {
        return Err(VfsError::AlreadyExists(path.to_string()));
    }
    Ok(NewNode { path: path.to_string(), name, parent })
}

pub(crate) fn delete_chunks(conn: &Connection, file_id: i64) -> VfsResult<usize> {
    Ok(conn.execute("DELETE FROM file_chunks WHERE file_id = ?1", params![file_id])?)
}

pub(crate) fn read_chunks(conn: &Connection, file_id: i64) -> VfsResult<Vec<u8>> {
    let mut stmt = conn.prepare(
        "SELECT chunk_data FROM file_chunks WHERE file_id = ?1 ORDER BY chunk_index",
    )?;
    let mut rows = stmt.query(params![file_id])?;
    let mut content = Vec::new();
    while let Some(row) = rows.next()? {
        let chunk: Vec<u8> = row.get(0)?;
        content.extend_from_slice(&chunk);
    }
    Ok(content)
}

pub(crate) fn read_inline(conn: &Connection, file_id: i64) -> VfsResult<Vec<u8>> {
    let content: Option<Vec<u8>> = conn.query_row(
        "SELECT content FROM virtual_files WHERE id = ?1",
        params![file_id],
        |row| row.get(0),
    )?;
    Ok(content.unwrap_or_default())
}

/// Ids of every node below `path`, deepest first.
fn descendant_ids(conn: &Connection, path: &str) -> VfsResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE subtree(id, path, depth) AS (
            SELECT id, path, 1 FROM virtual_files WHERE parent_path = ?1
            UNION ALL
            SELECT vf.id, vf.path, s.depth + 1
            FROM virtual_files vf JOIN subtree s ON vf.parent_path = s.path
        )
        SELECT id FROM subtree ORDER BY depth DESC",
    )?;
    let ids = stmt
        .query_map(params![path], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

impl VirtualFs {
    /// Record a read of the file at `path` and return the new access time.
    ///
    /// Never waits for the write lock: while another connection holds it the
    /// update is skipped. Failure here never fails the read itself.
    pub(crate) fn touch_accessed(&self, conn: &Connection, path: &str) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let result = conn.busy_timeout(Duration::ZERO).and_then(|_| {
            conn.execute(
                "UPDATE virtual_files SET accessed_at = ?1 WHERE path = ?2 AND is_directory = 0",
                params![now, path],
            )
        });
        if let Err(e) = conn.busy_timeout(Duration::from_millis(self.config().busy_timeout_ms)) {
            warn!("could not restore busy timeout: {}", e);
        }
        match result {
            Ok(_) => Some(now),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::DatabaseBusy => {
                debug!("write lock held, access time for {} not recorded", path);
                None
            }
            Err(e) => {
                warn!("could not record access time for {}: {}", path, e);
                None
            }
        }
    }

    pub fn create_directory(&self, path: &str) -> VfsResult<NodeInfo> {
        let path = paths::absolute(path);
        let conn = self.writer();
        let node = prepare_new_node(&conn, &path)?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO virtual_files
                (path, name, parent_path, is_directory, size, content, mime_type, hash, is_chunked,
                 created_at, updated_at, accessed_at)
             VALUES (?1, ?2, ?3, 1, 0, NULL, NULL, '', 0, ?4, ?4, ?4)",
            params![node.path, node.name, node.parent, now],
        )
        .map_err(|e| VfsError::from_insert(e, &path))?;
        debug!("created directory {}", path);
        fetch_node(&conn, &path)?.ok_or(VfsError::NotFound(path))
    }

    /// Create a file whose whole content is already in memory. The content
    /// is stored inline in the node row.
    pub fn create_file(
        &self,
        path: &str,
        content: &[u8],
        mime_type: Option<&str>,
    ) -> VfsResult<NodeInfo> {
        let path = paths::absolute(path);
        let conn = self.writer();
        let node = prepare_new_node(&conn, &path)?;
        let mime_type = mime_type.unwrap_or_else(|| mime::guess(&node.name));
        let now = Utc::now();
        conn.execute(
            "INSERT INTO virtual_files
                (path, name, parent_path, is_directory, size, content, mime_type, hash, is_chunked,
                 created_at, updated_at, accessed_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7, 0, ?8, ?8, ?8)",
            params![
                node.path,
                node.name,
                node.parent,
                content.len() as i64,
                content,
                mime_type,
                content_hash(content),
                now
            ],
        )
        .map_err(|e| VfsError::from_insert(e, &path))?;
        debug!("created file {} ({} bytes)", path, content.len());
        fetch_node(&conn, &path)?.ok_or(VfsError::NotFound(path))
    }

    /// Full content of a file, reassembled from chunks when needed.
    pub fn read_file(&self, path: &str) -> VfsResult<FileContent> {
        let path = paths::absolute(path);
        let mut conn = self.reader()?;
        let (mut info, content) = {
            let tx = conn.transaction()?;
            let info = fetch_file(&tx, &path)?;
            let content = if info.is_chunked {
                read_chunks(&tx, info.id)?
            } else {
                read_inline(&tx, info.id)?
            };
            tx.commit()?;
            (info, content)
        };
        if let Some(accessed_at) = self.touch_accessed(&conn, &path) {
            info.accessed_at = accessed_at;
        }
        Ok(FileContent { info, content })
    }

    /// Replace a file's content. The new bytes are stored inline and any
    /// chunk rows from a previous chunked representation are dropped.
    pub fn write_file(&self, path: &str, content: &[u8]) -> VfsResult<NodeInfo> {
        let path = paths::absolute(path);
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let info = fetch_file(&tx, &path)?;
        if info.is_chunked {
            let dropped = delete_chunks(&tx, info.id)?;
            debug!("{} leaves chunked storage, dropped {} chunks", path, dropped);
        }
        tx.execute(
            "UPDATE virtual_files
             SET content = ?1, size = ?2, hash = ?3, is_chunked = 0, updated_at = ?4
             WHERE id = ?5",
            params![content, content.len() as i64, content_hash(content), Utc::now(), info.id],
        )?;
        let updated = fetch_file(&tx, &path)?;
        tx.commit()?;
        debug!("wrote {} ({} bytes)", path, content.len());
        Ok(updated)
    }

    /// Delete a node and, for a directory, everything below it. Returns the
    /// number of nodes removed.
    pub fn delete_path(&self, path: &str) -> VfsResult<usize> {
        let path = paths::absolute(path);
        if path == ROOT {
            return Err(VfsError::RootImmutable);
        }
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let info = fetch_node(&tx, &path)?.ok_or_else(|| VfsError::NotFound(path.clone()))?;
        let mut ids = if info.is_directory { descendant_ids(&tx, &path)? } else { Vec::new() };
        ids.push(info.id);

        let mut chunks = 0;
        for id in &ids {
            chunks += delete_chunks(&tx, *id)?;
            tx.execute("DELETE FROM virtual_files WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        info!("deleted {} ({} nodes, {} chunks)", path, ids.len(), chunks);
        Ok(ids.len())
    }

    /// Direct children, directories first, then by name. A missing path
    /// lists as empty.
    pub fn list_directory(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let path = paths::absolute(path);
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM virtual_files WHERE parent_path = ?1 ORDER BY is_directory DESC, name ASC",
            NODE_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![path], NodeInfo::from_row)?
            .map(|row| row.map(DirEntry::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Metadata only; does not touch `accessed_at`.
    pub fn get_file_info(&self, path: &str) -> VfsResult<Option<NodeInfo>> {
        let path = paths::absolute(path);
        let conn = self.reader()?;
        fetch_node(&conn, &path)
    }

    pub fn exists(&self, path: &str) -> VfsResult<bool> {
        Ok(self.get_file_info(path)?.is_some())
    }

    /// Move a node, and everything below it when it is a directory. Rows
    /// are updated in place, so ids and chunk ownership carry over.
    pub fn rename_path(&self, old_path: &str, new_path: &str) -> VfsResult<NodeInfo> {
        let old = paths::absolute(old_path);
        let new = paths::absolute(new_path);
        if old == ROOT {
            return Err(VfsError::RootImmutable);
        }
        if new == ROOT {
            return Err(VfsError::AlreadyExists(new));
        }
        let new_name = paths::name_of(&new);
        validate_name(&new_name)?;
        let new_parent = paths::parent_of(&new).unwrap_or_else(|| ROOT.to_string());

        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let source = fetch_node(&tx, &old)?.ok_or_else(|| VfsError::NotFound(old.clone()))?;
        if fetch_node(&tx, &new)?.is_some() {
            return Err(VfsError::AlreadyExists(new));
        }
        if source.is_directory && paths::is_descendant(&new, &old) {
            return Err(VfsError::InvalidParent(new_parent));
        }
        require_directory(&tx, &new_parent)?;

        let now = Utc::now();
        let mut moved = 1;
        if source.is_directory {
            let prefix = format!("{}/", old);
            let mut stmt = tx.prepare(
                "SELECT id, path FROM virtual_files
                 WHERE substr(path, 1, ?1) = ?2
                 ORDER BY LENGTH(path) DESC",
            )?;
            let descendants = stmt
                .query_map(params![prefix.chars().count() as i64, prefix], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (id, path) in descendants {
                let moved_path = format!("{}{}", new, &path[old.len()..]);
                tx.execute(
                    "UPDATE virtual_files SET path = ?1, name = ?2, parent_path = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![
                        moved_path,
                        paths::name_of(&moved_path),
                        paths::parent_of(&moved_path),
                        now,
                        id
                    ],
                )?;
                moved += 1;
            }
        }
        tx.execute(
            "UPDATE virtual_files SET path = ?1, name = ?2, parent_path = ?3, updated_at = ?4
             WHERE id = ?5",
            params![new, new_name, new_parent, now, source.id],
        )?;
        let renamed = fetch_node(&tx, &new)?.ok_or_else(|| VfsError::NotFound(new.clone()))?;
        tx.commit()?;
        info!("renamed {} -> {} ({} nodes)", old, new, moved);
        Ok(renamed)
    }
}
