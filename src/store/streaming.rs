//! Bounded-memory transfer of file content.
//!
//! Uploads are buffered in memory only while they stay under the configured
//! small-file threshold. Past that point the buffer is flushed into ordered
//! chunk rows and the rest of the stream goes straight to chunks, so memory
//! use is bounded by `small_file_threshold + chunk_size` regardless of how
//! large the upload is.

use chrono::Utc;
use log::{debug, error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Read};

use super::nodes::{fetch_file, prepare_new_node, read_inline, NewNode};
use super::{NodeInfo, VirtualFs};
use crate::config::check_chunk_size;
use crate::error::{VfsError, VfsResult};
use crate::mime;
use crate::paths;

/// Splits a byte sequence into rows of exactly `chunk_size` bytes, except
/// for the last one.
struct ChunkWriter<'a> {
    conn: &'a Connection,
    file_id: i64,
    chunk_size: usize,
    pending: Vec<u8>,
    next_index: i64,
}

impl<'a> ChunkWriter<'a> {
    fn new(conn: &'a Connection, file_id: i64, chunk_size: usize) -> Self {
        Self { conn, file_id, chunk_size, pending: Vec::new(), next_index: 0 }
    }

    fn push(&mut self, mut data: &[u8]) -> VfsResult<()> {
        while !data.is_empty() {
            let take = (self.chunk_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == self.chunk_size {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> VfsResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO file_chunks (file_id, chunk_index, chunk_data, chunk_size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![
            self.file_id,
            self.next_index,
            self.pending,
            self.pending.len() as i64,
            Utc::now()
        ])?;
        self.next_index += 1;
        self.pending.clear();
        Ok(())
    }

    /// Write the short tail chunk, if any, and return how many chunks exist.
    fn finish(mut self) -> VfsResult<i64> {
        self.flush()?;
        Ok(self.next_index)
    }
}

impl VirtualFs {
    /// Create a file from a byte stream of unknown length.
    ///
    /// Small streams end up inline like [`VirtualFs::create_file`]; streams
    /// reaching `small_file_threshold` bytes are stored as `chunk_size` rows.
    /// `chunk_size` must be non-zero and no larger than
    /// [`MAX_CHUNK_SIZE`](crate::config::MAX_CHUNK_SIZE).
    /// The whole create is one transaction: if the source fails part-way the
    /// node and every chunk written for it are discarded before the error is
    /// returned.
    pub fn create_file_streaming<R: Read>(
        &self,
        path: &str,
        mut source: R,
        chunk_size: usize,
        mime_type: Option<&str>,
    ) -> VfsResult<NodeInfo> {
        check_chunk_size(chunk_size)?;
        let path = paths::absolute(path);
        let mut conn = self.writer();
        let node = prepare_new_node(&conn, &path)?;
        let mime_type = mime_type
            .map(str::to_string)
            .unwrap_or_else(|| mime::guess(&node.name).to_string());

        let tx = conn.transaction()?;
        match self.stream_into(&tx, &node, &mime_type, &mut source, chunk_size) {
            Ok(()) => {
                let info = fetch_file(&tx, &path)?;
                tx.commit()?;
                info!(
                    "stored {} ({} bytes, {})",
                    path,
                    info.size,
                    if info.is_chunked { "chunked" } else { "inline" }
                );
                Ok(info)
            }
            Err(err) => {
                error!("streaming create of {} failed: {}", path, err);
                if let Err(e) = tx.rollback() {
                    warn!("rollback of {} failed: {}", path, e);
                }
                discard_partial(&conn, &path);
                Err(err)
            }
        }
    }

    fn stream_into<R: Read>(
        &self,
        conn: &Connection,
        node: &NewNode,
        mime_type: &str,
        source: &mut R,
        chunk_size: usize,
    ) -> VfsResult<()> {
        let now = Utc::now();
        conn.execute(
            "INSERT INTO virtual_files
                (path, name, parent_path, is_directory, size, content, mime_type, hash, is_chunked,
                 created_at, updated_at, accessed_at)
             VALUES (?1, ?2, ?3, 0, 0, NULL, ?4, '', 0, ?5, ?5, ?5)",
            params![node.path, node.name, node.parent, mime_type, now],
        )
        .map_err(|e| VfsError::from_insert(e, &node.path))?;
        let file_id = conn.last_insert_rowid();

        let threshold = self.config().small_file_threshold as u64;
        let mut chunks: Option<ChunkWriter<'_>> = None;
        let mut hasher = Sha256::new();
        let mut inline: Vec<u8> = Vec::new();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; self.config().read_buffer_size];

        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let data = &buf[..n];
            hasher.update(data);
            total += n as u64;

            if let Some(writer) = chunks.as_mut() {
                writer.push(data)?;
            } else if total >= threshold {
                debug!("{} switches to chunked storage at {} bytes", node.path, total);
                let mut writer = ChunkWriter::new(conn, file_id, chunk_size);
                writer.push(&inline)?;
                inline = Vec::new();
                writer.push(data)?;
                chunks = Some(writer);
            } else {
                inline.extend_from_slice(data);
            }
        }

        let hash = hex::encode(hasher.finalize());
        if let Some(writer) = chunks {
            let count = writer.finish()?;
            debug!("{} stored as {} chunks", node.path, count);
            conn.execute(
                "UPDATE virtual_files SET size = ?1, hash = ?2, is_chunked = 1 WHERE id = ?3",
                params![total as i64, hash, file_id],
            )?;
        } else {
            conn.execute(
                "UPDATE virtual_files SET size = ?1, content = ?2, hash = ?3, is_chunked = 0
                 WHERE id = ?4",
                params![total as i64, inline, hash, file_id],
            )?;
        }
        Ok(())
    }

    /// Metadata now, content as a lazy single-pass sequence of segments.
    ///
    /// Chunked files yield their stored chunks in order; inline files are
    /// sliced into `stream_window_size` windows. All segments come from the
    /// same read snapshot.
    pub fn read_file_streaming(&self, path: &str) -> VfsResult<(NodeInfo, ContentStream)> {
        let path = paths::absolute(path);
        let conn = self.reader()?;
        self.touch_accessed(&conn, &path);

        conn.execute_batch("BEGIN DEFERRED")?;
        let info = fetch_file(&conn, &path)?;
        let source = if info.is_chunked {
            Segments::Chunks { file_id: info.id, next_index: 0 }
        } else {
            Segments::Inline {
                content: read_inline(&conn, info.id)?,
                offset: 0,
                window: self.config().stream_window_size,
            }
        };
        debug!("streaming {} ({} bytes)", path, info.size);
        Ok((info, ContentStream { conn, source, done: false }))
    }
}

/// Best-effort removal of whatever a failed streaming create left behind.
fn discard_partial(conn: &Connection, path: &str) {
    if !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            warn!("could not abort transaction for {}: {}", path, e);
        }
    }
    let purge = || -> rusqlite::Result<(usize, usize)> {
        let file_id: Option<i64> = conn
            .query_row("SELECT id FROM virtual_files WHERE path = ?1", params![path], |row| {
                row.get(0)
            })
            .optional()?;
        match file_id {
            Some(id) => {
                let chunks = conn.execute("DELETE FROM file_chunks WHERE file_id = ?1", params![id])?;
                let nodes = conn.execute("DELETE FROM virtual_files WHERE id = ?1", params![id])?;
                Ok((nodes, chunks))
            }
            None => Ok((0, 0)),
        }
    };
    match purge() {
        Ok((0, _)) => {}
        Ok((nodes, chunks)) => {
            warn!("removed {} orphaned node and {} chunks for {}", nodes, chunks, path)
        }
        Err(e) => error!("failed to clean up partial upload of {}: {}", path, e),
    }
}

enum Segments {
    Chunks { file_id: i64, next_index: i64 },
    Inline { content: Vec<u8>, offset: usize, window: usize },
}

/// Forward-only content of one file, as returned by
/// [`VirtualFs::read_file_streaming`]. Owns its connection; the read
/// snapshot is released once the sequence is exhausted or dropped.
pub struct ContentStream {
    conn: Connection,
    source: Segments,
    done: bool,
}

impl ContentStream {
    fn next_segment(&mut self) -> VfsResult<Option<Vec<u8>>> {
        match &mut self.source {
            Segments::Chunks { file_id, next_index } => {
                let chunk: Option<Vec<u8>> = self
                    .conn
                    .prepare_cached(
                        "SELECT chunk_data FROM file_chunks WHERE file_id = ?1 AND chunk_index = ?2",
                    )?
                    .query_row(params![*file_id, *next_index], |row| row.get(0))
                    .optional()?;
                *next_index += 1;
                Ok(chunk)
            }
            Segments::Inline { content, offset, window } => {
                if *offset >= content.len() {
                    return Ok(None);
                }
                let end = (*offset + *window).min(content.len());
                let segment = content[*offset..end].to_vec();
                *offset = end;
                Ok(Some(segment))
            }
        }
    }

    fn release(&mut self) {
        self.done = true;
        if !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("COMMIT") {
                debug!("closing read snapshot: {}", e);
            }
        }
    }
}

impl Iterator for ContentStream {
    type Item = VfsResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_segment() {
            Ok(Some(segment)) => Some(Ok(segment)),
            Ok(None) => {
                self.release();
                None
            }
            Err(e) => {
                self.release();
                Some(Err(e))
            }
        }
    }
}

impl Drop for ContentStream {
    fn drop(&mut self) {
        if !self.done {
            self.release();
        }
    }
}
