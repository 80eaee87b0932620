#![allow(dead_code)]

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use sqlvfs::{VfsConfig, VirtualFs};
use std::io::{self, Read};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

pub const THRESHOLD: usize = 64 * 1024;

pub struct TestStore {
    pub vfs: VirtualFs,
    pub db_path: PathBuf,
    _dir: TempDir,
}

impl TestStore {
    /// Direct handle on the database, for checking rows the API hides.
    pub fn raw(&self) -> Connection {
        Connection::open(&self.db_path).unwrap()
    }

    pub fn chunk_rows(&self) -> i64 {
        self.raw()
            .query_row("SELECT COUNT(*) FROM file_chunks", [], |row| row.get(0))
            .unwrap()
    }

    pub fn chunk_sizes(&self, file_id: i64) -> Vec<i64> {
        let conn = self.raw();
        let mut stmt = conn
            .prepare("SELECT chunk_size FROM file_chunks WHERE file_id = ?1 ORDER BY chunk_index")
            .unwrap();
        let rows = stmt.query_map(params![file_id], |row| row.get(0)).unwrap();
        rows.collect::<Result<Vec<i64>, _>>().unwrap()
    }

    pub fn rows_for(&self, path: &str) -> i64 {
        self.raw()
            .query_row(
                "SELECT COUNT(*) FROM virtual_files WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .unwrap()
    }
}

pub fn config_in(dir: &TempDir) -> VfsConfig {
    let mut config = VfsConfig::new(dir.path().join("vfs.db"));
    config.small_file_threshold = THRESHOLD;
    config.chunk_size = 16 * 1024;
    config.read_buffer_size = 1000;
    config.stream_window_size = 4096;
    config
}

pub fn store() -> TestStore {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let db_path = config.db_path.clone();
    let vfs = VirtualFs::open(config).unwrap();
    TestStore { vfs, db_path, _dir: dir }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Yields `data` until `fail_at` bytes have been read, then errors.
pub struct FailingReader {
    data: Vec<u8>,
    pos: usize,
    fail_at: usize,
}

impl FailingReader {
    pub fn new(data: Vec<u8>, fail_at: usize) -> Self {
        Self { data, pos: 0, fail_at }
    }
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.fail_at {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "upload aborted"));
        }
        let end = (self.pos + buf.len()).min(self.fail_at).min(self.data.len());
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(n)
    }
}

/// Returns `Interrupted` before every other read.
pub struct InterruptingReader<R> {
    inner: R,
    interrupt_next: bool,
}

impl<R: Read> InterruptingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, interrupt_next: true }
    }
}

impl<R: Read> Read for InterruptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.interrupt_next {
            self.interrupt_next = false;
            return Err(io::Error::new(io::ErrorKind::Interrupted, "signal"));
        }
        self.interrupt_next = true;
        self.inner.read(buf)
    }
}

/// Hands out `len` bytes one at a time, sleeping before each.
pub struct SlowReader {
    remaining: usize,
    delay: Duration,
}

impl SlowReader {
    pub fn new(len: usize, delay: Duration) -> Self {
        Self { remaining: len, delay }
    }
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        thread::sleep(self.delay);
        buf[0] = b'x';
        self.remaining -= 1;
        Ok(1)
    }
}
