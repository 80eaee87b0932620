use thiserror::Error;

pub type VfsResult<T> = Result<T, VfsError>;

/// Failures returned by the store.
///
/// `Database`, `Io` and `Config` together form the I/O failure class: the
/// backing database, the caller's byte stream, or the store configuration
/// could not be used. Every other variant is a structural check that was
/// performed before touching any row.
#[derive(Error, Debug)]
pub enum VfsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("parent directory missing: {0}")]
    InvalidParent(String),

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("the root directory cannot be deleted or renamed")]
    RootImmutable,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl VfsError {
    pub fn is_io_failure(&self) -> bool {
        matches!(self, VfsError::Database(_) | VfsError::Io(_) | VfsError::Config(_))
    }

    /// Turn a UNIQUE violation on `path` into `AlreadyExists`; the write lock
    /// makes this unreachable in-process, but a second process sharing the
    /// database file can still race us.
    pub(crate) fn from_insert(err: rusqlite::Error, path: &str) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                VfsError::AlreadyExists(path.to_string())
            }
            other => VfsError::Database(other),
        }
    }
}
