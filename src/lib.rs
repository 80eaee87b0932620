//! A file and directory tree stored in a single SQLite database.
//!
//! Small files live inline in their node row; large uploads are streamed
//! into ordered chunk rows so they never need to fit in memory.

pub mod config;
pub mod error;
pub mod mime;
pub mod paths;
pub mod store;
pub mod validate;

pub use config::VfsConfig;
pub use error::{VfsError, VfsResult};
pub use store::{content_hash, ContentStream, DirEntry, FileContent, NodeInfo, SystemStats, VirtualFs};
pub use validate::validate;
