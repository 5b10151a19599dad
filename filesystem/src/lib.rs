//! Sector-addressable disk, multi-level indexed inodes, extensible
//! directories, and path resolution (§4.6-§4.9, §6).
//!
//! Depends only on `threads`, for the [`threads::Semaphore`] that
//! serializes disk access (§4.9) — nothing here reaches back into `vm`
//! or `kernel`.

pub mod bitmap;
pub mod config;
pub mod directory;
pub mod error;
pub mod file_header;
pub mod file_system;
pub mod open_file;
pub mod synch_disk;

pub use error::Error;
pub use file_header::{FileHeader, FileKind};
pub use file_system::FileSystem;
pub use open_file::OpenFile;
pub use synch_disk::{HostFileDisk, MemDisk, SynchDisk};
