//! Recoverable filesystem errors (§7's "resource exhaustion" and
//! "not-found" rows). Contract violations remain `panic!`/`assert!` at
//! their point of detection rather than variants here.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not enough free sectors: need {needed}, have {available}")]
    OutOfSpace { needed: usize, available: usize },
    #[error("path segment not found")]
    NotFound,
    #[error("a file already exists at that path")]
    AlreadyExists,
    #[error("path segment is not a directory")]
    NotADirectory,
    #[error("directory is full and cannot grow further")]
    DirectoryFull,
}
