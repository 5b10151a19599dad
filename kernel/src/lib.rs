//! Glue crate: the trap vector, the NOFF loader, and kernel-wide
//! configuration. A command-line test harness is out of scope, which is
//! why `main.rs` is a fixed demo runner rather than a configurable one.
//!
//! Everything here is a thin seam over `threads`, `vm`, and `filesystem`:
//! this crate contributes no new subsystem of its own, only the wiring
//! between the three.

pub mod config;
pub mod loader;
pub mod trap;

pub use config::Config;
pub use trap::{ExceptionKind, FileTable, Syscall};
