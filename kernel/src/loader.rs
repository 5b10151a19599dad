//! Loads a NOFF user program into a fresh address space (§4.4, §4.8).
//!
//! A program "binary" here is just a byte buffer matching
//! [`vm::noff::NoffHeader`]'s layout — reading one off a host filesystem
//! or assembling one in memory for a demo scenario both work, since
//! everything downstream only ever sees the bytes.

use std::sync::Arc;

use filesystem::FileSystem;
use threads::thread::ThreadId;
use vm::Vm;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Filesystem(#[from] filesystem::Error),
    #[error(transparent)]
    AddrSpace(#[from] vm::AddrSpaceError),
}

/// Reads `path` out of `fs` in full and loads it into a fresh address
/// space bound to `tid`, then points the machine's registers at its
/// entry point.
pub fn load_program(fs: &FileSystem, path: &str, tid: ThreadId, vm: &Vm) -> Result<(), LoadError> {
    let file = fs.open(path)?;
    let mut image = vec![0u8; file.length() as usize];
    file.read_at(&mut image, 0);
    load_image(&image, tid, vm)
}

/// Loads an in-memory NOFF image (bypassing the filesystem — used by
/// demo scenarios that build a tiny synthetic program).
pub fn load_image(image: &[u8], tid: ThreadId, vm: &Vm) -> Result<(), LoadError> {
    let space = vm::AddrSpace::load(tid, image, &vm.machine, &vm.frames, &vm.backing, &vm.config)?;
    space.init_registers(&vm.machine);
    vm::bind(tid, space);
    Ok(())
}

/// Mounts (formatting if `format` is set) the filesystem backing a demo
/// run.
pub fn mount_filesystem(disk: Arc<dyn filesystem::SynchDisk>, format: bool) -> FileSystem {
    if format {
        FileSystem::format(disk, 0)
    } else {
        FileSystem::mount(disk)
    }
}
