//! The synchronous-disk abstraction (§4.9).
//!
//! The original design issues a request to an asynchronous device and
//! parks the caller on a semaphore until the device's completion
//! interrupt signals it; only the resulting synchronous interface is
//! relied upon elsewhere (§1 puts device-interrupt timing out of
//! scope). [`HostFileDisk`] reproduces the shape of that interface —
//! every request still passes through a semaphore, serializing disk
//! access exactly as the original does — backed by a plain host file
//! standing in for the simulated platter.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;
use threads::Semaphore;

use crate::config::SECTOR_SIZE;

/// Synchronous sector I/O. Implementors need not be internally
/// thread-safe beyond what `&self` methods require — serialization is
/// this trait's contract, not each implementation's.
pub trait SynchDisk: Send + Sync {
    /// Total number of addressable sectors.
    fn num_sectors(&self) -> u32;
    /// Reads exactly one sector's worth of bytes into `buf`.
    fn read_sector(&self, sector: u32, buf: &mut [u8]);
    /// Writes exactly one sector's worth of bytes from `buf`.
    fn write_sector(&self, sector: u32, buf: &[u8]);
}

/// A disk backed by a regular host file, one `SECTOR_SIZE`-byte slot per
/// sector. Every request acquires [`Self::request_lock`] first, mirroring
/// the original's "park on a semaphore until the device signals
/// completion" — here the "device" is simply synchronous, so the
/// semaphore's only remaining job is mutual exclusion between concurrent
/// callers.
pub struct HostFileDisk {
    file: Mutex<File>,
    request_lock: Semaphore,
    num_sectors: u32,
}

impl HostFileDisk {
    /// Creates (or truncates) a host file of `num_sectors * SECTOR_SIZE`
    /// zeroed bytes at `path`.
    pub fn create(path: impl AsRef<std::path::Path>, num_sectors: u32) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(num_sectors as u64 * SECTOR_SIZE as u64)?;
        Ok(HostFileDisk {
            file: Mutex::new(file),
            request_lock: Semaphore::new("synch-disk", 1),
            num_sectors,
        })
    }

    /// Opens an existing host file as a disk of `num_sectors` sectors
    /// without reinitializing its contents.
    pub fn open_existing(path: impl AsRef<std::path::Path>, num_sectors: u32) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(HostFileDisk {
            file: Mutex::new(file),
            request_lock: Semaphore::new("synch-disk", 1),
            num_sectors,
        })
    }
}

impl SynchDisk for HostFileDisk {
    fn num_sectors(&self) -> u32 {
        self.num_sectors
    }

    fn read_sector(&self, sector: u32, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE, "read_sector requires a full-sector buffer");
        assert!(sector < self.num_sectors, "sector {sector} out of range");
        self.request_lock.p();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64)).expect("seek");
        file.read_exact(buf).expect("read_sector");
        drop(file);
        self.request_lock.v();
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE, "write_sector requires a full-sector buffer");
        assert!(sector < self.num_sectors, "sector {sector} out of range");
        self.request_lock.p();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64)).expect("seek");
        file.write_all(buf).expect("write_sector");
        drop(file);
        self.request_lock.v();
    }
}

/// An in-memory disk, for tests that want no filesystem side effects on
/// the host.
pub struct MemDisk {
    bytes: Mutex<Vec<u8>>,
    request_lock: Semaphore,
    num_sectors: u32,
}

impl MemDisk {
    pub fn new(num_sectors: u32) -> Self {
        MemDisk {
            bytes: Mutex::new(vec![0u8; num_sectors as usize * SECTOR_SIZE]),
            request_lock: Semaphore::new("mem-disk", 1),
            num_sectors,
        }
    }
}

impl SynchDisk for MemDisk {
    fn num_sectors(&self) -> u32 {
        self.num_sectors
    }

    fn read_sector(&self, sector: u32, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        assert!(sector < self.num_sectors, "sector {sector} out of range");
        self.request_lock.p();
        let bytes = self.bytes.lock().unwrap();
        let start = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&bytes[start..start + SECTOR_SIZE]);
        drop(bytes);
        self.request_lock.v();
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        assert!(sector < self.num_sectors, "sector {sector} out of range");
        self.request_lock.p();
        let mut bytes = self.bytes.lock().unwrap();
        let start = sector as usize * SECTOR_SIZE;
        bytes[start..start + SECTOR_SIZE].copy_from_slice(buf);
        drop(bytes);
        self.request_lock.v();
    }
}
