//! The shared per-thread backing store for demand-paged address spaces
//! (the original's single `myDisk` array, sliced by tid).
//!
//! A demand-paged program's entire image is staged here at load time, at
//! offset `tid * disk_size_per_thread + virtual_addr` (§4.4); pages are
//! copied in and out of main memory on fault (§4.5) rather than the
//! program being read a page at a time from the filesystem, matching the
//! `TMP_DISK` configuration in the original.

use crate::config::{Config, PAGE_SIZE};
use std::sync::Mutex;
use threads::thread::MAX_THREAD_NUM;

/// A flat byte array, one fixed-size slice per possible thread id.
pub struct BackingStore {
    disk_size_per_thread: usize,
    bytes: Mutex<Vec<u8>>,
}

impl BackingStore {
    /// Allocates a backing store sized for `MAX_THREAD_NUM` threads, per
    /// `config.disk_size_per_thread`.
    pub fn new(config: &Config) -> Self {
        BackingStore {
            disk_size_per_thread: config.disk_size_per_thread,
            bytes: Mutex::new(vec![0u8; MAX_THREAD_NUM * config.disk_size_per_thread]),
        }
    }

    fn base(&self, tid: u32) -> usize {
        tid as usize * self.disk_size_per_thread
    }

    /// Stages `data` into `tid`'s slice starting at `virtual_addr`.
    pub fn stage(&self, tid: u32, virtual_addr: usize, data: &[u8]) {
        let base = self.base(tid);
        let mut bytes = self.bytes.lock().unwrap();
        bytes[base + virtual_addr..base + virtual_addr + data.len()].copy_from_slice(data);
    }

    /// Copies one page's worth of bytes from `tid`'s slice at `vpn` into
    /// `out` (used when materializing a page on fault).
    pub fn read_page(&self, tid: u32, vpn: u32, out: &mut [u8]) {
        assert_eq!(out.len(), PAGE_SIZE);
        let offset = self.base(tid) + vpn as usize * PAGE_SIZE;
        let bytes = self.bytes.lock().unwrap();
        out.copy_from_slice(&bytes[offset..offset + PAGE_SIZE]);
    }

    /// Writes a dirty page back into `tid`'s slice at `vpn` (the eviction
    /// writeback step of §4.5).
    pub fn write_page(&self, tid: u32, vpn: u32, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let offset = self.base(tid) + vpn as usize * PAGE_SIZE;
        let mut bytes = self.bytes.lock().unwrap();
        bytes[offset..offset + PAGE_SIZE].copy_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_then_read_page_round_trips() {
        let store = BackingStore::new(&Config::default());
        let pattern: Vec<u8> = (0..PAGE_SIZE as u32).map(|i| (i % 251) as u8).collect();
        store.stage(3, 2 * PAGE_SIZE, &pattern);

        let mut out = vec![0u8; PAGE_SIZE];
        store.read_page(3, 2, &mut out);
        assert_eq!(out, pattern);
    }

    #[test]
    fn threads_do_not_share_a_slice() {
        let store = BackingStore::new(&Config::default());
        store.stage(1, 0, &[0xAAu8; PAGE_SIZE]);
        store.stage(2, 0, &[0xBBu8; PAGE_SIZE]);

        let mut out1 = vec![0u8; PAGE_SIZE];
        let mut out2 = vec![0u8; PAGE_SIZE];
        store.read_page(1, 0, &mut out1);
        store.read_page(2, 0, &mut out2);
        assert_eq!(out1, vec![0xAAu8; PAGE_SIZE]);
        assert_eq!(out2, vec![0xBBu8; PAGE_SIZE]);
    }
}
