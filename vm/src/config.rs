//! Tunables for the virtual memory subsystem.
//!
//! Mirrors the handful of `#define`s the original design keeps in
//! `system.h`/`machine.h` (`PageSize`, `NumPhysPages`, `DiskSizePerThread`,
//! and whether demand paging is compiled in at all). Bundled as an explicit
//! struct rather than globals, so a test can build an isolated `Config`
//! instead of reaching for process-wide state.

/// Bytes per virtual/physical page. Matches the original's 128-byte
/// `PageSize`, which not coincidentally equals the disk sector size: a
/// page and a sector are the same transfer unit in this design.
pub const PAGE_SIZE: usize = 128;

/// A virtual memory configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Number of physical frames backing main memory.
    pub num_phys_pages: usize,
    /// Whether address spaces are demand-paged (`TMP_DISK` in the
    /// original) rather than eagerly mapped at construction.
    pub demand_paging: bool,
    /// Bytes of per-thread backing store reserved for a demand-paged
    /// program's staged image (`DiskSizePerThread`).
    pub disk_size_per_thread: usize,
    /// Whether the simulated machine has a TLB. When `false`, every
    /// access to a page not already `valid` is a demand-paging fault, not
    /// a TLB miss (§4.5).
    pub has_tlb: bool,
    /// Number of entries in the simulated TLB, when present.
    pub tlb_size: usize,
    /// Simulated ticks between a page fault being serviced and the
    /// synthetic disk-completion interrupt that wakes the faulting
    /// thread (the handler's final `sleep`, §4.5).
    pub disk_completion_ticks: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_phys_pages: 32,
            demand_paging: false,
            disk_size_per_thread: 128 * PAGE_SIZE,
            has_tlb: false,
            tlb_size: 4,
            disk_completion_ticks: 150,
        }
    }
}

impl Config {
    /// Total bytes of main memory implied by this configuration.
    pub fn main_memory_size(&self) -> usize {
        self.num_phys_pages * PAGE_SIZE
    }
}
