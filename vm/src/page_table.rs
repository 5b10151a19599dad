//! Page table entries, shared by [`crate::addr_space`], the TLB, and the
//! page-fault handler.

/// A single virtual-to-physical translation, co-mutated by the machine,
/// the fault handler, and the owning address space (§3).
#[derive(Debug, Clone, Copy)]
pub struct PageTableEntry {
    /// The virtual page number this entry describes. Fixed at
    /// construction: with one page table per address space, `virtualPage`
    /// always equals the entry's index.
    pub virtual_page: u32,
    /// The physical frame currently backing this page, or `-1` if none is
    /// assigned (demand paging, not yet faulted in).
    pub physical_page: i32,
    /// Whether `physical_page` is a live translation. `false` for a
    /// not-yet-faulted-in demand page, or for a page just evicted by the
    /// clock algorithm.
    pub valid: bool,
    /// Reference bit: set by the machine on every access, cleared by
    /// whatever replacement policy wants to track recency. Unused by the
    /// clock eviction policy itself (which uses the global hand), but
    /// retained since the original design carries it on every entry.
    pub used: bool,
    /// Set by the machine on any write through this translation. Checked
    /// by the fault handler before evicting: a dirty victim must be
    /// written back to its owner's backing store first (§4.5).
    pub dirty: bool,
    /// Whether writes through this translation should fault. Unused by
    /// anything in this crate's Non-goals-trimmed scope, but carried
    /// since the original layout reserves the bit.
    pub read_only: bool,
}

impl PageTableEntry {
    /// A not-yet-mapped entry for demand paging: `physical_page = -1`,
    /// `valid = false`.
    pub fn unmapped(virtual_page: u32) -> Self {
        PageTableEntry {
            virtual_page,
            physical_page: -1,
            valid: false,
            used: false,
            dirty: false,
            read_only: false,
        }
    }

    /// An entry eagerly mapped to `physical_page` at construction time
    /// (the non-demand-paged configuration, §4.4).
    pub fn mapped(virtual_page: u32, physical_page: u32) -> Self {
        PageTableEntry {
            virtual_page,
            physical_page: physical_page as i32,
            valid: true,
            used: false,
            dirty: false,
            read_only: false,
        }
    }
}
