//! The simulated TLB and its LRU replacement policy (§4.5).
//!
//! Only consulted when [`crate::config::Config::has_tlb`] is set. A miss
//! on a `valid` page table entry is resolved here without troubling the
//! demand-paging fault path; a miss on an invalid entry falls through to
//! [`crate::fault`].

/// One cached virtual-to-physical translation.
#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    virtual_page: u32,
    physical_page: u32,
    /// Ticks since this entry was last used for a translation; the
    /// replacement policy evicts the entry with the largest counter.
    lru_counter: u32,
}

/// A small associative cache of recent translations.
pub struct Tlb {
    entries: Vec<Option<TlbEntry>>,
}

impl Tlb {
    /// Creates an empty TLB with `size` entries.
    pub fn new(size: usize) -> Self {
        Tlb { entries: vec![None; size] }
    }

    /// Looks up `vpn`, bumping its LRU counter to zero on a hit.
    pub fn lookup(&mut self, vpn: u32) -> Option<u32> {
        for entry in self.entries.iter_mut().flatten() {
            if entry.virtual_page == vpn {
                entry.lru_counter = 0;
                return Some(entry.physical_page);
            }
        }
        None
    }

    /// Inserts a fresh translation, evicting the least-recently-used
    /// entry (by largest counter) if the TLB is full. Ties are broken by
    /// slot order, matching a simple linear-scan victim search.
    pub fn insert(&mut self, vpn: u32, ppn: u32) {
        if let Some(slot) = self.entries.iter_mut().find(|e| e.is_none()) {
            *slot = Some(TlbEntry { virtual_page: vpn, physical_page: ppn, lru_counter: 0 });
            return;
        }

        let victim = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.unwrap().lru_counter)
            .map(|(i, _)| i)
            .expect("TLB has at least one entry");
        self.entries[victim] = Some(TlbEntry { virtual_page: vpn, physical_page: ppn, lru_counter: 0 });
    }

    /// Invalidates any cached translation for `vpn` (called when its PTE
    /// is evicted by the page-fault handler, so a stale TLB entry can't
    /// outlive the mapping it cached).
    pub fn invalidate(&mut self, vpn: u32) {
        for slot in self.entries.iter_mut() {
            if matches!(slot, Some(e) if e.virtual_page == vpn) {
                *slot = None;
            }
        }
    }

    /// Advances every live entry's LRU counter by one tick, as the timer
    /// interrupt handler does in the original design.
    pub fn tick(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            entry.lru_counter += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_insert() {
        let mut tlb = Tlb::new(2);
        tlb.insert(3, 7);
        assert_eq!(tlb.lookup(3), Some(7));
        assert_eq!(tlb.lookup(4), None);
    }

    #[test]
    fn evicts_least_recently_used_when_full() {
        let mut tlb = Tlb::new(2);
        tlb.insert(1, 10);
        tlb.insert(2, 20);
        tlb.tick();
        tlb.tick();
        // refresh entry 1, leaving entry 2 as the larger (stale) counter
        assert_eq!(tlb.lookup(1), Some(10));
        tlb.insert(3, 30);
        assert_eq!(tlb.lookup(2), None);
        assert_eq!(tlb.lookup(1), Some(10));
        assert_eq!(tlb.lookup(3), Some(30));
    }

    #[test]
    fn invalidate_drops_matching_entry_only() {
        let mut tlb = Tlb::new(2);
        tlb.insert(1, 10);
        tlb.insert(2, 20);
        tlb.invalidate(1);
        assert_eq!(tlb.lookup(1), None);
        assert_eq!(tlb.lookup(2), Some(20));
    }
}
