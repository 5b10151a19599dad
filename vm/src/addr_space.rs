//! Per-thread address spaces (§4.4).
//!
//! An `AddrSpace` is loaded either eagerly (every page mapped to a free
//! physical frame at construction, program bytes copied straight into
//! main memory) or demand-paged (every page starts unmapped; the whole
//! program image is staged into the thread's backing-store slice and
//! materialized page by page on fault, per [`crate::fault`]).
//!
//! `AddrSpace` does not live on `threads::Thread` — instead
//! [`bind`]/[`address_space_of`] key a process-wide table by `ThreadId`,
//! which breaks the cyclic Thread/AddrSpace/frame-table reference a
//! direct field would otherwise form.

use crate::backing_store::BackingStore;
use crate::config::{Config, PAGE_SIZE};
use crate::frame_table::FrameTable;
use crate::machine::Machine;
use crate::noff::NoffHeader;
use crate::page_table::PageTableEntry;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use threads::thread::ThreadId;

/// Bytes of simulated user stack appended after a program's three NOFF
/// segments.
pub const USER_STACK_SIZE: u32 = 1024;

/// Errors constructing an address space.
#[derive(Debug, thiserror::Error)]
pub enum AddrSpaceError {
    #[error("program requires {0} pages, but only {1} physical pages exist and demand paging is off")]
    TooLargeForPhysicalMemory(usize, usize),
    #[error("program requires {0} pages, exceeding the {1}-page-per-thread backing store")]
    TooLargeForBackingStore(usize, usize),
    #[error(transparent)]
    Noff(#[from] crate::noff::NoffError),
}

/// A thread's virtual address space: its page table and (for demand
/// paging) the knowledge that its image lives in the shared backing
/// store under its own tid.
pub struct AddrSpace {
    pub page_table: Vec<PageTableEntry>,
    pub demand_paged: bool,
}

impl AddrSpace {
    /// Number of pages in this address space.
    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    /// Loads `image` (a parsed NOFF program plus its raw bytes) into a
    /// fresh address space, per `config.demand_paging`.
    pub fn load(
        tid: ThreadId,
        image: &[u8],
        machine: &Machine,
        frames: &FrameTable,
        backing: &BackingStore,
        config: &Config,
    ) -> Result<AddrSpace, AddrSpaceError> {
        let header = NoffHeader::parse(image)?;
        let size = header.image_size() + USER_STACK_SIZE;
        let num_pages = (size as usize).div_ceil(PAGE_SIZE);

        if config.demand_paging {
            let max_pages = config.disk_size_per_thread / PAGE_SIZE;
            if num_pages > max_pages {
                return Err(AddrSpaceError::TooLargeForBackingStore(num_pages, max_pages));
            }
            for seg in [header.code, header.init_data, header.uninit_data] {
                if seg.size > 0 {
                    let start = seg.in_file_addr as usize;
                    let end = start + seg.size as usize;
                    backing.stage(tid.as_u32(), seg.virtual_addr as usize, &image[start..end]);
                }
            }
            let page_table = (0..num_pages as u32).map(PageTableEntry::unmapped).collect();
            Ok(AddrSpace { page_table, demand_paged: true })
        } else {
            if num_pages > config.num_phys_pages {
                return Err(AddrSpaceError::TooLargeForPhysicalMemory(num_pages, config.num_phys_pages));
            }
            let mut page_table = Vec::with_capacity(num_pages);
            for vpn in 0..num_pages as u32 {
                let frame = frames
                    .find_free()
                    .expect("eager configuration already checked num_phys_pages above");
                frames.assign(frame, tid, vpn);
                machine.zero_frame(frame);
                page_table.push(PageTableEntry::mapped(vpn, frame as u32));
            }
            for seg in [header.code, header.init_data, header.uninit_data] {
                if seg.size > 0 {
                    let start = seg.in_file_addr as usize;
                    let end = start + seg.size as usize;
                    machine.copy_in(&page_table, seg.virtual_addr as usize, &image[start..end]);
                }
            }
            Ok(AddrSpace { page_table, demand_paged: false })
        }
    }

    /// Zeroes all simulated registers, sets `PC = 0`, `NextPC = 4`, and
    /// the stack pointer to the top of this address space's last page,
    /// minus 16 bytes of scratch room for argument passing.
    pub fn init_registers(&self, machine: &Machine) {
        machine.reset_registers();
        machine.set_register(Machine::REG_PC, 0);
        machine.set_register(Machine::REG_NEXT_PC, 4);
        let sp = (self.num_pages() * PAGE_SIZE) as i32 - 16;
        machine.set_register(Machine::REG_SP, sp);
    }
}

struct Table {
    spaces: Mutex<HashMap<ThreadId, Arc<Mutex<AddrSpace>>>>,
}

static TABLE: OnceCell<Table> = OnceCell::new();

fn table() -> &'static Table {
    TABLE.get_or_init(|| Table { spaces: Mutex::new(HashMap::new()) })
}

/// Binds `space` to `tid`. A thread with no bound address space is a
/// pure kernel thread (never faults, never runs user code).
pub fn bind(tid: ThreadId, space: AddrSpace) {
    table().spaces.lock().unwrap().insert(tid, Arc::new(Mutex::new(space)));
}

/// Releases `tid`'s address space, if any (called on thread exit, §4.4).
pub fn unbind(tid: ThreadId) {
    table().spaces.lock().unwrap().remove(&tid);
}

/// Returns `tid`'s address space, if bound.
pub fn address_space_of(tid: ThreadId) -> Option<Arc<Mutex<AddrSpace>>> {
    table().spaces.lock().unwrap().get(&tid).cloned()
}
