//! Per-thread address spaces, page tables, the TLB, demand paging, and
//! the page-fault/TLB-miss handler (§4.4-§4.5).
//!
//! Depends on `threads` for `ThreadId` and the scheduler's sleep/
//! ready-to-run hooks; nothing in `threads` depends back on this crate.
//! A thread's address space is tracked in [`addr_space`]'s own table
//! keyed by `ThreadId`, not as a field on `threads::Thread`.

pub mod addr_space;
pub mod backing_store;
pub mod config;
pub mod fault;
pub mod frame_table;
pub mod machine;
pub mod noff;
pub mod page_table;
pub mod tlb;

pub use addr_space::{address_space_of, bind, unbind, AddrSpace, AddrSpaceError};
pub use config::Config;
pub use fault::{handle_page_fault, FaultError};
pub use frame_table::FrameTable;
pub use machine::{Machine, MachineUserStateHost};
pub use page_table::PageTableEntry;

use backing_store::BackingStore;
use once_cell::sync::OnceCell;

/// Bundles everything a kernel needs to load programs and service faults:
/// one machine, one frame table, and one backing store, all sized from a
/// single [`Config`]. Constructed explicitly by the `kernel` crate rather
/// than hidden behind a global — `Vm::install` below is the one
/// concession to ambient global state, mirroring how
/// `threads::scheduler` keeps its registry behind a `OnceLock` for the
/// same reason (the scheduler, and the simulated machine it runs user
/// code on, are both genuinely process-wide).
pub struct Vm {
    pub config: Config,
    pub machine: Machine,
    pub frames: FrameTable,
    pub backing: BackingStore,
}

impl Vm {
    pub fn new(config: Config) -> Self {
        Vm {
            frames: FrameTable::new(config.num_phys_pages),
            machine: Machine::new(&config),
            backing: BackingStore::new(&config),
            config,
        }
    }

    /// Services a page fault for `tid`, per [`fault::handle_page_fault`].
    pub fn handle_page_fault(&self, tid: threads::thread::ThreadId) -> Result<(), FaultError> {
        fault::handle_page_fault(tid, &self.machine, &self.frames, &self.backing, &self.config)
    }
}

static VM: OnceCell<Vm> = OnceCell::new();

/// Installs the process-wide [`Vm`] instance and registers its machine
/// with the scheduler's context-switch hook. Must be called once, before
/// any thread with a bound address space runs.
pub fn install(config: Config) -> &'static Vm {
    let vm = VM.get_or_init(|| Vm::new(config));
    let host: &'static MachineUserStateHost =
        Box::leak(Box::new(MachineUserStateHost { machine: &vm.machine }));
    threads::scheduler::register_user_state_host(host);
    vm
}

/// Returns the process-wide [`Vm`], if [`install`] has been called.
pub fn vm() -> Option<&'static Vm> {
    VM.get()
}
