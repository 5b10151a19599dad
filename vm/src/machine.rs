//! The simulated machine's main memory and register bank.
//!
//! The instruction interpreter itself is out of scope (§1); this struct
//! only carries what the address-space loader, the fault handler, and the
//! syscall dispatcher need: a byte array standing in for physical memory,
//! a register file, and (for the TLB-bearing configuration) the cached
//! translations in [`crate::tlb::Tlb`]. `save_state`/`restore_state` swap
//! which thread's page table `translate` consults, the Rust equivalent of
//! the original's `machine->pageTable`/`pageTableSize` pointer pair
//! (§4.4).

use crate::config::{Config, PAGE_SIZE};
use crate::page_table::PageTableEntry;
use crate::tlb::Tlb;
use std::sync::Mutex;
use threads::thread::ThreadId;

/// Number of simulated general-purpose registers (mirroring the MIPS-like
/// register file the original machine exposes).
const NUM_REGS: usize = 40;

/// Errors translating a virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("virtual address {0:#x} has no bound address space for the current thread")]
    NoAddressSpace(u32),
    #[error("virtual page {0} is out of range for this address space")]
    PageOutOfRange(u32),
    #[error("virtual page {0} is not valid (page fault)")]
    PageFault(u32),
}

pub struct Machine {
    main_memory: Mutex<Vec<u8>>,
    registers: Mutex<[i32; NUM_REGS]>,
    tlb: Mutex<Option<Tlb>>,
    current_tid: Mutex<Option<ThreadId>>,
}

impl Machine {
    pub const REG_PC: usize = 34;
    pub const REG_NEXT_PC: usize = 35;
    pub const REG_SP: usize = 29;
    pub const REG_BAD_VADDR: usize = 36;
    /// Register holding a syscall number (r2) or its result.
    pub const REG_SYSCALL: usize = 2;
    /// Registers holding syscall arguments (r4..r7).
    pub const REG_ARGS: [usize; 4] = [4, 5, 6, 7];

    pub fn new(config: &Config) -> Self {
        Machine {
            main_memory: Mutex::new(vec![0u8; config.main_memory_size()]),
            registers: Mutex::new([0; NUM_REGS]),
            tlb: Mutex::new(if config.has_tlb { Some(Tlb::new(config.tlb_size)) } else { None }),
            current_tid: Mutex::new(None),
        }
    }

    pub fn read_register(&self, r: usize) -> i32 {
        self.registers.lock().unwrap()[r]
    }

    pub fn set_register(&self, r: usize, value: i32) {
        self.registers.lock().unwrap()[r] = value;
    }

    pub fn reset_registers(&self) {
        *self.registers.lock().unwrap() = [0; NUM_REGS];
    }

    /// Whether this machine was configured with a TLB (§4.5 branches on
    /// this).
    pub fn has_tlb(&self) -> bool {
        self.tlb.lock().unwrap().is_some()
    }

    pub fn with_tlb<R>(&self, f: impl FnOnce(&mut Tlb) -> R) -> Option<R> {
        self.tlb.lock().unwrap().as_mut().map(f)
    }

    /// The thread whose page table `translate` currently consults.
    pub fn current_tid(&self) -> Option<ThreadId> {
        *self.current_tid.lock().unwrap()
    }

    /// Saves `tid`'s user-level state before a context switch away from
    /// it. There is nothing to persist beyond the address-space binding
    /// itself (already tracked in `crate::addr_space`'s table), so this
    /// only clears the "current" pointer.
    pub fn save_state(&self, tid: ThreadId) {
        let mut current = self.current_tid.lock().unwrap();
        if *current == Some(tid) {
            *current = None;
        }
    }

    /// Restores `tid` as the thread whose page table `translate` uses.
    pub fn restore_state(&self, tid: ThreadId) {
        *self.current_tid.lock().unwrap() = Some(tid);
    }

    /// Zeroes an entire physical frame (used when a fresh page is
    /// eagerly mapped, §4.4).
    pub fn zero_frame(&self, frame: usize) {
        let mut mem = self.main_memory.lock().unwrap();
        let start = frame * PAGE_SIZE;
        mem[start..start + PAGE_SIZE].fill(0);
    }

    /// Copies `data` into main memory starting at virtual address
    /// `virtual_addr`, translating one byte at a time through
    /// `page_table` (the eager-load path in §4.4 copies "one byte at a
    /// time via a virtual-to-physical translate of the destination
    /// virtual address").
    pub fn copy_in(&self, page_table: &[PageTableEntry], virtual_addr: usize, data: &[u8]) {
        let mut mem = self.main_memory.lock().unwrap();
        for (i, byte) in data.iter().enumerate() {
            let vaddr = virtual_addr + i;
            let vpn = vaddr / PAGE_SIZE;
            let offset = vaddr % PAGE_SIZE;
            let pte = &page_table[vpn];
            assert!(pte.valid, "eager load wrote to an unmapped page");
            let paddr = pte.physical_page as usize * PAGE_SIZE + offset;
            mem[paddr] = *byte;
        }
    }

    /// Reads one page's worth of bytes out of physical frame `frame`.
    pub fn read_frame(&self, frame: usize, out: &mut [u8]) {
        assert_eq!(out.len(), PAGE_SIZE);
        let mem = self.main_memory.lock().unwrap();
        let start = frame * PAGE_SIZE;
        out.copy_from_slice(&mem[start..start + PAGE_SIZE]);
    }

    /// Writes one page's worth of bytes into physical frame `frame`.
    pub fn write_frame(&self, frame: usize, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut mem = self.main_memory.lock().unwrap();
        let start = frame * PAGE_SIZE;
        mem[start..start + PAGE_SIZE].copy_from_slice(data);
    }

    /// Reads a single byte at a physical address, for tests and the
    /// syscall read/write path.
    pub fn read_byte(&self, physical_addr: usize) -> u8 {
        self.main_memory.lock().unwrap()[physical_addr]
    }

    pub fn write_byte(&self, physical_addr: usize, value: u8) {
        self.main_memory.lock().unwrap()[physical_addr] = value;
    }
}

/// Binds a [`Machine`] to the scheduler's context-switch hook, so
/// `save_state`/`restore_state` fire automatically on every switch. Also
/// registers an address-space save/restore so a thread's page-table
/// binding survives across switches with no further glue code.
pub struct MachineUserStateHost {
    pub machine: &'static Machine,
}

impl threads::scheduler::UserStateHost for MachineUserStateHost {
    fn save_state(&self, tid: ThreadId) {
        self.machine.save_state(tid);
    }

    fn restore_state(&self, tid: ThreadId) {
        self.machine.restore_state(tid);
    }

    fn on_tick(&self) {
        self.machine.with_tlb(|tlb| tlb.tick());
    }
}
