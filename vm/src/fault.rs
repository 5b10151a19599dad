//! The page-fault and TLB-miss handler (§4.5).
//!
//! Dispatched from the kernel's trap vector whenever the machine raises
//! `PageFaultException`. Runs entirely with interrupts disabled: the
//! victim frame is chosen before any I/O, a dirty victim's writeback
//! precedes its reuse, and no other thread can observe a half-swapped
//! frame (§4.5 "Ordering").
//!
//! Marking the newly faulted-in PTE valid and copying its staged
//! contents into main memory are both mandatory here, never optional
//! branches left to the caller — a page that is copied in but left
//! invalid, or marked valid before its bytes arrive, is a handler bug.

use crate::addr_space::address_space_of;
use crate::backing_store::BackingStore;
use crate::config::{Config, PAGE_SIZE};
use crate::frame_table::FrameTable;
use crate::machine::Machine;
use threads::interrupt::assert_disabled;
use threads::thread::ThreadId;

/// Errors the fault handler can surface without aborting the simulator
/// (a contract violation — e.g. a fault for a thread with no bound
/// address space — still panics, per §7).
#[derive(Debug, thiserror::Error)]
pub enum FaultError {
    #[error("virtual page {0} is out of range for the faulting thread's address space")]
    PageOutOfRange(u32),
}

/// Handles a `PageFaultException` for the current thread, at the virtual
/// address currently in `Machine::REG_BAD_VADDR`.
///
/// Blocks the calling thread (via [`threads::scheduler::sleep`]) until
/// the simulated disk-completion interrupt fires, exactly as a real
/// demand-paging fault would. Returns once the calling thread has been
/// rescheduled and the newly faulted-in page is live.
///
/// # Panics
///
/// Panics if interrupts are not disabled, or if the current thread has
/// no bound address space.
pub fn handle_page_fault(
    tid: ThreadId,
    machine: &Machine,
    frames: &FrameTable,
    backing: &BackingStore,
    config: &Config,
) -> Result<(), FaultError> {
    assert_disabled("vm::fault::handle_page_fault");

    let bad_vaddr = machine.read_register(Machine::REG_BAD_VADDR) as u32;
    let vpn = bad_vaddr / PAGE_SIZE as u32;

    let space = address_space_of(tid).expect("page fault for a thread with no address space");
    let is_tlb_miss = {
        let guard = space.lock().unwrap();
        if vpn as usize >= guard.num_pages() {
            return Err(FaultError::PageOutOfRange(vpn));
        }
        machine.has_tlb() && guard.page_table[vpn as usize].valid
    };

    if is_tlb_miss {
        handle_tlb_miss(machine, &space, vpn);
        return Ok(());
    }

    service_demand_fault(tid, vpn, &space, machine, frames, backing, config);
    Ok(())
}

/// Pure TLB miss: the page table already has a valid mapping, so this is
/// just a cache refill, not a demand-paging fault.
fn handle_tlb_miss(machine: &Machine, space: &std::sync::Mutex<crate::addr_space::AddrSpace>, vpn: u32) {
    let ppn = space.lock().unwrap().page_table[vpn as usize].physical_page as u32;
    machine.with_tlb(|tlb| tlb.insert(vpn, ppn));
}

fn service_demand_fault(
    tid: ThreadId,
    vpn: u32,
    space: &std::sync::Mutex<crate::addr_space::AddrSpace>,
    machine: &Machine,
    frames: &FrameTable,
    backing: &BackingStore,
    config: &Config,
) {
    let victim = frames.pick_victim();

    if let Some(owner) = frames.owner(victim) {
        if let Some(owner_space) = address_space_of(owner.tid) {
            let mut owner_guard = owner_space.lock().unwrap();
            let owner_pte = &mut owner_guard.page_table[owner.virtual_page as usize];
            if owner_pte.dirty {
                let mut page = vec![0u8; PAGE_SIZE];
                machine.read_frame(victim, &mut page);
                backing.write_page(owner.tid.as_u32(), owner.virtual_page, &page);
            }
            owner_pte.valid = false;
            machine.with_tlb(|tlb| tlb.invalidate(owner.virtual_page));
        }
    }

    frames.assign(victim, tid, vpn);

    let mut page = vec![0u8; PAGE_SIZE];
    backing.read_page(tid.as_u32(), vpn, &mut page);
    machine.write_frame(victim, &page);

    {
        let mut guard = space.lock().unwrap();
        let pte = &mut guard.page_table[vpn as usize];
        pte.physical_page = victim as i32;
        pte.valid = true;
    }

    threads::scheduler::schedule_wakeup(tid, config.disk_completion_ticks);
    threads::scheduler::block_current();
    threads::scheduler::sleep();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr_space::{bind, AddrSpace};
    use threads::interrupt;

    fn noff_image(code: &[u8]) -> Vec<u8> {
        let mut img = Vec::new();
        img.extend_from_slice(&crate::noff::NOFF_MAGIC.to_le_bytes());
        img.extend_from_slice(&0i32.to_le_bytes()); // code.virtualAddr
        img.extend_from_slice(&40i32.to_le_bytes()); // code.inFileAddr
        img.extend_from_slice(&(code.len() as i32).to_le_bytes()); // code.size
        img.extend_from_slice(&[0u8; 24]); // initData + uninitData, all zero
        img.extend_from_slice(code);
        img
    }

    #[test]
    fn demand_fault_stages_then_materializes_the_faulted_page() {
        let mut config = Config::default();
        config.num_phys_pages = 2;
        config.demand_paging = true;
        config.disk_size_per_thread = 8 * PAGE_SIZE;

        let machine = Machine::new(&config);
        let frames = FrameTable::new(config.num_phys_pages);
        let backing = BackingStore::new(&config);

        let pattern: Vec<u8> = (0..PAGE_SIZE as u32).map(|i| (i * 7 % 251) as u8).collect();
        let image = noff_image(&pattern);
        let tid = ThreadId::IDLE;

        let space = AddrSpace::load(tid, &image, &machine, &frames, &backing, &config).unwrap();
        assert!(!space.page_table[0].valid);
        bind(tid, space);

        machine.set_register(Machine::REG_BAD_VADDR, 0);
        interrupt::without_interrupts(|| {
            handle_page_fault(tid, &machine, &frames, &backing, &config).unwrap();
        });

        let bound = address_space_of(tid).unwrap();
        let guard = bound.lock().unwrap();
        let pte = guard.page_table[0];
        assert!(pte.valid);

        let mut observed = vec![0u8; PAGE_SIZE];
        machine.read_frame(pte.physical_page as usize, &mut observed);
        assert_eq!(observed, pattern);
    }
}
