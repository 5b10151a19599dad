//! Demo runner tying `threads`, `vm`, and `filesystem` together.
//!
//! Not a configurable test harness — just four fixed scenarios run back
//! to back, each exercising one corner of the design this workspace
//! implements:
//! scheduling fairness, producer/consumer synchronization, a filesystem
//! create/write/read/remove cycle, and demand-paging stress.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use kernel::loader;
use threads::thread::{HIGHEST_PRIORITY, LOWEST_PRIORITY};
use threads::{interrupt, scheduler, Condition, Lock};

fn scheduling_fairness_demo() {
    log::info!("--- scheduling fairness: a high-priority thread runs before a low one ---");
    let order = Arc::new(Mutex::new(Vec::new()));

    let o_low = order.clone();
    let o_high = order.clone();
    interrupt::without_interrupts(|| {
        scheduler::spawn("low-priority", LOWEST_PRIORITY, -1, move || {
            for i in 0..3 {
                o_low.lock().unwrap().push(format!("low-{i}"));
                interrupt::without_interrupts(scheduler::yield_now);
            }
        })
        .unwrap();
        scheduler::spawn("high-priority", HIGHEST_PRIORITY, -1, move || {
            for i in 0..3 {
                o_high.lock().unwrap().push(format!("high-{i}"));
                interrupt::without_interrupts(scheduler::yield_now);
            }
        })
        .unwrap();
    });
    scheduler::start();
    log::info!("run order: {:?}", order.lock().unwrap());
}

/// A bounded buffer guarded by a lock and two condition variables, the
/// classic producer/consumer scenario.
struct BoundedBuffer {
    lock: Lock,
    not_empty: Condition,
    not_full: Condition,
    items: Mutex<Vec<u32>>,
    capacity: usize,
}

impl BoundedBuffer {
    fn new(capacity: usize) -> Self {
        BoundedBuffer {
            lock: Lock::new("buffer-lock"),
            not_empty: Condition::new("not-empty"),
            not_full: Condition::new("not-full"),
            items: Mutex::new(Vec::new()),
            capacity,
        }
    }

    fn produce(&self, item: u32) {
        self.lock.acquire();
        while self.items.lock().unwrap().len() >= self.capacity {
            self.not_full.wait(&self.lock);
        }
        self.items.lock().unwrap().push(item);
        self.not_empty.signal(&self.lock);
        self.lock.release();
    }

    fn consume(&self) -> u32 {
        self.lock.acquire();
        while self.items.lock().unwrap().is_empty() {
            self.not_empty.wait(&self.lock);
        }
        let item = self.items.lock().unwrap().remove(0);
        self.not_full.signal(&self.lock);
        self.lock.release();
        item
    }
}

fn producer_consumer_demo() {
    log::info!("--- producer/consumer: two producers, two consumers, buffer size 3 ---");
    let buffer = Arc::new(BoundedBuffer::new(3));
    let produced = Arc::new(AtomicU32::new(0));
    let consumed = Arc::new(AtomicU32::new(0));
    const STEPS_PER_PRODUCER: u32 = 10;

    interrupt::without_interrupts(|| {
        for p in 0..2 {
            let buffer = buffer.clone();
            let produced = produced.clone();
            scheduler::spawn(format!("producer-{p}"), LOWEST_PRIORITY, -1, move || {
                for i in 0..STEPS_PER_PRODUCER {
                    buffer.produce(p * 100 + i);
                    produced.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        }
        for c in 0..2 {
            let buffer = buffer.clone();
            let consumed = consumed.clone();
            scheduler::spawn(format!("consumer-{c}"), LOWEST_PRIORITY, -1, move || {
                for _ in 0..STEPS_PER_PRODUCER {
                    buffer.consume();
                    consumed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        }
    });
    scheduler::start();

    let produced = produced.load(Ordering::SeqCst);
    let consumed = consumed.load(Ordering::SeqCst);
    log::info!("produced {produced}, consumed {consumed}");
    assert_eq!(produced, consumed, "every produced item must be consumed exactly once");
}

fn filesystem_round_trip_demo() {
    log::info!("--- filesystem: create, write, read back, remove ---");
    let disk: Arc<dyn filesystem::SynchDisk> =
        Arc::new(filesystem::MemDisk::new(filesystem::config::NUM_SECTORS));
    let fs = filesystem::FileSystem::format(disk, 0);

    fs.create("/greeting.txt", 0, false, 0).unwrap();
    let file = fs.open("/greeting.txt").unwrap();
    file.write_at(b"hello from the simulated disk", 0).unwrap();

    let mut buf = vec![0u8; 29];
    file.read_at(&mut buf, 0);
    log::info!("read back: {}", String::from_utf8_lossy(&buf));
    drop(file);

    fs.remove("/greeting.txt").unwrap();
    assert!(fs.open("/greeting.txt").is_err(), "removed file must no longer be openable");
}

fn demand_paging_stress_demo() {
    log::info!("--- demand paging: access every page of an oversized address space once ---");
    let config = kernel::Config::demand_paging();
    let vm = vm::install(config.vm);

    let num_pages = 2 * vm.config.num_phys_pages;
    let image_size = (num_pages * vm::config::PAGE_SIZE) as u32;
    let mut image = Vec::new();
    image.extend_from_slice(&vm::noff::NOFF_MAGIC.to_le_bytes());
    image.extend_from_slice(&0i32.to_le_bytes());
    image.extend_from_slice(&40i32.to_le_bytes());
    image.extend_from_slice(&(image_size.saturating_sub(1024)).to_le_bytes());
    image.extend_from_slice(&[0u8; 24]);
    image.resize(40 + image_size.saturating_sub(1024) as usize, 0);

    interrupt::without_interrupts(|| {
        scheduler::spawn("paging-stress", LOWEST_PRIORITY, -1, move || {
            let tid = scheduler::current_tid();
            loader::load_image(&image, tid, vm).expect("oversized image still fits the backing store");

            for vpn in 0..num_pages {
                let space = vm::address_space_of(tid).unwrap();
                let already_valid = space.lock().unwrap().page_table[vpn].valid;
                if !already_valid {
                    vm.machine.set_register(vm::Machine::REG_BAD_VADDR, (vpn * vm::config::PAGE_SIZE) as i32);
                    interrupt::without_interrupts(|| {
                        vm.handle_page_fault(tid).expect("demand fault must succeed within a valid vpn range");
                    });
                }
            }
            vm::unbind(tid);
        })
        .unwrap();
    });
    scheduler::start();
    log::info!("accessed all {num_pages} pages with only {} physical frames", vm.config.num_phys_pages);
}

fn main() {
    env_logger::init();
    scheduling_fairness_demo();
    producer_consumer_demo();
    filesystem_round_trip_demo();
    demand_paging_stress_demo();
}
