//! The trap vector: syscall and exception dispatch (§4.5, §6's table).
//!
//! `handle_exception` is the one entry point a caller (the demo runner,
//! or an integration test standing in for the missing instruction
//! interpreter — out of scope per §1) invokes whenever the simulated
//! machine would have raised an exception.

use std::sync::Arc;

use filesystem::FileSystem;
use threads::thread::ThreadId;
use vm::{Machine, Vm};

/// The two exception classes the machine can raise (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Syscall,
    PageFault,
}

/// Syscall numbers recognized by [`dispatch_syscall`] (§6's minimum set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt,
    Exit,
    Create,
    Open,
    Close,
    Write,
    Read,
}

impl Syscall {
    fn from_code(code: i32) -> Option<Syscall> {
        match code {
            0 => Some(Syscall::Halt),
            1 => Some(Syscall::Exit),
            2 => Some(Syscall::Create),
            3 => Some(Syscall::Open),
            4 => Some(Syscall::Close),
            5 => Some(Syscall::Write),
            6 => Some(Syscall::Read),
            _ => None,
        }
    }
}

/// File ids 0 and 1 are reserved for console input/output (§6); open
/// user files start at 2.
const CONSOLE_INPUT: i32 = 0;
const CONSOLE_OUTPUT: i32 = 1;

/// Per-thread open-file table, the trap vector's only piece of syscall
/// state beyond the machine's registers.
pub struct FileTable {
    files: std::sync::Mutex<std::collections::HashMap<i32, filesystem::OpenFile>>,
    next_id: std::sync::atomic::AtomicI32,
}

impl Default for FileTable {
    fn default() -> Self {
        FileTable {
            files: std::sync::Mutex::new(std::collections::HashMap::new()),
            next_id: std::sync::atomic::AtomicI32::new(2),
        }
    }
}

impl FileTable {
    fn insert(&self, file: filesystem::OpenFile) -> i32 {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.files.lock().unwrap().insert(id, file);
        id
    }

    fn remove(&self, id: i32) {
        self.files.lock().unwrap().remove(&id);
    }

    fn with<R>(&self, id: i32, f: impl FnOnce(&filesystem::OpenFile) -> R) -> Option<R> {
        self.files.lock().unwrap().get(&id).map(f)
    }
}

/// Reads a NUL-terminated string out of user memory starting at
/// `virtual_addr`, translating through `tid`'s page table one byte at a
/// time (mirroring [`Machine::copy_in`]'s translation loop).
fn read_c_string(machine: &Machine, space: &vm::AddrSpace, virtual_addr: i32) -> String {
    let page_size = vm::config::PAGE_SIZE;
    let mut bytes = Vec::new();
    let mut addr = virtual_addr as usize;
    loop {
        let vpn = addr / page_size;
        let offset = addr % page_size;
        let pte = space.page_table[vpn];
        assert!(pte.valid, "read_c_string touched an unmapped page {vpn}");
        let paddr = pte.physical_page as usize * page_size + offset;
        let byte = machine.read_byte(paddr);
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        addr += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Dispatches a `SyscallException`: reads the syscall number from
/// `REG_SYSCALL`, its arguments from `REG_ARGS`, and writes any result
/// back to `REG_SYSCALL` before advancing `PC`/`NextPC`.
///
/// # Panics
///
/// Panics on an unrecognized syscall number — a fatal condition per
/// §6's table, not a recoverable error.
pub fn dispatch_syscall(vm: &Vm, fs: &FileSystem, tid: ThreadId, files: &FileTable) {
    let code = vm.machine.read_register(Machine::REG_SYSCALL);
    let syscall = Syscall::from_code(code)
        .unwrap_or_else(|| panic!("unknown syscall {code} from thread {tid}"));

    let args = vm.machine.read_register(Machine::REG_ARGS[0]);
    let arg1 = vm.machine.read_register(Machine::REG_ARGS[1]);
    let arg2 = vm.machine.read_register(Machine::REG_ARGS[2]);

    // Handled before the address-space lookup below: Exit releases that
    // very address space, and `scheduler::finish` never returns control
    // to this thread, so there is no result to write back and no PC to
    // advance (§6).
    if syscall == Syscall::Exit {
        log::info!("Exit with {args}");
        vm::unbind(tid);
        threads::scheduler::finish();
    }

    let space = vm::address_space_of(tid).expect("syscall from a thread with no address space");
    let result = {
        let space = space.lock().unwrap();
        match syscall {
            Syscall::Halt => {
                log::info!("machine halted by thread {tid}");
                std::process::exit(0);
            }
            Syscall::Exit => unreachable!("Exit is dispatched before the address-space lookup"),
            Syscall::Create => {
                let path = read_c_string(&vm.machine, &space, args);
                match fs.create(&path, 0, false, threads::scheduler::now() as u32) {
                    Ok(()) => 0,
                    Err(_) => -1,
                }
            }
            Syscall::Open => {
                let path = read_c_string(&vm.machine, &space, args);
                match fs.open(&path) {
                    Ok(file) => files.insert(file),
                    Err(_) => -1,
                }
            }
            Syscall::Close => {
                files.remove(args);
                0
            }
            Syscall::Write => {
                let (buf_addr, size, id) = (args, arg1, arg2);
                let mut data = vec![0u8; size.max(0) as usize];
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = machine_read_user_byte(&vm.machine, &space, buf_addr + i as i32);
                }
                match id {
                    CONSOLE_OUTPUT => {
                        print!("{}", String::from_utf8_lossy(&data));
                        size
                    }
                    CONSOLE_INPUT => -1,
                    _ => files.with(id, |f| f.write(&data).unwrap_or(0) as i32).unwrap_or(-1),
                }
            }
            Syscall::Read => {
                let (buf_addr, size, id) = (args, arg1, arg2);
                match id {
                    CONSOLE_INPUT | CONSOLE_OUTPUT => -1,
                    _ => {
                        let mut data = vec![0u8; size.max(0) as usize];
                        let read = files.with(id, |f| f.read(&mut data)).unwrap_or(0);
                        for (i, byte) in data.iter().enumerate().take(read) {
                            machine_write_user_byte(&vm.machine, &space, buf_addr + i as i32, *byte);
                        }
                        read as i32
                    }
                }
            }
        }
    };

    vm.machine.set_register(Machine::REG_SYSCALL, result);
    let next_pc = vm.machine.read_register(Machine::REG_NEXT_PC);
    vm.machine.set_register(Machine::REG_PC, next_pc);
    vm.machine.set_register(Machine::REG_NEXT_PC, next_pc + 4);
}

fn machine_read_user_byte(machine: &Machine, space: &vm::AddrSpace, virtual_addr: i32) -> u8 {
    let page_size = vm::config::PAGE_SIZE;
    let addr = virtual_addr as usize;
    let pte = space.page_table[addr / page_size];
    assert!(pte.valid, "syscall touched an unmapped page");
    machine.read_byte(pte.physical_page as usize * page_size + addr % page_size)
}

fn machine_write_user_byte(machine: &Machine, space: &vm::AddrSpace, virtual_addr: i32, value: u8) {
    let page_size = vm::config::PAGE_SIZE;
    let addr = virtual_addr as usize;
    let pte = space.page_table[addr / page_size];
    assert!(pte.valid, "syscall touched an unmapped page");
    machine.write_byte(pte.physical_page as usize * page_size + addr % page_size, value);
}

/// Dispatches an exception raised for `tid`: a syscall runs through
/// [`dispatch_syscall`], a page fault through [`vm::Vm::handle_page_fault`].
///
/// # Panics
///
/// Any other exception is fatal, per §6's table — there is no
/// `ExceptionKind` variant for "other" because nothing in this design
/// raises one; an unmodeled exception is a bug in the caller, not a
/// recoverable runtime condition.
pub fn handle_exception(kind: ExceptionKind, vm: &Vm, fs: &FileSystem, tid: ThreadId, files: &FileTable) {
    match kind {
        ExceptionKind::Syscall => dispatch_syscall(vm, fs, tid, files),
        ExceptionKind::PageFault => {
            vm.handle_page_fault(tid).unwrap_or_else(|e| panic!("page fault handling failed: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filesystem::MemDisk;
    use vm::Config;

    fn noff_image(code: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 40];
        buf[0..4].copy_from_slice(&vm::noff::NOFF_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&0i32.to_le_bytes());
        buf[8..12].copy_from_slice(&40i32.to_le_bytes());
        buf[12..16].copy_from_slice(&(code.len() as i32).to_le_bytes());
        buf.extend_from_slice(code);
        buf
    }

    #[test]
    fn halt_exits_the_process_so_we_only_test_create_and_write() {
        let vm = Vm::new(Config::default());
        let disk: Arc<dyn filesystem::SynchDisk> = Arc::new(MemDisk::new(64));
        let fs = FileSystem::format(disk, 0);
        let image = noff_image(b"hi");

        threads::interrupt::without_interrupts(|| {
            threads::scheduler::spawn("loader-test", threads::thread::LOWEST_PRIORITY, -1, || {}).unwrap();
        });
        let tid = threads::scheduler::current_tid();
        crate::loader::load_image(&image, tid, &vm).unwrap();

        let files = FileTable::default();
        vm.machine.set_register(Machine::REG_SYSCALL, 2);
        vm.machine.set_register(Machine::REG_ARGS[0], 0);
        let space = vm::address_space_of(tid).unwrap();
        {
            let space = space.lock().unwrap();
            machine_write_user_byte(&vm.machine, &space, 0, b't');
            machine_write_user_byte(&vm.machine, &space, 1, 0);
        }
        dispatch_syscall(&vm, &fs, tid, &files);
        assert_eq!(vm.machine.read_register(Machine::REG_SYSCALL), 0);
        assert!(fs.open("t").is_ok());
    }

    #[test]
    fn exit_releases_the_address_space_and_terminates_the_thread() {
        let vm = Vm::new(Config::default());
        let disk: Arc<dyn filesystem::SynchDisk> = Arc::new(MemDisk::new(64));
        let fs = FileSystem::format(disk, 0);
        let image = noff_image(b"x");

        let tid_holder: Arc<std::sync::Mutex<Option<ThreadId>>> = Arc::new(std::sync::Mutex::new(None));
        let tid_holder2 = tid_holder.clone();

        threads::interrupt::without_interrupts(|| {
            threads::scheduler::spawn("exit-test", threads::thread::LOWEST_PRIORITY, -1, move || {
                let tid = threads::scheduler::current_tid();
                *tid_holder2.lock().unwrap() = Some(tid);
                crate::loader::load_image(&image, tid, &vm).unwrap();

                let files = FileTable::default();
                vm.machine.set_register(Machine::REG_SYSCALL, 1);
                vm.machine.set_register(Machine::REG_ARGS[0], 7);
                dispatch_syscall(&vm, &fs, tid, &files);
                unreachable!("Exit must never return control to the calling thread");
            })
            .unwrap();
        });

        threads::scheduler::start();

        let tid = tid_holder.lock().unwrap().expect("thread recorded its tid before exiting");
        assert!(vm::address_space_of(tid).is_none(), "Exit must release the thread's address space");
    }
}
