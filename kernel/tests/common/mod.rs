//! A simulated machine for driving the process core end to end.
//!
//! User programs are closures. An address space carries the program its process will run when it
//! first returns to user space; `User::fork` parks the child's program in the parent's space and
//! `uvm_copy` moves it into the child's copy, the way a real fork copies the code.

#![allow(dead_code)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kernel::arch::hosted::{self, Harts};
use kernel::arch::interrupts;
use kernel::error::KernelError;
use kernel::kstack::KstackPool;
use kernel::param::{NPROC, PGSIZE};
use kernel::platform::{Platform, VA};
use kernel::proc::{Channel, Kernel, Pid, ProcState, TrapFrame};
use kernel::syscall::{SysError, Syscall, syscall};

pub type Program = Box<dyn FnOnce(&User) + Send>;

/// Where `User::wait` asks the kernel to store the exit status.
pub const STATUS_ADDR: usize = PGSIZE - 8;

/// Status a process exits with when its program panics.
pub const PANIC_STATUS: i32 = 101;

pub const TIMEOUT: Duration = Duration::from_secs(20);

/// Receives from a process, failing the test if the machine stalls.
pub fn recv<T>(rx: &Receiver<T>) -> T {
    rx.recv_timeout(TIMEOUT).expect("machine stalled")
}

#[derive(Debug)]
pub struct SimFile {
    pub name: &'static str,
}

#[derive(Debug)]
pub struct SimInode {
    pub path: &'static str,
}

/// User memory plus the program the process runs.
#[derive(Default)]
pub struct Space {
    mem: Vec<u8>,
    program: Option<Program>,
    pending: Option<Program>,
}

pub struct Sim {
    init: Mutex<Option<Program>>,
    pub root: Arc<SimInode>,
    pub spaces: AtomicUsize,
    pub first_runs: AtomicUsize,
    /// Makes `uvm_create` run out of memory.
    pub fail_uvm_create: AtomicBool,
    /// Makes `uvm_copy` run out of memory.
    pub fail_uvm_copy: AtomicBool,
    stopped: AtomicBool,
}

impl Sim {
    fn new(init: Program) -> Self {
        Self {
            init: Mutex::new(Some(init)),
            root: Arc::new(SimInode { path: "/" }),
            spaces: AtomicUsize::new(0),
            first_runs: AtomicUsize::new(0),
            fail_uvm_create: AtomicBool::new(false),
            fail_uvm_copy: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    fn range(space: &Space, addr: VA, len: usize) -> Result<std::ops::Range<usize>, KernelError> {
        let start = addr.as_usize();
        match start.checked_add(len) {
            Some(end) if end <= space.mem.len() => Ok(start..end),
            _ => Err(KernelError::BadAddress),
        }
    }
}

impl Platform for Sim {
    type Uvm = Space;
    type File = Arc<SimFile>;
    type Inode = Arc<SimInode>;

    fn uvm_create(&self, _trapframe: &TrapFrame) -> Result<Space, KernelError> {
        if self.fail_uvm_create.load(Ordering::SeqCst) {
            return Err(KernelError::OutOfMemory);
        }
        self.spaces.fetch_add(1, Ordering::SeqCst);
        Ok(Space::default())
    }

    fn uvm_init(&self, uvm: &mut Space, code: &[u8]) -> Result<(), KernelError> {
        assert!(code.len() <= PGSIZE, "uvm_init: more than a page");
        uvm.mem = vec![0; PGSIZE];
        uvm.mem[..code.len()].copy_from_slice(code);
        uvm.program = self.init.lock().unwrap().take();
        Ok(())
    }

    fn uvm_copy(&self, from: &mut Space, to: &mut Space, size: usize) -> Result<(), KernelError> {
        if self.fail_uvm_copy.load(Ordering::SeqCst) {
            return Err(KernelError::OutOfMemory);
        }
        to.mem = from.mem[..size].to_vec();
        to.program = from.pending.take();
        Ok(())
    }

    fn uvm_alloc(&self, uvm: &mut Space, _old: usize, new: usize) -> Result<usize, KernelError> {
        uvm.mem.resize(new, 0);
        Ok(new)
    }

    fn uvm_dealloc(&self, uvm: &mut Space, _old: usize, new: usize) -> usize {
        uvm.mem.truncate(new);
        new
    }

    fn uvm_free(&self, _uvm: Space, _size: usize) {
        self.spaces.fetch_sub(1, Ordering::SeqCst);
    }

    fn copy_out(&self, uvm: &mut Space, dst: VA, src: &[u8]) -> Result<(), KernelError> {
        let range = Self::range(uvm, dst, src.len())?;
        uvm.mem[range].copy_from_slice(src);
        Ok(())
    }

    fn copy_in(&self, uvm: &mut Space, dst: &mut [u8], src: VA) -> Result<(), KernelError> {
        let range = Self::range(uvm, src, dst.len())?;
        dst.copy_from_slice(&uvm.mem[range]);
        Ok(())
    }

    fn file_dup(&self, file: &Arc<SimFile>) -> Arc<SimFile> {
        Arc::clone(file)
    }

    fn file_close(&self, file: Arc<SimFile>) {
        drop(file);
    }

    fn root_dir(&self) -> Result<Arc<SimInode>, KernelError> {
        Ok(Arc::clone(&self.root))
    }

    fn inode_dup(&self, inode: &Arc<SimInode>) -> Arc<SimInode> {
        Arc::clone(inode)
    }

    fn inode_put(&self, inode: Arc<SimInode>) {
        drop(inode);
    }

    fn first_run(&self) {
        self.first_runs.fetch_add(1, Ordering::SeqCst);
    }

    fn user_return(kernel: &'static Kernel<Self>) -> ! {
        interrupts::enable();

        let user = User { kernel };
        let program = unsafe { kernel.current_proc().data_mut() }
            .pagetable_mut()
            .program
            .take();

        let status = match program {
            Some(program) => match panic::catch_unwind(AssertUnwindSafe(|| program(&user))) {
                Ok(()) => 0,
                // a reaped zombie unwinding out of exit, not a failed program
                Err(payload) if hosted::is_retired(payload.as_ref()) => {
                    panic::resume_unwind(payload)
                }
                Err(_) => PANIC_STATUS,
            },
            None => 0,
        };
        user.exit(status)
    }
}

/// The system call interface, as seen from a user program.
pub struct User {
    kernel: &'static Kernel<Sim>,
}

impl User {
    pub fn kernel(&self) -> &'static Kernel<Sim> {
        self.kernel
    }

    fn call(&self, number: Syscall, args: &[usize]) -> usize {
        let proc = self.kernel.current_proc();
        {
            let trapframe = unsafe { proc.data_mut() }.trapframe_mut();
            trapframe.a7 = number as usize;
            let regs = [
                &mut trapframe.a0,
                &mut trapframe.a1,
                &mut trapframe.a2,
                &mut trapframe.a3,
            ];
            for (reg, &arg) in regs.into_iter().zip(args) {
                *reg = arg;
            }
        }

        syscall(self.kernel);

        self.kernel.current_proc().data().trapframe().a0
    }

    fn decode(a0: usize) -> Result<usize, SysError> {
        match SysError::from_return(a0) {
            Some(err) => Err(err),
            None => Ok(a0),
        }
    }

    /// Raw system call, for numbers the helpers don't cover.
    pub fn syscall(&self, number: usize) -> Result<usize, SysError> {
        let proc = self.kernel.current_proc();
        unsafe { proc.data_mut() }.trapframe_mut().a7 = number;
        syscall(self.kernel);
        Self::decode(self.kernel.current_proc().data().trapframe().a0)
    }

    /// Forks a child that runs `child`. Returns the child's pid.
    pub fn fork(&self, child: impl FnOnce(&User) + Send + 'static) -> Result<usize, SysError> {
        self.space().pending = Some(Box::new(child));
        let result = Self::decode(self.call(Syscall::Fork, &[]));
        self.space().pending = None;
        result
    }

    pub fn exit(&self, status: i32) -> ! {
        self.call(Syscall::Exit, &[status as isize as usize]);
        unreachable!("exit returned");
    }

    /// Waits for a child and returns its pid and exit status.
    pub fn wait(&self) -> Result<(usize, i32), SysError> {
        let pid = Self::decode(self.call(Syscall::Wait, &[STATUS_ADDR]))?;
        let mut status = [0u8; 4];
        self.kernel
            .copy_from_user(VA::new(STATUS_ADDR), &mut status)
            .expect("status readable");
        Ok((pid, i32::from_le_bytes(status)))
    }

    /// Waits for a child, asking for its status at `addr` (0 for none).
    pub fn wait_at(&self, addr: usize) -> Result<usize, SysError> {
        Self::decode(self.call(Syscall::Wait, &[addr]))
    }

    pub fn getpid(&self) -> usize {
        Self::decode(self.call(Syscall::Getpid, &[])).expect("getpid")
    }

    pub fn kill(&self, pid: usize) -> Result<usize, SysError> {
        Self::decode(self.call(Syscall::Kill, &[pid]))
    }

    pub fn sbrk(&self, n: isize) -> Result<usize, SysError> {
        Self::decode(self.call(Syscall::Sbrk, &[n as usize]))
    }

    pub fn r#yield(&self) {
        self.kernel.r#yield();
    }

    /// Yields until `done` returns true.
    pub fn spin_until(&self, mut done: impl FnMut() -> bool) {
        while !done() {
            self.r#yield();
        }
    }

    /// Value of the return register, as the process would see it on entry.
    pub fn a0(&self) -> usize {
        self.kernel.current_proc().data().trapframe().a0
    }

    /// Table slot of the calling process.
    pub fn slot(&self) -> usize {
        self.kernel.current_proc().id
    }

    pub fn parent_pid(&self) -> Option<usize> {
        let proc = self.kernel.current_proc();
        self.kernel.parent_pid(proc).map(|pid| *pid)
    }

    /// Parent pid of the process with `pid`, if it exists and has one.
    pub fn parent_of(&self, pid: usize) -> Option<usize> {
        let proc = self.kernel.procs().iter().find(|proc| {
            let inner = proc.inner.lock();
            inner.state != ProcState::Unused && inner.pid == Pid::from_usize(pid)
        })?;
        self.kernel.parent_pid(proc).map(|pid| *pid)
    }

    pub fn name(&self) -> String {
        self.kernel.current_proc().data().name.clone()
    }

    /// Puts `file` in descriptor `fd` of the calling process.
    pub fn install(&self, fd: usize, file: Arc<SimFile>) {
        let data = unsafe { self.kernel.current_proc().data_mut() };
        assert!(data.open_files[fd].is_none(), "fd {fd} in use");
        data.open_files[fd] = Some(file);
    }

    /// State of the process with `pid`, if it exists.
    pub fn state_of(&self, pid: usize) -> Option<ProcState> {
        self.kernel.procs().iter().find_map(|proc| {
            let inner = proc.inner.lock();
            (inner.state != ProcState::Unused && inner.pid == Pid::from_usize(pid))
                .then_some(inner.state)
        })
    }

    /// Sleeps on `channel` for good, holding nothing but its own process lock.
    pub fn park(&self) -> ! {
        let proc = self.kernel.current_proc();
        let mut inner = proc.inner.lock();
        loop {
            inner = self.kernel.sleep(Channel::Log, inner);
        }
    }

    fn space(&self) -> &mut Space {
        unsafe { self.kernel.current_proc().data_mut() }.pagetable_mut()
    }
}

/// A running machine. Halts when dropped.
pub struct Machine {
    pub kernel: &'static Kernel<Sim>,
    harts: &'static Harts,
    /// `(pid, status)` of every child init reaps.
    pub reaped: Receiver<(usize, i32)>,
    failed: Arc<AtomicBool>,
}

impl Machine {
    /// Boots `cpus` harts. Init runs `main`, then reaps children until the machine halts.
    pub fn boot(cpus: usize, main: impl FnOnce(&User) + Send + 'static) -> Machine {
        let (reaped_tx, reaped) = mpsc::channel();
        let failed = Arc::new(AtomicBool::new(false));

        let init_failed = Arc::clone(&failed);
        let init: Program = Box::new(move |user| {
            if panic::catch_unwind(AssertUnwindSafe(|| main(user))).is_err() {
                init_failed.store(true, Ordering::SeqCst);
            }

            loop {
                if user.kernel().platform().stopped.load(Ordering::SeqCst) {
                    user.park();
                }
                match user.wait() {
                    Ok(child) => {
                        let _ = reaped_tx.send(child);
                    }
                    Err(_) => user.r#yield(),
                }
            }
        });

        let kstacks = KstackPool::with_capacity(NPROC).expect("kstack pool");
        let kernel: &'static Kernel<Sim> =
            Box::leak(Box::new(Kernel::new(Sim::new(init), kstacks)));
        let harts = Harts::new();

        for id in 0..cpus {
            harts.start(id, move || {
                interrupts::disable();
                if id == 0 {
                    kernel.user_init().expect("user_init");
                }
                unsafe { kernel.scheduler() }
            });
        }

        Machine {
            kernel,
            harts,
            reaped,
            failed,
        }
    }

    /// Returns true if init's `main` panicked.
    pub fn init_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Receives the next `n` children reaped by init, sorted by pid.
    pub fn reap(&self, n: usize) -> Vec<(usize, i32)> {
        let mut children: Vec<_> = (0..n).map(|_| recv(&self.reaped)).collect();
        children.sort();
        children
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.kernel.platform().stopped.store(true, Ordering::SeqCst);
        self.harts.halt();
    }
}
