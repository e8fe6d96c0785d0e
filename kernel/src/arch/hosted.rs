//! Harts simulated with OS threads, for running the kernel inside a host process.
//!
//! Each kernel context (a CPU's scheduler loop, or a process's kernel thread) is an OS thread.
//! A hart is a token that exactly one of those threads holds at a time; `swtch` passes the
//! token to the thread behind `new` and blocks until some thread passes it back to `old`.
//! The interrupt-enable bit lives with the hart, so it follows the token across a switch
//! just like `sstatus` follows the hart on real hardware.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cpu::CpuTable;
use crate::param::NCPU;

/// A simulated machine: per-CPU descriptors plus each hart's interrupt-enable bit.
pub struct Harts {
    cpus: CpuTable,
    sie: [AtomicBool; NCPU],
    halted: AtomicBool,
}

#[derive(Clone, Copy)]
struct Hart {
    harts: &'static Harts,
    id: usize,
}

thread_local! {
    static HART: Cell<Option<Hart>> = const { Cell::new(None) };
}

fn current() -> Hart {
    match HART.with(Cell::get) {
        Some(hart) => hart,
        None => panic!("thread is not running on a hart"),
    }
}

impl Harts {
    /// Creates a machine with `NCPU` harts, all with interrupts off.
    pub fn new() -> &'static Harts {
        Box::leak(Box::new(Harts {
            cpus: CpuTable::new(),
            sie: [const { AtomicBool::new(false) }; NCPU],
            halted: AtomicBool::new(false),
        }))
    }

    /// Makes the calling thread run as hart `id`.
    pub fn enter(&'static self, id: usize) {
        assert!(id < NCPU, "hart id out of range");
        HART.with(|h| h.set(Some(Hart { harts: self, id })));
    }

    /// Spawns a thread running `f` as hart `id`.
    pub fn start<F>(&'static self, id: usize, f: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("hart{id}"))
            .spawn(move || {
                self.enter(id);
                f();
            })
            .expect("spawn hart thread")
    }

    /// Stops idle harts for good. Harts running a process keep going until it next sleeps.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

pub mod interrupts {
    use core::sync::atomic::Ordering;

    use super::current;

    /// Returns true if device interrupts are enabled on this hart.
    pub fn get() -> bool {
        let hart = current();
        hart.harts.sie[hart.id].load(Ordering::Relaxed)
    }

    /// Enables device interrupts.
    pub fn enable() {
        let hart = current();
        hart.harts.sie[hart.id].store(true, Ordering::Relaxed);
    }

    /// Disables device interrupts.
    pub fn disable() {
        let hart = current();
        hart.harts.sie[hart.id].store(false, Ordering::Relaxed);
    }
}

/// Returns the id of the hart this thread holds.
///
/// # Safety
/// Must be called with interrupts disabled to prevent race with process being moved to a different CPU.
pub unsafe fn hart_id() -> usize {
    current().id
}

/// Returns the per-CPU descriptors of the machine this thread runs on.
pub fn cpu_table() -> &'static CpuTable {
    &current().harts.cpus
}

/// Idles briefly, standing in for `wfi`. A halted machine never wakes up again.
pub fn wait_for_interrupt() {
    if current().harts.is_halted() {
        loop {
            thread::park();
        }
    }
    thread::sleep(Duration::from_micros(100));
}

/// Unwind payload that ends the thread of a context freed while parked in `swtch`.
///
/// Code that catches unwinds on a kernel thread must resume this one.
#[derive(Debug)]
pub struct Retired;

/// Returns true if `payload` came from a retired context.
pub fn is_retired(payload: &(dyn std::any::Any + Send)) -> bool {
    payload.is::<Retired>()
}

struct Slot {
    hart: Option<Hart>,
    entry: Option<extern "C-unwind" fn()>,
    retired: bool,
}

/// The rendezvous point of one kernel context.
struct Baton {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Baton {
    fn new(entry: Option<extern "C-unwind" fn()>) -> Self {
        Self {
            slot: Mutex::new(Slot {
                hart: None,
                entry,
                retired: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gives `hart` to the thread behind this baton, starting that thread if it never ran.
    fn hand_over(self: &Arc<Self>, hart: Hart) {
        let entry = {
            let mut slot = self.slot();
            assert!(slot.hart.is_none(), "swtch to a running context");
            slot.hart = Some(hart);
            slot.entry.take()
        };
        self.ready.notify_one();

        if let Some(entry) = entry {
            let baton = Arc::clone(self);
            thread::Builder::new()
                .name("kthread".into())
                .spawn(move || {
                    let run = AssertUnwindSafe(move || {
                        let hart = baton.receive();
                        HART.with(|h| h.set(Some(hart)));
                        drop(baton);
                        entry();
                    });
                    if let Err(payload) = panic::catch_unwind(run)
                        && !is_retired(payload.as_ref())
                    {
                        panic::resume_unwind(payload);
                    }
                })
                .expect("spawn kernel thread");
        }
    }

    /// Lets a thread parked on this baton go. Nothing switches here again.
    fn retire(&self) {
        self.slot().retired = true;
        self.ready.notify_all();
    }

    /// Blocks until some thread hands a hart to this baton. Unwinds with [`Retired`] once the
    /// context is freed instead.
    fn receive(&self) -> Hart {
        let mut slot = self.slot();
        loop {
            if let Some(hart) = slot.hart.take() {
                return hart;
            }
            if slot.retired {
                drop(slot);
                panic::resume_unwind(Box::new(Retired));
            }
            slot = self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Saved kernel context: the thread that resumes when something switches here.
#[derive(Default)]
pub struct Context {
    thread: Option<Arc<Baton>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("saved", &self.thread.is_some())
            .finish()
    }
}

impl Context {
    pub const fn new() -> Self {
        Self { thread: None }
    }

    /// Forgets the saved context. A thread still parked on it exits.
    pub fn zero(&mut self) {
        if let Some(baton) = self.thread.take() {
            baton.retire();
        }
    }

    /// Sets up the context to start executing at `entry`. The kernel stack is unused here,
    /// each context gets the stack of its own thread.
    pub fn prepare(&mut self, entry: extern "C-unwind" fn(), _stack_top: usize) {
        self.thread = Some(Arc::new(Baton::new(Some(entry))));
    }
}

/// Hands this thread's hart to the context in `new` and blocks until a hart comes back to `old`.
///
/// # Safety
/// `new` must hold a context saved by `swtch` or set up by `Context::prepare`, and nothing may
/// switch to `old` before this call parks.
pub unsafe fn swtch(old: *mut Context, new: *const Context) {
    let hart = match HART.with(Cell::take) {
        Some(hart) => hart,
        None => panic!("swtch without a hart"),
    };

    let own = unsafe {
        Arc::clone(
            (*old)
                .thread
                .get_or_insert_with(|| Arc::new(Baton::new(None))),
        )
    };
    let target = match unsafe { (*new).thread.as_ref() } {
        Some(target) => Arc::clone(target),
        None => panic!("swtch to an empty context"),
    };

    // `old` and `new` belong to the next hart holder from here on.
    target.hand_over(hart);
    drop(target);

    let hart = own.receive();
    HART.with(|h| h.set(Some(hart)));
}
