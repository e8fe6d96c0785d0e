use super::{Channel, Kernel, Pid, Proc, ProcState};
use crate::error::KernelError;
use crate::param::{NPROC, PGSIZE};
use crate::platform::{Platform, VA};
use crate::spinlock::SpinLockGuard;

/// A user program that calls exec("/init").
/// od -t xC initcode
pub static INITCODE: [u8; 52] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02, 0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x35, 0x02,
    0x93, 0x08, 0x70, 0x00, 0x73, 0x00, 0x00, 0x00, 0x93, 0x08, 0x20, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

impl<P: Platform> Kernel<P> {
    /// Sets up first user process.
    pub fn user_init(&self) -> Result<(), KernelError> {
        let (proc, mut inner) = try_log!(self.alloc_proc());

        // # Safety: during initialization, we are the only ones with access to this proc
        let data = unsafe { proc.data_mut() };

        // allocate one user page and copy initcode's instructions and data into it.
        if let Err(err) = log!(self.platform.uvm_init(data.pagetable_mut(), &INITCODE)) {
            self.free_proc(proc, &mut inner);
            return Err(err);
        }
        data.size = PGSIZE;

        match log!(self.platform.root_dir()) {
            Ok(root) => data.cwd = Some(root),
            Err(err) => {
                self.free_proc(proc, &mut inner);
                return Err(err);
            }
        }

        // prepare for the very first "return" from kernel to user.
        let trapframe = data.trapframe_mut();
        trapframe.epc = 0; // user program counter
        trapframe.sp = PGSIZE; // user stack pointer

        data.set_name("initcode");

        assert!(self.init_proc.set(proc.id).is_ok(), "user_init twice");

        inner.state = ProcState::Runnable;

        Ok(())
        // inner lock is dropped
    }

    /// Grows or shrinks user memory of the current process by `n` bytes.
    /// The new size is reflected in `proc.data.size` and returned.
    pub fn grow(&self, n: isize) -> Result<usize, KernelError> {
        // # Safety: only the current proc touches its own memory
        let data = unsafe { self.current_proc().data_mut() };

        let mut size = data.size;

        if n > 0 {
            let new = try_log!(size.checked_add(n as usize).ok_or(KernelError::OutOfMemory));
            size = try_log!(self.platform.uvm_alloc(data.pagetable_mut(), size, new));
        } else if n < 0 {
            let shrink = n.unsigned_abs();
            if shrink > size {
                err!(KernelError::InvalidArgument);
            }

            size = self
                .platform
                .uvm_dealloc(data.pagetable_mut(), size, size - shrink);
        }

        data.size = size;
        Ok(size)
    }

    /// Creates a new process, copying the parent.
    /// Sets up the child kernel stack to return as if from `fork()` system call.
    pub fn fork(&self) -> Result<Pid, KernelError> {
        let proc = self.current_proc();
        // # Safety: we are the current proc
        let data = unsafe { proc.data_mut() };

        // allocate process
        let (new_proc, mut new_inner) = try_log!(self.alloc_proc());
        // # Safety: new_proc is not yet runnable, so we are the only ones with access to it
        let new_data = unsafe { new_proc.data_mut() };

        // copy user memory from parent to child
        let size = data.size;
        if let Err(err) = log!(self.platform.uvm_copy(
            data.pagetable_mut(),
            new_data.pagetable_mut(),
            size
        )) {
            self.free_proc(new_proc, &mut new_inner);
            return Err(err);
        }
        new_data.size = size;

        // copy saved user registers
        let new_trapframe = new_data.trapframe_mut();
        new_trapframe.clone_from(data.trapframe());

        // cause fork to return 0 in the child
        new_trapframe.a0 = 0;

        // increment reference counts on open file descriptors
        for (new_file, file) in new_data.open_files.iter_mut().zip(&data.open_files) {
            *new_file = file.as_ref().map(|file| self.platform.file_dup(file));
        }
        new_data.cwd = data.cwd.as_ref().map(|cwd| self.platform.inode_dup(cwd));

        new_data.name.clone_from(&data.name);

        let pid = new_inner.pid;

        // drop new proc's lock here
        drop(new_inner);

        {
            let mut parents = self.procs.parents.lock();
            parents[new_proc.id] = Some(proc.id);
        }

        // re-acquire new proc's lock
        let mut new_inner = new_proc.inner.lock();
        new_inner.state = ProcState::Runnable;

        Ok(pid)
    }

    /// Passes `original`'s abandoned children to init.
    ///
    /// Caller must hold the parents lock.
    pub fn reparent(
        &self,
        original: &Proc<P>,
        parents: &mut SpinLockGuard<'_, [Option<usize>; NPROC]>,
    ) {
        let init = self.init_proc.get().copied().expect("reparent without init");

        for parent in parents.iter_mut() {
            if *parent == Some(original.id) {
                *parent = Some(init);
                self.wakeup(Channel::Proc(init));
            }
        }
    }

    /// Exits the current process and does not return.
    ///
    /// An exited process remains in the zombie state until its parent calls `wait`.
    pub fn exit(&self, status: i32) -> ! {
        let proc = self.current_proc();
        assert!(!self.is_init_proc(proc), "init exiting");

        // # Safety: we are the current proc
        let data = unsafe { proc.data_mut() };

        // close all open files
        for file in &mut data.open_files {
            if let Some(file) = file.take() {
                self.platform.file_close(file);
            }
        }

        if let Some(cwd) = data.cwd.take() {
            self.platform.inode_put(cwd);
        }

        let mut parents = self.procs.parents.lock();

        // give any children to init
        self.reparent(proc, &mut parents);

        // parent might be sleeping in `wait`
        let parent_id = parents[proc.id].expect("exit no parent");
        self.wakeup(Channel::Proc(parent_id));

        let mut inner = proc.inner.lock();
        inner.xstate = status;
        inner.state = ProcState::Zombie;

        // unlock parents
        drop(parents);

        let _inner = self.sched(proc, inner);

        unreachable!("zombie exit");
    }

    /// Waits for a child process to exit and returns its pid.
    ///
    /// If `addr` is given, the child's exit status is copied there first; if that copy fails the
    /// child stays a zombie and the error is returned.
    pub fn wait(&self, addr: Option<VA>) -> Result<Pid, KernelError> {
        let current_proc = self.current_proc();
        let current_id = current_proc.id;

        // analogous to wait_lock
        let mut parents = self.procs.parents.lock();

        loop {
            let mut have_kids = false;

            // Scan through table looking for exited children.
            for proc in self.procs.iter() {
                if parents[proc.id] != Some(current_id) {
                    continue;
                }

                // make sure the child isn't still in exit() or swtch().
                let mut inner = proc.inner.lock();

                have_kids = true;

                if inner.state == ProcState::Zombie {
                    let pid = inner.pid;

                    if let Some(addr) = addr {
                        let xstate = inner.xstate.to_le_bytes();
                        try_log!(self.copy_to_user(&xstate, addr));
                    }

                    // clear the parent relationship
                    parents[proc.id] = None;

                    self.free_proc(proc, &mut inner);

                    return Ok(pid);
                }
            }

            // No point waiting if we don't have any children.
            if !have_kids {
                return Err(KernelError::NoChildren);
            }
            if current_proc.is_killed() {
                err!(KernelError::Killed);
            }

            // Wait for a child to exit.
            parents = self.sleep(Channel::Proc(current_id), parents);
        }
    }

    /// Kills the process with the given pid.
    ///
    /// The victim won't exit until it tries to return to user space. Returns false if no process
    /// has `pid`.
    pub fn kill(&self, pid: Pid) -> bool {
        for proc in self.procs.iter() {
            let mut inner = proc.inner.lock();
            if inner.state != ProcState::Unused && inner.pid == pid {
                inner.killed = true;

                if inner.state == ProcState::Sleeping {
                    // wakeup process from `sleep()`
                    inner.state = ProcState::Runnable;
                }

                return true;
            }
        }

        false
    }

    /// Returns the pid of `proc`'s parent, if it has one.
    ///
    /// Must be called without any proc lock held.
    pub fn parent_pid(&self, proc: &Proc<P>) -> Option<Pid> {
        let parents = self.procs.parents.lock();
        let parent = self.procs.get(parents[proc.id]?);
        let pid = parent.inner.lock().pid;
        Some(pid)
    }

    /// Copies from kernel to user space of the current process.
    pub fn copy_to_user(&self, src: &[u8], dst: VA) -> Result<(), KernelError> {
        // # Safety: we are the current proc
        let data = unsafe { self.current_proc().data_mut() };
        log!(self.platform.copy_out(data.pagetable_mut(), dst, src))
    }

    /// Copies from user space of the current process to kernel.
    pub fn copy_from_user(&self, src: VA, dst: &mut [u8]) -> Result<(), KernelError> {
        // # Safety: we are the current proc
        let data = unsafe { self.current_proc().data_mut() };
        log!(self.platform.copy_in(data.pagetable_mut(), dst, src))
    }
}
