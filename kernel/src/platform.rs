//! Services the process core relies on but does not implement: user address spaces, open files
//! and inodes, and the return to user mode.

use crate::error::KernelError;
use crate::proc::{Kernel, TrapFrame};

/// A user virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct VA(usize);

impl VA {
    pub const fn new(addr: usize) -> Self {
        VA(addr)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl From<usize> for VA {
    fn from(addr: usize) -> Self {
        VA(addr)
    }
}

/// External collaborators of the process core.
///
/// Address-space methods take the space explicitly; only the process that owns a space (or the
/// one creating it, before it is runnable) ever passes it in.
pub trait Platform: Sized + Send + Sync + 'static {
    /// A user address space: page table plus the memory it maps.
    type Uvm: Send;
    /// A shared, reference-counted open file.
    type File: Send;
    /// A shared, reference-counted inode.
    type Inode: Send;

    /// Creates an empty address space with the process's trapframe mapped in.
    fn uvm_create(&self, trapframe: &TrapFrame) -> Result<Self::Uvm, KernelError>;

    /// Loads `code` at address 0 of a fresh address space. `code` fits in one page.
    fn uvm_init(&self, uvm: &mut Self::Uvm, code: &[u8]) -> Result<(), KernelError>;

    /// Copies the first `size` bytes of `from`, page tables and memory, into `to`.
    fn uvm_copy(
        &self,
        from: &mut Self::Uvm,
        to: &mut Self::Uvm,
        size: usize,
    ) -> Result<(), KernelError>;

    /// Grows the image from `old` to `new` bytes and returns the new size.
    fn uvm_alloc(&self, uvm: &mut Self::Uvm, old: usize, new: usize)
    -> Result<usize, KernelError>;

    /// Shrinks the image from `old` to `new` bytes and returns the new size.
    fn uvm_dealloc(&self, uvm: &mut Self::Uvm, old: usize, new: usize) -> usize;

    /// Releases the address space along with its `size` bytes of user memory.
    fn uvm_free(&self, uvm: Self::Uvm, size: usize);

    /// Copies `src` to user address `dst`.
    fn copy_out(&self, uvm: &mut Self::Uvm, dst: VA, src: &[u8]) -> Result<(), KernelError>;

    /// Copies from user address `src` into `dst`.
    fn copy_in(&self, uvm: &mut Self::Uvm, dst: &mut [u8], src: VA) -> Result<(), KernelError>;

    fn file_dup(&self, file: &Self::File) -> Self::File;

    /// Drops one reference, closing the file on the last one.
    fn file_close(&self, file: Self::File);

    /// Resolves `/`.
    fn root_dir(&self) -> Result<Self::Inode, KernelError>;

    fn inode_dup(&self, inode: &Self::Inode) -> Self::Inode;

    fn inode_put(&self, inode: Self::Inode);

    /// One-time initialization that must run in the context of a process, because it may sleep.
    /// Called by the first process to be scheduled, before it enters user space.
    fn first_run(&self);

    /// Enters user space in the current process. Whatever runs there comes back into the kernel
    /// through system calls; it never returns to the caller.
    fn user_return(kernel: &'static Kernel<Self>) -> !;
}
