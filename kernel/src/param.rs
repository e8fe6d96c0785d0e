/// maximum number of CPUs
pub const NCPU: usize = 8;
/// maximum number of processes
pub const NPROC: usize = 64;
/// open files per process
pub const NOFILE: usize = 16;
/// length of a process name, including the terminator
pub const MAXNAME: usize = 16;
/// bytes per page
pub const PGSIZE: usize = 4096;
/// kernel stack pages per process (debug needs more stack to dump)
#[cfg(debug_assertions)]
pub const NKSTACK_PAGES: usize = 8;
#[cfg(not(debug_assertions))]
pub const NKSTACK_PAGES: usize = 1;
/// bytes per kernel stack
pub const KSTACK_SIZE: usize = NKSTACK_PAGES * PGSIZE;
