use core::fmt::Display;

/// Kernel error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Heap allocation failed.
    Alloc,
    /// No `Unused` slot left in the process table.
    OutOfProc,
    /// No memory left for a kernel stack or a page table.
    OutOfMemory,
    /// `wait` was called by a process without children.
    NoChildren,
    /// The calling process has been killed.
    Killed,
    /// A user address is not mapped or out of range.
    BadAddress,
    InvalidArgument,
    /// No process with the given pid.
    NoProcess,
}

impl KernelError {
    /// Returns true if the error means some fixed resource ran out, as opposed to a bad request.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::Alloc | Self::OutOfProc | Self::OutOfMemory)
    }
}

impl Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::Alloc => write!(f, "alloc error"),
            KernelError::OutOfProc => write!(f, "out of proc"),
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::NoChildren => write!(f, "no children"),
            KernelError::Killed => write!(f, "killed"),
            KernelError::BadAddress => write!(f, "bad address"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::NoProcess => write!(f, "no such process"),
        }
    }
}

/// Return an error, logging file:line. Use instead of `return Err(...)`.
#[macro_export]
macro_rules! err {
    ($e:expr) => {{
        #[cfg(debug_assertions)]
        {
            let _lock = $crate::cpu::lock_current_cpu();
            #[allow(unused_unsafe)]
            let cpu_id = unsafe { $crate::arch::hart_id() };
            $crate::println!(
                "! hart {} errored at {}:{}: {}",
                cpu_id,
                file!(),
                line!(),
                $e
            );
        }
        return Err($e.into());
    }};
}

/// Log error.
#[macro_export]
macro_rules! log {
    ($e:expr) => {
        match $e {
            Ok(v) => Ok(v),
            Err(e) => {
                #[cfg(debug_assertions)]
                $crate::println!("  at {}:{}", file!(), line!());
                Err(e)
            }
        }
    };
}

/// Propagate error with location logging. Use instead of `?`.
#[macro_export]
macro_rules! try_log {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                #[cfg(debug_assertions)]
                $crate::println!("  at {}:{}", file!(), line!());
                return Err(e.into());
            }
        }
    };
}
