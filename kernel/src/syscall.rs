use core::fmt::Display;

use crate::error::KernelError;
use crate::platform::{Platform, VA};
use crate::proc::{Kernel, Proc, TrapFrame};
use crate::sysproc::*;

/// Syscall error codes using POSIX-standard numeric values.
///
/// Kernel encodes `-(error_code as isize)` in the return register (`a0`).
/// User space decodes negative values back into `SysError` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SysError {
    NoProcess = 3,
    Interrupted = 4,
    NoChildren = 10,
    ResourceUnavailable = 11,
    OutOfMemory = 12,
    BadAddress = 14,
    InvalidArgument = 22,
    NotImplemented = 38,
}

impl SysError {
    /// Returns the error code for this error.
    pub fn as_code(self) -> u16 {
        self as u16
    }

    /// Decodes an error code into a `SysError` variant.
    pub fn from_code(code: u16) -> Self {
        match code {
            3 => Self::NoProcess,
            4 => Self::Interrupted,
            10 => Self::NoChildren,
            11 => Self::ResourceUnavailable,
            12 => Self::OutOfMemory,
            14 => Self::BadAddress,
            22 => Self::InvalidArgument,
            38 => Self::NotImplemented,
            _ => Self::InvalidArgument,
        }
    }

    /// Decodes a raw `a0` value: `None` for success, the error for `-(code)`.
    pub fn from_return(a0: usize) -> Option<Self> {
        let value = a0 as isize;
        if value < 0 && value >= -(u16::MAX as isize) {
            Some(Self::from_code((-value) as u16))
        } else {
            None
        }
    }
}

impl Display for SysError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SysError::NoProcess => write!(f, "no such process"),
            SysError::Interrupted => write!(f, "interrupted"),
            SysError::NoChildren => write!(f, "no child processes"),
            SysError::ResourceUnavailable => write!(f, "resource temporarily unavailable"),
            SysError::OutOfMemory => write!(f, "cannot allocate memory"),
            SysError::BadAddress => write!(f, "bad address"),
            SysError::InvalidArgument => write!(f, "invalid argument"),
            SysError::NotImplemented => write!(f, "function not implemented"),
        }
    }
}

impl From<KernelError> for SysError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::Alloc | KernelError::OutOfMemory => SysError::OutOfMemory,
            KernelError::OutOfProc => SysError::ResourceUnavailable,
            KernelError::NoChildren => SysError::NoChildren,
            KernelError::Killed => SysError::Interrupted,
            KernelError::BadAddress => SysError::BadAddress,
            KernelError::InvalidArgument => SysError::InvalidArgument,
            KernelError::NoProcess => SysError::NoProcess,
        }
    }
}

/// Typed syscall arguments, read from the trapframe on entry.
pub struct SyscallArgs<'a, P: Platform> {
    raw: [usize; 6],
    kernel: &'a Kernel<P>,
    proc: &'a Proc<P>,
}

impl<'a, P: Platform> SyscallArgs<'a, P> {
    fn new(trapframe: &TrapFrame, kernel: &'a Kernel<P>, proc: &'a Proc<P>) -> Self {
        Self {
            raw: [
                trapframe.a0,
                trapframe.a1,
                trapframe.a2,
                trapframe.a3,
                trapframe.a4,
                trapframe.a5,
            ],
            kernel,
            proc,
        }
    }

    pub fn kernel(&self) -> &'a Kernel<P> {
        self.kernel
    }

    pub fn proc(&self) -> &'a Proc<P> {
        self.proc
    }

    /// Returns the argument at the given index as a usize.
    pub fn get_raw(&self, index: usize) -> usize {
        match self.raw.get(index) {
            Some(&value) => value,
            None => panic!("invalid syscall argument index {}", index),
        }
    }

    /// Returns the argument at the given index as an isize.
    pub fn get_int(&self, index: usize) -> isize {
        self.get_raw(index) as isize
    }

    /// Returns the argument at the given index as a virtual address, or `None` for a null pointer.
    ///
    /// Does not check for legality, since `copyin`/`copyout` will do that.
    pub fn get_addr(&self, index: usize) -> Option<VA> {
        match self.get_raw(index) {
            0 => None,
            addr => Some(VA::from(addr)),
        }
    }
}

/// System call numbers
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Kill = 6,
    Getpid = 11,
    Sbrk = 12,
}

impl TryFrom<usize> for Syscall {
    type Error = SysError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Syscall::Fork),
            2 => Ok(Syscall::Exit),
            3 => Ok(Syscall::Wait),
            6 => Ok(Syscall::Kill),
            11 => Ok(Syscall::Getpid),
            12 => Ok(Syscall::Sbrk),
            _ => Err(SysError::NotImplemented),
        }
    }
}

/// Handle a system call of the current process.
///
/// The call number is in `a7` and the arguments in `a0..a5`; the result or `-(error code)` goes
/// back to `a0`.
pub fn syscall<P: Platform>(kernel: &Kernel<P>) {
    let proc = kernel.current_proc();
    let (number, args) = {
        let trapframe = proc.data().trapframe();
        (trapframe.a7, SyscallArgs::new(trapframe, kernel, proc))
    };

    let result = match Syscall::try_from(number) {
        Ok(syscall) => match syscall {
            Syscall::Fork => sys_fork(&args),
            Syscall::Exit => sys_exit(&args),
            Syscall::Wait => sys_wait(&args),
            Syscall::Kill => sys_kill(&args),
            Syscall::Getpid => sys_getpid(&args),
            Syscall::Sbrk => sys_sbrk(&args),
        },
        Err(e) => Err(e),
    };

    let a0 = match log!(result) {
        Ok(v) => v,
        Err(error) => {
            #[cfg(debug_assertions)]
            println!(
                "! syscall {} error ({}) from proc {} ({})",
                number,
                error,
                proc.inner.lock().pid,
                proc.data().name,
            );
            (-(error.as_code() as isize)) as usize
        }
    };

    // # Safety: we are the current proc
    unsafe { proc.data_mut() }.trapframe_mut().a0 = a0;
}
