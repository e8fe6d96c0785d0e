use crate::platform::Platform;
use crate::proc::Pid;
use crate::syscall::{SysError, SyscallArgs};

pub fn sys_exit<P: Platform>(args: &SyscallArgs<'_, P>) -> ! {
    let n = args.get_int(0) as i32;
    args.kernel().exit(n);
}

pub fn sys_getpid<P: Platform>(args: &SyscallArgs<'_, P>) -> Result<usize, SysError> {
    let pid = args.proc().inner.lock().pid;
    Ok(*pid)
}

pub fn sys_fork<P: Platform>(args: &SyscallArgs<'_, P>) -> Result<usize, SysError> {
    let pid = try_log!(args.kernel().fork());
    Ok(*pid)
}

pub fn sys_wait<P: Platform>(args: &SyscallArgs<'_, P>) -> Result<usize, SysError> {
    let addr = args.get_addr(0);
    let pid = try_log!(args.kernel().wait(addr));
    Ok(*pid)
}

pub fn sys_sbrk<P: Platform>(args: &SyscallArgs<'_, P>) -> Result<usize, SysError> {
    let size = args.get_int(0);
    let addr = args.proc().data().size;

    try_log!(args.kernel().grow(size));
    Ok(addr)
}

pub fn sys_kill<P: Platform>(args: &SyscallArgs<'_, P>) -> Result<usize, SysError> {
    let pid = args.get_int(0);
    if pid <= 0 {
        err!(SysError::InvalidArgument);
    }

    if args.kernel().kill(Pid::from_usize(pid as usize)) {
        Ok(0)
    } else {
        err!(SysError::NoProcess);
    }
}
