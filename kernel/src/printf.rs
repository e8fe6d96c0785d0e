use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(target_os = "none")]
use crate::spinlock::SpinLock;

pub static PRINTF: Printf = Printf {
    #[cfg(target_os = "none")]
    writer: SpinLock::new(Writer, "printf"),
    locking: AtomicBool::new(true),
    panicked: AtomicBool::new(false),
};

/// Console output `putc`, registered by the console driver. Zero until then.
static CONSOLE: AtomicUsize = AtomicUsize::new(0);

pub struct Printf {
    #[cfg(target_os = "none")]
    writer: SpinLock<Writer>,
    locking: AtomicBool,
    panicked: AtomicBool,
}

impl Printf {
    pub fn is_panicked(&self) -> &AtomicBool {
        &self.panicked
    }
}

/// Registers the function used to put a character on the console.
pub fn set_console(putc: fn(u8)) {
    CONSOLE.store(putc as usize, Ordering::Release);
}

pub struct Writer;

impl Writer {
    fn print(&self, c: u8) {
        // the panicking hart owns the console from here on
        if PRINTF.is_panicked().load(Ordering::Relaxed) {
            freeze();
        }

        let putc = CONSOLE.load(Ordering::Acquire);
        if putc != 0 {
            // # Safety: only `set_console` stores into CONSOLE, and it stores a `fn(u8)`.
            let putc = unsafe { core::mem::transmute::<usize, fn(u8)>(putc) };
            putc(c);
        }
    }
}

#[cfg(target_os = "none")]
fn freeze() -> ! {
    #[allow(clippy::empty_loop)]
    loop {}
}

/// Hosted harts are threads, so a frozen one parks instead of spinning.
#[cfg(not(target_os = "none"))]
fn freeze() -> ! {
    loop {
        std::thread::park();
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.print(byte);
        }
        Ok(())
    }
}

#[cfg(target_os = "none")]
pub fn _print(args: fmt::Arguments<'_>, newline: bool) {
    use core::fmt::Write;

    if PRINTF.locking.load(Ordering::Relaxed) {
        let mut lock = PRINTF.writer.lock();

        let _ = lock.write_fmt(args);
        if newline {
            let _ = lock.write_char('\n');
        }
    } else {
        // We are panicked, don't care about the lock
        let writer = unsafe { PRINTF.writer.get_mut_unchecked() };

        let _ = writer.write_fmt(args);
        if newline {
            let _ = writer.write_char('\n');
        }
    }
}

/// On a host OS the console is the process's stderr, which does its own locking.
#[cfg(not(target_os = "none"))]
pub fn _print(args: fmt::Arguments<'_>, newline: bool) {
    use std::io::Write;

    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_fmt(args);
    if newline {
        let _ = stderr.write_all(b"\n");
    }
}

/// `fmt::Write` adapter over `print!`.
pub struct Console;

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        _print(format_args!("{s}"), false);
        Ok(())
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        $crate::printf::_print(format_args!($($arg)*), false);
    }};
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n");
    };
    ($($arg:tt)*) => {{
        $crate::printf::_print(format_args!($($arg)*), true);
    }};
}

#[cfg(target_os = "none")]
pub fn handle_panic(info: &core::panic::PanicInfo<'_>) -> ! {
    PRINTF.locking.store(false, Ordering::Relaxed);

    let cpu_id = unsafe { crate::arch::hart_id() };
    println!("hart {cpu_id} {info}");

    PRINTF.panicked.store(true, Ordering::Relaxed);

    #[allow(clippy::empty_loop)]
    loop {}
}
