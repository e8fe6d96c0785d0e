use core::cell::UnsafeCell;

use crate::platform::Platform;
use crate::proc::{Channel, Kernel, Pid};
use crate::spinlock::SpinLock;

/// Inner state of a SleepLock.
/// This is guarded by a SpinLock.
#[derive(Debug)]
pub struct SleepLockInner {
    locked: bool,
    pid: Option<Pid>,
}

/// A lock that causes the caller to sleep while waiting.
/// Unlike SpinLock, interrupts remain enabled while holding a SleepLock.
#[derive(Debug)]
pub struct SleepLock<T> {
    /// SpinLock only protects the lock state and not the data
    inner: SpinLock<SleepLockInner>,
    data: UnsafeCell<T>,
}

/// A guard that releases the SleepLock when dropped.
pub struct SleepLockGuard<'a, T: 'a, P: Platform> {
    lock: &'a SleepLock<T>,
    kernel: &'a Kernel<P>,
}

impl<T> SleepLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        SleepLock {
            inner: SpinLock::new(
                SleepLockInner {
                    pid: None,
                    locked: false,
                },
                name,
            ),
            data: UnsafeCell::new(value),
        }
    }

    fn channel(&self) -> Channel {
        Channel::Lock(self as *const _ as usize)
    }

    /// Returns true if the current process of `kernel` is holding the lock.
    pub fn holding<P: Platform>(&self, kernel: &Kernel<P>) -> bool {
        let pid = kernel.current_proc().inner.lock().pid;
        let inner = self.inner.lock();

        inner.locked && inner.pid == Some(pid)
    }

    /// Acquires the lock, sleeping in `kernel`'s current process until it is free.
    pub fn lock<'a, P: Platform>(&'a self, kernel: &'a Kernel<P>) -> SleepLockGuard<'a, T, P> {
        let pid = kernel.current_proc().inner.lock().pid;
        let mut inner = self.inner.lock();

        while inner.locked {
            inner = kernel.sleep(self.channel(), inner);
        }

        inner.locked = true;
        inner.pid = Some(pid);

        SleepLockGuard { lock: self, kernel }
    }

    /// Consumes the mutex and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a reference to the inner data from a shared reference to the mutex.
    ///
    /// # Safety
    /// The caller must ensure that the mutex is locked.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

impl<'a, T: 'a, P: Platform> Drop for SleepLockGuard<'a, T, P> {
    fn drop(&mut self) {
        let mut inner = self.lock.inner.lock();
        inner.locked = false;
        inner.pid = None;

        // wake up any waiters before dropping the spinlock
        self.kernel.wakeup(self.lock.channel());
    }
}

impl<T, P: Platform> core::ops::Deref for SleepLockGuard<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, P: Platform> core::ops::DerefMut for SleepLockGuard<'_, T, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

/// # Safety
/// The lock can give `&mut T` to whichever thread acquires it and can call `into_inner()`.
/// Therefore, `T` must be `Send` to ensure that it is safe to send the inner data across threads.
unsafe impl<T> Sync for SleepLock<T> where T: Send {}

/// # Safety
/// `Send`ing the lock also transfers the ownership of the inner data `T`.
/// Therefore, `T` must be `Send` to ensure that it is safe to send the inner data across threads.
unsafe impl<T> Send for SleepLock<T> where T: Send {}
