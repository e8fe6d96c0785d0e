use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use crate::spinlock::SpinLock;

/// A synchronization primitive which can be initialized exactly once.
///
/// Reads take the state lock, so they must happen on a hart.
#[derive(Debug)]
pub struct OnceLock<T> {
    ready: SpinLock<bool>,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> OnceLock<T> {
    pub const fn new() -> Self {
        Self {
            ready: SpinLock::new(false, "oncelock"),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Stores `value` unless the lock was already initialized, in which case `value` is handed
    /// back.
    pub fn set(&self, value: T) -> Result<(), T> {
        let mut ready = self.ready.lock();
        if *ready {
            return Err(value);
        }

        unsafe { (*self.value.get()).write(value) };
        *ready = true;
        Ok(())
    }

    pub fn get(&self) -> Option<&T> {
        if *self.ready.lock() {
            // # Safety: written once before `ready` was set, never written again
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }
}

impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        if *self.ready.get_mut() {
            unsafe { self.value.get_mut().assume_init_drop() }
        }
    }
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// # Safety
/// The lock can give `&T` from multiple threads, therefore `T` must be `Sync` to ensure that it is
/// safe to share the inner data across threads.
/// The lock can also call `set()`, which may initialize the inner data from any thread.
/// Therefore, `T` must be `Send` to ensure that it is safe to send the inner data across threads.
unsafe impl<T: Sync + Send> Sync for OnceLock<T> {}

/// # Safety
/// `Send`ing the lock also transfers the ownership of the inner data `T`.
/// Therefore, `T` must be `Send` to ensure that it is safe to send the inner data across threads.
unsafe impl<T: Send> Send for OnceLock<T> {}
