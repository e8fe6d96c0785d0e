use super::{Channel, Kernel, ProcState};
use crate::platform::Platform;
use crate::spinlock::{SpinLock, SpinLockGuard};

impl<P: Platform> Kernel<P> {
    /// Atomically releases a condition's lock and sleeps on channel.
    /// Reacquires the condition's lock when awakened.
    ///
    /// The condition may be the current process's own lock, in which case it is simply kept.
    pub fn sleep<'a, T>(
        &self,
        channel: Channel,
        condition_lock: SpinLockGuard<'a, T>,
    ) -> SpinLockGuard<'a, T> {
        let proc = self.current_proc();

        if condition_lock.is_lock(&proc.inner) {
            let condition_mutex = SpinLockGuard::leak(condition_lock);

            // # Safety: the leaked guard was our own proc lock, so we hold it and nobody else has
            // a guard for it.
            let mut inner = unsafe { proc.inner.assume_locked() };
            inner.channel = Some(channel);
            inner.state = ProcState::Sleeping;

            let mut inner = self.sched(proc, inner);
            inner.channel = None;
            SpinLockGuard::leak(inner);

            // # Safety: still held, and the only guard was just leaked
            return unsafe { condition_mutex.assume_locked() };
        }

        // To make sure the condition is not resolved before we sleep, we acquire proc's lock
        // before unlocking the condition's lock. `wakeup()` must also acquire proc's lock to
        // resolve the condition, which it cannot do before we release it.
        let condition_mutex;
        {
            let mut inner = proc.inner.lock();

            condition_mutex = SpinLock::unlock(condition_lock);

            // go to sleep.
            inner.channel = Some(channel);
            inner.state = ProcState::Sleeping;

            // this is where we switch to scheduler (to another proc).
            inner = self.sched(proc, inner);
            // this is where we switch back to the original proc.

            inner.channel = None;
        } // drop inner lock

        // reacquire original lock.
        condition_mutex.lock()
    }

    /// Wakes up all processes sleeping on channel.
    /// Must be called without any proc lock.
    pub fn wakeup(&self, channel: Channel) {
        // do not unwrap current proc here, since it might not exist if it is called from the
        // scheduler's context.
        let current_id = self.current_proc_opt().map(|proc| proc.id);

        for proc in self.procs.iter() {
            if current_id == Some(proc.id) {
                continue;
            }

            let mut inner = proc.inner.lock();
            if inner.state == ProcState::Sleeping && inner.channel == Some(channel) {
                inner.state = ProcState::Runnable;
            }
        }
    }
}
