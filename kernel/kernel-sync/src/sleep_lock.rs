use crate::{SpinLock, WaitChannel};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// Exclusive lock for long-held resources.
///
/// Where a [`SpinLock`] section is a handful of instructions, a `SleepLock`
/// is held across whole operations (a disk transfer, say) and its holder
/// is allowed to block. Contended acquirers therefore wait through the
/// channel `W` instead of spinning: under a scheduler they are descheduled
/// until the holder releases.
///
/// The lock state itself is a spin-guarded flag; the channel only carries
/// wakeups. This is the classic sleep-lock construction: check the flag
/// under the spin lock, and if it is taken, wait on the channel with a
/// ticket drawn *before* the check so a release in between is not lost.
///
/// There is no timeout and no cancellation. A holder that never releases
/// stalls every contender forever.
///
/// # Examples
/// ```rust
/// use kernel_sync::{SleepLock, SpinWait};
///
/// let lock: SleepLock<u32, SpinWait> = SleepLock::new(7);
/// {
///     let mut guard = lock.lock();
///     *guard += 1;
/// }
/// assert_eq!(*lock.lock(), 8);
/// ```
pub struct SleepLock<T, W> {
    /// `true` while some guard is alive.
    held: SpinLock<bool>,
    chan: W,
    data: UnsafeCell<T>,
}

// Safety: the held flag enforces mutual exclusion over `data`; the channel
// is shared read-mostly state with its own synchronization.
unsafe impl<T: Send, W: Sync> Sync for SleepLock<T, W> {}

impl<T, W: WaitChannel> SleepLock<T, W> {
    pub fn new(data: T) -> Self {
        Self {
            held: SpinLock::new(false),
            chan: W::default(),
            data: UnsafeCell::new(data),
        }
    }

    /// One acquisition attempt; never waits.
    #[inline]
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T, W>> {
        let mut held = self.held.lock();
        if *held {
            None
        } else {
            *held = true;
            Some(SleepLockGuard { lock: self })
        }
    }

    /// Acquire the lock, waiting through the channel while another thread
    /// holds it.
    pub fn lock(&self) -> SleepLockGuard<'_, T, W> {
        loop {
            // Ticket first: a release between the flag check and wait()
            // advances the epoch and wait() returns immediately.
            let ticket = self.chan.ticket();
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            self.chan.wait(ticket);
        }
    }

    /// Direct access through `&mut self`; no contention is possible.
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct SleepLockGuard<'a, T, W: WaitChannel> {
    lock: &'a SleepLock<T, W>,
}

impl<T, W: WaitChannel> Deref for SleepLockGuard<'_, T, W> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, W: WaitChannel> DerefMut for SleepLockGuard<'_, T, W> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, W: WaitChannel> Drop for SleepLockGuard<'_, T, W> {
    fn drop(&mut self) {
        *self.lock.held.lock() = false;
        // Wake after the flag is clear so woken waiters see it free.
        self.lock.chan.wake_all();
    }
}
