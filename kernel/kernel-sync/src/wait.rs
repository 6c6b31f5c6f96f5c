//! Wait channels: how a contended [`SleepLock`](crate::SleepLock) waiter
//! passes the time.
//!
//! The protocol is ticket-based to close the lost-wakeup window: a waiter
//! snapshots [`WaitChannel::ticket`] *before* re-checking the guarded
//! condition, and [`WaitChannel::wait`] returns immediately if any wake
//! happened after that snapshot.

use core::hint::spin_loop;

/// A place for threads to wait for a state change published by another
/// thread.
///
/// Implementations may return from [`wait`](Self::wait) spuriously; callers
/// must re-check their condition in a loop. The one guarantee is that a
/// `wake_all` that happens after `ticket` and before `wait` is not lost.
pub trait WaitChannel: Default {
    /// Snapshot the channel's wake counter. Must be called before the
    /// caller re-checks the condition it intends to wait on.
    fn ticket(&self) -> u64;

    /// Wait until a wake newer than `ticket` is observed. May also return
    /// spuriously or immediately.
    fn wait(&self, ticket: u64);

    /// Publish a wake to every current and future waiter holding an older
    /// ticket.
    fn wake_all(&self);
}

/// Degenerate channel for environments without a scheduler.
///
/// `wait` is a single pause hint, so blocked callers effectively spin. A
/// kernel with a scheduler should supply a channel whose `wait` sleeps the
/// current thread instead.
#[derive(Default)]
pub struct SpinWait;

impl WaitChannel for SpinWait {
    #[inline]
    fn ticket(&self) -> u64 {
        0
    }

    #[inline]
    fn wait(&self, _ticket: u64) {
        spin_loop();
    }

    #[inline]
    fn wake_all(&self) {}
}

/// Condvar-backed channel that actually deschedules waiters.
///
/// The counter under the mutex is the wake epoch; `wait` sleeps until the
/// epoch has moved past the caller's ticket.
#[cfg(any(test, feature = "std"))]
pub struct ParkWait {
    epoch: std::sync::Mutex<u64>,
    wake: std::sync::Condvar,
}

#[cfg(any(test, feature = "std"))]
impl Default for ParkWait {
    fn default() -> Self {
        Self {
            epoch: std::sync::Mutex::new(0),
            wake: std::sync::Condvar::new(),
        }
    }
}

#[cfg(any(test, feature = "std"))]
impl WaitChannel for ParkWait {
    fn ticket(&self) -> u64 {
        *self.epoch.lock().expect("wait channel poisoned")
    }

    fn wait(&self, ticket: u64) {
        let mut epoch = self.epoch.lock().expect("wait channel poisoned");
        while *epoch == ticket {
            epoch = self.wake.wait(epoch).expect("wait channel poisoned");
        }
    }

    fn wake_all(&self) {
        *self.epoch.lock().expect("wait channel poisoned") += 1;
        self.wake.notify_all();
    }
}
