//! # Kernel synchronization primitives
//!
//! Two lock flavors for two kinds of critical section:
//!
//! - [`SpinLock`]: non-blocking mutual exclusion for short sections; never
//!   deschedules the caller, so it is safe from contexts that cannot sleep.
//! - [`SleepLock`]: exclusive ownership across long operations (disk
//!   transfers); contended callers are parked through a [`WaitChannel`]
//!   rather than burning cycles.
//!
//! The wait channel is the seam to the environment: a scheduler-backed
//! implementation deschedules waiters, [`SpinWait`] degrades to spinning
//! where no scheduler exists, and [`ParkWait`] (behind the `std` feature)
//! parks host threads so the same lock code runs under the test harness.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "std")]
extern crate std;

mod sleep_lock;
mod spin_lock;
mod wait;

pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use wait::{SpinWait, WaitChannel};

#[cfg(any(test, feature = "std"))]
pub use wait::ParkWait;
