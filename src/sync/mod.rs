//! Synchronization primitives with loom support.
//!
//! Under normal compilation, re-exports from std/parking_lot/crossbeam.
//! Under `cfg(loom)`, uses loom's equivalents so the latch can be model checked.
//!
//! Import from here instead of `std::sync::atomic` or `parking_lot`:
//!
//! ```ignore
//! use crate::sync::{AtomicBool, AtomicU8, Mutex, Ordering};
//! use crate::sync::epoch::{self as epoch, Atomic, Owned, Shared};
//! ```

// Some items are only used under one of the two cfgs
#![allow(unused)]

pub mod epoch;

// ===========================================================================
// Atomic Primitives
// ===========================================================================

#[cfg(not(loom))]
pub use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[cfg(loom)]
pub use loom::sync::atomic::{AtomicBool, AtomicU8, Ordering};

// ===========================================================================
// Spin Hints
// ===========================================================================

#[cfg(not(loom))]
pub use std::hint::spin_loop;
#[cfg(not(loom))]
pub use std::thread::yield_now;

#[cfg(loom)]
pub use loom::hint::spin_loop;
#[cfg(loom)]
pub use loom::thread::yield_now;

// ===========================================================================
// Mutex
// ===========================================================================

// parking_lot's Mutex hands out guards directly while loom's returns
// `LockResult`/`TryLockResult`, so loom gets a thin wrapper with the
// parking_lot surface.

#[cfg(not(loom))]
pub use parking_lot::{Mutex, MutexGuard};

#[cfg(loom)]
mod loom_mutex {
	use loom::sync::{Mutex as LoomMutex, MutexGuard as LoomGuard};

	/// A wrapper around loom's Mutex that provides a parking_lot-compatible API.
	pub struct Mutex<T>(LoomMutex<T>);

	impl<T> Mutex<T> {
		pub fn new(value: T) -> Self {
			Mutex(LoomMutex::new(value))
		}

		pub fn lock(&self) -> MutexGuard<'_, T> {
			MutexGuard(self.0.lock().unwrap())
		}

		pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
			self.0.try_lock().ok().map(MutexGuard)
		}
	}

	pub struct MutexGuard<'a, T>(LoomGuard<'a, T>);

	impl<'a, T> std::ops::Deref for MutexGuard<'a, T> {
		type Target = T;
		fn deref(&self) -> &T {
			&self.0
		}
	}

	impl<'a, T> std::ops::DerefMut for MutexGuard<'a, T> {
		fn deref_mut(&mut self) -> &mut T {
			&mut self.0
		}
	}
}

#[cfg(loom)]
pub use loom_mutex::{Mutex, MutexGuard};
