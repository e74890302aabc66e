//! A small exclusive latch used for every guard a tree node exposes.
//!
//! Unlike a plain mutex, the tree almost never waits for a latch: a protocol
//! step calls [`Latch::try_acquire`] and, if another thread holds the latch,
//! abandons the whole attempt with [`error::Error::Unwind`] and retries from a
//! fresh traversal. The one place where waiting is acceptable uses
//! [`Latch::acquire_or_spin`], which spins and yields instead of parking the
//! thread.
//!
//! A latch carries no data. What it protects (a node's state, or one of its
//! child slots) is decided by the node, which re-checks its guarding condition
//! after the latch is granted. See `node.rs`.

use crate::error;
use crate::sync::{spin_loop, yield_now, Mutex, MutexGuard};

/// Simple spin wait implementation
struct SpinWait {
	counter: u32,
}

impl SpinWait {
	fn new() -> Self {
		SpinWait {
			counter: 0,
		}
	}

	fn spin(&mut self) -> bool {
		if self.counter < 10 {
			self.counter += 1;
			spin_loop();
			true
		} else if self.counter < 20 {
			self.counter += 1;
			yield_now();
			true
		} else {
			yield_now();
			false
		}
	}

	fn reset(&mut self) {
		self.counter = 0;
	}
}

/// An exclusive latch with non-blocking and spinning acquisition.
pub struct Latch {
	lock: Mutex<()>,
}

impl Default for Latch {
	fn default() -> Self {
		Self::new()
	}
}

impl Latch {
	/// Creates a new, unheld latch.
	#[inline]
	pub fn new() -> Latch {
		Latch {
			lock: Mutex::new(()),
		}
	}

	/// Tries to acquire the latch without waiting.
	///
	/// Returns [`error::Error::Unwind`] if any other holder exists.
	#[inline]
	pub fn try_acquire(&self) -> error::Result<LatchGuard<'_>> {
		match self.lock.try_lock() {
			Some(guard) => Ok(LatchGuard {
				_guard: guard,
			}),
			None => Err(error::Error::Unwind),
		}
	}

	/// Acquires the latch, spinning until the current holder releases it.
	///
	/// Holders of a latch never wait on another latch while holding it, so the
	/// spin is bounded by the length of one critical section.
	#[inline(never)]
	pub fn acquire_or_spin(&self) -> LatchGuard<'_> {
		let mut spinwait = SpinWait::new();
		loop {
			if let Some(guard) = self.lock.try_lock() {
				return LatchGuard {
					_guard: guard,
				};
			}
			if !spinwait.spin() {
				spinwait.reset();
			}
		}
	}
}

/// RAII structure used to release a [`Latch`] when dropped.
pub struct LatchGuard<'a> {
	_guard: MutexGuard<'a, ()>,
}
