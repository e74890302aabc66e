//! Epoch-based memory reclamation with loom support.
//!
//! Under normal compilation, re-exports crossbeam_epoch.
//! Under `cfg(loom)`, provides a small mock covering only the surface the tree
//! uses. The mock never reclaims retired nodes, which is acceptable for loom's
//! short-lived models.

// Some items are only used under loom cfg
#![allow(unused)]

#[cfg(not(loom))]
pub use crossbeam_epoch::{pin, Atomic, Guard, Owned, Shared};

#[cfg(loom)]
mod mock_epoch {
	use std::marker::PhantomData;
	use std::ptr::NonNull;

	use loom::sync::atomic::{AtomicPtr, Ordering};

	/// Stand-in for a pinned epoch. Not `Send`, like the real guard.
	pub struct Guard {
		_marker: PhantomData<*mut ()>,
	}

	impl Guard {
		/// Retires a node. The mock leaks it instead of deferring the free.
		///
		/// # Safety
		///
		/// Same contract as `crossbeam_epoch::Guard::defer_destroy`.
		pub unsafe fn defer_destroy<T>(&self, _ptr: Shared<'_, T>) {}
	}

	pub fn pin() -> Guard {
		Guard {
			_marker: PhantomData,
		}
	}

	/// A possibly-null pointer valid for the lifetime of a guard.
	pub struct Shared<'g, T> {
		ptr: *const T,
		_marker: PhantomData<(&'g (), *const T)>,
	}

	impl<'g, T> Clone for Shared<'g, T> {
		fn clone(&self) -> Self {
			*self
		}
	}

	impl<'g, T> Copy for Shared<'g, T> {}

	impl<'g, T> PartialEq for Shared<'g, T> {
		fn eq(&self, other: &Self) -> bool {
			self.ptr == other.ptr
		}
	}

	impl<'g, T> From<*const T> for Shared<'g, T> {
		fn from(ptr: *const T) -> Self {
			Shared {
				ptr,
				_marker: PhantomData,
			}
		}
	}

	impl<'g, T> Shared<'g, T> {
		pub fn null() -> Self {
			Shared::from(std::ptr::null())
		}

		pub fn is_null(&self) -> bool {
			self.ptr.is_null()
		}

		pub fn as_raw(&self) -> *const T {
			self.ptr
		}

		/// # Safety
		///
		/// If non-null, the pointee must be alive for `'g`.
		pub unsafe fn as_ref(&self) -> Option<&'g T> {
			self.ptr.as_ref()
		}

		/// # Safety
		///
		/// The pointer must be non-null, uniquely owned and allocated by `Owned::new`.
		pub unsafe fn into_owned(self) -> Owned<T> {
			Owned {
				raw: NonNull::new_unchecked(self.ptr as *mut T),
			}
		}
	}

	/// A heap allocation not yet published to any `Atomic`.
	pub struct Owned<T> {
		raw: NonNull<T>,
	}

	unsafe impl<T: Send> Send for Owned<T> {}

	impl<T> Owned<T> {
		pub fn new(value: T) -> Self {
			let boxed = Box::into_raw(Box::new(value));
			Owned {
				// SAFETY: Box::into_raw never returns null
				raw: unsafe { NonNull::new_unchecked(boxed) },
			}
		}

		pub fn into_shared<'g>(self, _guard: &'g Guard) -> Shared<'g, T> {
			let ptr = self.raw.as_ptr() as *const T;
			std::mem::forget(self);
			Shared::from(ptr)
		}
	}

	impl<T> std::ops::Deref for Owned<T> {
		type Target = T;
		fn deref(&self) -> &T {
			// SAFETY: the allocation is live for as long as the Owned exists
			unsafe { self.raw.as_ref() }
		}
	}

	impl<T> Drop for Owned<T> {
		fn drop(&mut self) {
			// SAFETY: Owned is the unique owner of the allocation
			unsafe { drop(Box::from_raw(self.raw.as_ptr())) }
		}
	}

	/// An atomic, possibly-null pointer that does not own its pointee.
	pub struct Atomic<T> {
		ptr: AtomicPtr<T>,
	}

	unsafe impl<T: Send + Sync> Send for Atomic<T> {}
	unsafe impl<T: Send + Sync> Sync for Atomic<T> {}

	impl<T> Atomic<T> {
		pub fn null() -> Self {
			Atomic {
				ptr: AtomicPtr::new(std::ptr::null_mut()),
			}
		}

		pub fn load<'g>(&self, order: Ordering, _guard: &'g Guard) -> Shared<'g, T> {
			Shared::from(self.ptr.load(order) as *const T)
		}

		pub fn store(&self, new: Shared<'_, T>, order: Ordering) {
			self.ptr.store(new.ptr as *mut T, order);
		}
	}
}

#[cfg(loom)]
pub use mock_epoch::*;
