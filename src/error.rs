//! # Error Types for the Concurrent Tree
//!
//! This module defines the error type used internally to abandon a protocol
//! attempt. None of these errors reach callers of the public API.
//!
//! ## Error Flow
//!
//! ```text
//! Operation starts
//!      │
//!      ▼
//! Lock-free traversal (result may be stale)
//!      │
//!      ▼
//! Conditional guard acquisitions ──► Err(Unwind | Removed) ──► drop guards, retry
//!      │
//!      ▼ (Ok)
//! Mutate under guards, drop guards
//!      │
//!      ▼
//! Return outcome
//! ```
//!
//! ## Common Patterns
//!
//! Every public operation wraps a single attempt in a retry loop:
//!
//! ```ignore
//! loop {
//!     match self.try_delete(key, eg) {
//!         Ok(removed) => return removed,
//!         Err(Error::Unwind) | Err(Error::Removed) => continue,
//!     }
//! }
//! ```
//!
//! Guards are RAII values, so returning early with `?` from an attempt
//! releases every guard it acquired in reverse order.

use thiserror::Error;

/// Reasons for abandoning a protocol attempt.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// A conditional acquisition or a re-check under a guard failed.
	///
	/// This error occurs when:
	/// - The guard was already held by another thread
	/// - A node's state differed from the state the step expects
	/// - A child slot no longer held the expected node or key
	/// - A child count changed between traversal and validation
	///
	/// The caller discards the traversal and starts over from the root.
	#[error("validation failed")]
	Unwind,

	/// A node the attempt depends on has been logically removed.
	///
	/// This is a stronger form of `Unwind`: the node will never be part of
	/// the tree again, so no amount of re-checking it can succeed.
	#[error("node was removed from the tree")]
	Removed,
}

/// A Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;
