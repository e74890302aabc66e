//! Feature-gated logging macros.
//!
//! With the `tracing` feature these forward to the `tracing` crate. Without it
//! (the default) they expand to nothing, so the retry loops pay no cost.
//!
//! ```bash
//! RUST_LOG=bramble=debug cargo run --release --features tracing --bin throughput
//! ```

#![allow(unused_macros, unused_imports)]

/// Trace-level logging. Used for protocol restarts.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
	($($arg:tt)*) => {
		tracing::trace!($($arg)*)
	};
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
	($($arg:tt)*) => {};
}

/// Debug-level logging. Used for structural changes.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
	($($arg:tt)*) => {
		tracing::debug!($($arg)*)
	};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
	($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
