//! # Deadlock, Timeout, and Starvation Tests for Bramble
//!
//! This module contains tests specifically designed to detect:
//! - Deadlocks between the conditional latch sequences of insert and delete
//! - Livelock on a handful of hot keys
//! - Writer/reader starvation under contention
//!
//! ## Test Strategy
//!
//! Latch acquisitions never wait, except for the insert's barrier on a parent
//! latch that is held only for a bounded critical section. Loom cannot explore
//! the unbounded retry loops of the tree, so these tests use timeout-based
//! detection instead: if operations don't complete within the expected time,
//! the test fails.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test deadlock_tests
//! ```
//!
//! For longer stress tests:
//! ```bash
//! cargo test --test deadlock_tests -- --ignored
//! ```

use bramble::Tree;
use rand::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ===========================================================================
// Timeout Helpers
// ===========================================================================

/// Runs a closure with a timeout, panicking if the operation doesn't complete
/// within the specified duration.
///
/// # Panics
///
/// Panics if the operation doesn't complete within the timeout, or if the
/// spawned thread panics.
fn run_with_timeout<F, R>(timeout: Duration, name: &str, f: F) -> R
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let (tx, rx) = channel();
	let name = name.to_string();

	let handle = thread::spawn(move || {
		let result = f();
		let _ = tx.send(result);
	});

	match rx.recv_timeout(timeout) {
		Ok(result) => {
			handle.join().expect("Thread panicked");
			result
		}
		Err(RecvTimeoutError::Timeout) => {
			panic!(
				"TIMEOUT: '{}' did not complete within {:?} - potential deadlock detected",
				name, timeout
			);
		}
		Err(RecvTimeoutError::Disconnected) => {
			// Thread terminated without sending - likely panicked
			handle.join().expect("Thread panicked without sending result");
			panic!("Thread terminated unexpectedly without completing");
		}
	}
}

/// Runs `f(thread_index)` on `num_threads` threads; all of them must finish
/// within the shared timeout.
fn run_concurrent_with_timeout<F>(timeout: Duration, name: &str, num_threads: usize, f: F)
where
	F: Fn(usize) + Send + Sync + 'static,
{
	let f = Arc::new(f);
	let (tx, rx) = channel();

	let handles: Vec<_> = (0..num_threads)
		.map(|i| {
			let f = Arc::clone(&f);
			let tx = tx.clone();
			thread::spawn(move || {
				f(i);
				let _ = tx.send(i);
			})
		})
		.collect();

	// Drop our sender so rx knows when all threads are done
	drop(tx);

	let start = Instant::now();
	let mut completed = 0;

	while completed < num_threads {
		let remaining = timeout.saturating_sub(start.elapsed());
		match rx.recv_timeout(remaining) {
			Ok(_) => completed += 1,
			Err(RecvTimeoutError::Timeout) => {
				panic!(
					"TIMEOUT: '{}' - only {}/{} threads completed within {:?} - potential deadlock",
					name, completed, num_threads, timeout
				);
			}
			Err(RecvTimeoutError::Disconnected) => break,
		}
	}

	for handle in handles {
		handle.join().expect("Thread panicked");
	}
}

// ===========================================================================
// Full Tree Deadlock Tests
// ===========================================================================

/// Writers inserting and deleting overlapping keys in different orders.
#[test]
fn deadlock_writers_different_orders() {
	let tree = Arc::new(Tree::<i32>::new());
	for i in (0..200).step_by(2) {
		tree.insert(i);
	}

	let shared = Arc::clone(&tree);
	run_concurrent_with_timeout(Duration::from_secs(10), "writers_different_orders", 4, move |t| {
		let mut rng = StdRng::seed_from_u64(t as u64);
		for _ in 0..2_000 {
			let mut keys: Vec<i32> = (0..10).map(|_| rng.random_range(0..200)).collect();
			if t % 2 == 1 {
				keys.reverse();
			}
			for key in keys {
				if rng.random() {
					shared.insert(key);
				} else {
					shared.delete(&key);
				}
			}
		}
	});

	assert!(tree.len() <= 200);
}

/// Readers and writers competing for the same key range keep making progress.
#[test]
fn deadlock_reader_writer_interleaving() {
	let tree = Arc::new(Tree::<u32>::new());
	let shared = Arc::clone(&tree);

	run_concurrent_with_timeout(Duration::from_secs(10), "reader_writer_interleaving", 6, move |t| {
		let mut rng = StdRng::seed_from_u64(t as u64);
		for _ in 0..20_000 {
			let key = rng.random_range(0..256);
			if t < 2 {
				if rng.random() {
					shared.insert(key);
				} else {
					shared.delete(&key);
				}
			} else {
				shared.contains(&key);
			}
		}
	});
}

/// Repeatedly builds small subtrees and deletes them in an order that goes
/// through routing conversion, leaf removal under a routing parent, and splices.
#[test]
fn deadlock_concurrent_collapses() {
	let tree = Arc::new(Tree::<u32>::new());
	let shared = Arc::clone(&tree);

	run_concurrent_with_timeout(Duration::from_secs(10), "concurrent_collapses", 4, move |t| {
		let base = t as u32 * 1_000_000;
		for round in 0..1_000 {
			let root = base + round * 8 + 4;
			for offset in [0u32, 2, 6, 1, 3] {
				shared.insert(base + round * 8 + (offset + 4) % 8);
			}
			// `root` has two children: it becomes a routing node
			shared.delete(&root);
			for offset in [6u32, 0, 1, 2, 3, 5, 7] {
				shared.delete(&(base + round * 8 + offset));
			}
		}
	});

	assert!(tree.is_empty(), "left over: {:?}", tree);
}

/// Threads splicing neighbouring nodes out of one long chain.
#[test]
fn deadlock_concurrent_splices_on_chain() {
	let tree = Arc::new(Tree::<u32>::new());
	// Ascending inserts build a right-leaning chain
	for i in 0..4_000 {
		tree.insert(i);
	}

	let shared = Arc::clone(&tree);
	run_concurrent_with_timeout(Duration::from_secs(20), "splices_on_chain", 4, move |t| {
		let mut k = t as u32;
		while k < 4_000 {
			assert!(shared.delete(&k));
			k += 4;
		}
	});

	assert!(tree.is_empty());
}

// ===========================================================================
// Stress Timeout Tests
// ===========================================================================

/// A single key hammered by every thread.
#[test]
fn stress_timeout_single_key_contention() {
	let tree = Arc::new(Tree::<u8>::new());
	let shared = Arc::clone(&tree);

	run_concurrent_with_timeout(Duration::from_secs(10), "single_key_contention", 8, move |t| {
		for i in 0..20_000 {
			match (i + t) % 3 {
				0 => {
					shared.insert(1);
				}
				1 => {
					shared.delete(&1);
				}
				_ => {
					shared.contains(&1);
				}
			}
		}
	});

	assert!(tree.len() <= 1);
}

/// A parent with a child on each side, mutated from all directions at once.
#[test]
fn stress_timeout_family_contention() {
	let tree = Arc::new(Tree::<u8>::new());
	let shared = Arc::clone(&tree);

	run_concurrent_with_timeout(Duration::from_secs(10), "family_contention", 6, move |t| {
		let key = [2u8, 1, 3][t % 3];
		for i in 0..20_000 {
			if i % 2 == 0 {
				shared.insert(key);
			} else {
				shared.delete(&key);
			}
		}
	});

	assert!(tree.len() <= 3);
}

#[test]
#[ignore]
fn stress_timeout_concurrent_mixed_high_contention() {
	let tree = Arc::new(Tree::<u32>::new());
	let cpu_cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(8);
	let shared = Arc::clone(&tree);

	run_concurrent_with_timeout(Duration::from_secs(60), "mixed_high_contention", cpu_cores * 2, move |t| {
		let mut rng = StdRng::seed_from_u64(t as u64);
		for _ in 0..500_000 {
			let key = rng.random_range(0..32);
			match rng.random_range(0..3) {
				0 => {
					shared.insert(key);
				}
				1 => {
					shared.delete(&key);
				}
				_ => {
					shared.contains(&key);
				}
			}
		}
	});
}

// ===========================================================================
// Starvation Tests
// ===========================================================================

/// A writer keeps completing operations while many threads read the same keys.
#[test]
fn starvation_writer_under_heavy_reads() {
	let tree = Arc::new(Tree::<u32>::new());
	for k in [50, 25, 75, 10, 30, 60, 90] {
		tree.insert(k);
	}
	let stop = Arc::new(AtomicBool::new(false));

	let readers: Vec<_> = (0..4)
		.map(|_| {
			let tree = Arc::clone(&tree);
			let stop = Arc::clone(&stop);
			thread::spawn(move || {
				while !stop.load(Ordering::Relaxed) {
					for k in [50, 25, 75, 10, 30, 60, 90] {
						tree.contains(&k);
					}
				}
			})
		})
		.collect();

	let writes = Arc::new(AtomicU64::new(0));
	let (tree_w, writes_w) = (Arc::clone(&tree), Arc::clone(&writes));
	run_with_timeout(Duration::from_secs(10), "writer_under_heavy_reads", move || {
		for i in 0..10_000u32 {
			let key = [25, 75, 30, 60][i as usize % 4];
			tree_w.delete(&key);
			tree_w.insert(key);
			writes_w.fetch_add(1, Ordering::Relaxed);
		}
	});

	stop.store(true, Ordering::Relaxed);
	for h in readers {
		h.join().unwrap();
	}
	assert_eq!(writes.load(Ordering::Relaxed), 10_000);
	assert_eq!(tree.len(), 7);
}

/// Readers keep completing lookups while writers churn the whole key range.
#[test]
fn starvation_reader_under_heavy_writes() {
	let tree = Arc::new(Tree::<u32>::new());
	let stop = Arc::new(AtomicBool::new(false));

	let writers: Vec<_> = (0..4)
		.map(|t| {
			let tree = Arc::clone(&tree);
			let stop = Arc::clone(&stop);
			thread::spawn(move || {
				let mut rng = StdRng::seed_from_u64(t);
				while !stop.load(Ordering::Relaxed) {
					let key = rng.random_range(0..128);
					if rng.random() {
						tree.insert(key);
					} else {
						tree.delete(&key);
					}
				}
			})
		})
		.collect();

	let reader_tree = Arc::clone(&tree);
	let lookups = run_with_timeout(Duration::from_secs(10), "reader_under_heavy_writes", move || {
		let mut done = 0u64;
		for key in (0..128).cycle().take(100_000) {
			reader_tree.contains(&key);
			done += 1;
		}
		done
	});

	stop.store(true, Ordering::Relaxed);
	for h in writers {
		h.join().unwrap();
	}
	assert_eq!(lookups, 100_000);
}
