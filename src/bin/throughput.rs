//! Throughput Driver
//!
//! Measures operations per second of a shared [`Tree`] for a grid of thread
//! counts and update ratios. Each worker owns a slice of a pre-generated key
//! universe. For every operation it picks a random key from its slice and calls
//! `insert` with probability `x`, `delete` with probability `x`, and `contains`
//! otherwise.
//!
//! Run with:
//! ```bash
//! # Defaults: 50 000 keys from 0..100 000, 1-4 threads, x in {0.0, 0.1, 0.5}, 5 s runs
//! cargo run --release --bin throughput
//!
//! # Shorter runs, JSON lines
//! BRAMBLE_DURATION_MS=500 BRAMBLE_FORMAT=json cargo run --release --bin throughput
//!
//! # With protocol restarts logged
//! RUST_LOG=bramble=trace cargo run --release --features tracing --bin throughput
//! ```

use std::collections::HashSet;
use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bramble::Tree;
use rand::prelude::*;
use serde::Serialize;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum ConfigError {
	#[error("{var}: cannot parse {value:?}")]
	Parse {
		var: &'static str,
		value: String,
	},

	#[error("{0}")]
	Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
	Csv,
	Json,
}

/// Workload parameters, read from `BRAMBLE_*` environment variables.
#[derive(Debug, Clone)]
struct WorkloadConfig {
	/// Number of distinct keys in the universe.
	keys: usize,
	/// Keys are drawn from `0..key_range`.
	key_range: u32,
	/// Thread counts `1..=max_threads` are measured.
	max_threads: usize,
	duration: Duration,
	warmup: Duration,
	/// Update ratios `x` to measure.
	ratios: Vec<f64>,
	format: Format,
}

impl Default for WorkloadConfig {
	fn default() -> Self {
		WorkloadConfig {
			keys: 50_000,
			key_range: 100_000,
			max_threads: 4,
			duration: Duration::from_millis(5_000),
			warmup: Duration::from_millis(1_000),
			ratios: vec![0.0, 0.1, 0.5],
			format: Format::Csv,
		}
	}
}

fn parse_var<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
	match env::var(var) {
		Ok(value) => value.trim().parse().map(Some).map_err(|_| ConfigError::Parse {
			var,
			value,
		}),
		Err(_) => Ok(None),
	}
}

impl WorkloadConfig {
	fn from_env() -> Result<Self, ConfigError> {
		let mut config = WorkloadConfig::default();

		if let Some(keys) = parse_var("BRAMBLE_KEYS")? {
			config.keys = keys;
		}
		if let Some(range) = parse_var("BRAMBLE_KEY_RANGE")? {
			config.key_range = range;
		}
		if let Some(threads) = parse_var("BRAMBLE_MAX_THREADS")? {
			config.max_threads = threads;
		}
		if let Some(ms) = parse_var("BRAMBLE_DURATION_MS")? {
			config.duration = Duration::from_millis(ms);
		}
		if let Some(ms) = parse_var("BRAMBLE_WARMUP_MS")? {
			config.warmup = Duration::from_millis(ms);
		}
		if let Ok(value) = env::var("BRAMBLE_RATIOS") {
			config.ratios = value
				.split(',')
				.map(|part| {
					part.trim().parse::<f64>().map_err(|_| ConfigError::Parse {
						var: "BRAMBLE_RATIOS",
						value: value.clone(),
					})
				})
				.collect::<Result<_, _>>()?;
		}
		if let Ok(value) = env::var("BRAMBLE_FORMAT") {
			config.format = match value.trim() {
				"csv" => Format::Csv,
				"json" => Format::Json,
				_ => {
					return Err(ConfigError::Parse {
						var: "BRAMBLE_FORMAT",
						value,
					})
				}
			};
		}

		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.max_threads == 0 {
			return Err(ConfigError::Invalid("BRAMBLE_MAX_THREADS must be at least 1".into()));
		}
		if self.keys < self.max_threads {
			return Err(ConfigError::Invalid(format!(
				"{} keys cannot be split across {} threads",
				self.keys, self.max_threads
			)));
		}
		if self.keys as u64 > u64::from(self.key_range) {
			return Err(ConfigError::Invalid(format!(
				"{} unique keys do not fit in 0..{}",
				self.keys, self.key_range
			)));
		}
		if let Some(x) = self.ratios.iter().find(|x| !(0.0..=0.5).contains(*x)) {
			return Err(ConfigError::Invalid(format!("update ratio {x} is outside 0.0..=0.5")));
		}
		Ok(())
	}
}

// =============================================================================
// Tracing Initialization
// =============================================================================

#[cfg(feature = "tracing")]
fn init_tracing() {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
	let _ = tracing_subscriber::fmt().with_env_filter(filter).with_thread_ids(true).try_init();
}

#[cfg(not(feature = "tracing"))]
fn init_tracing() {}

// =============================================================================
// Workload
// =============================================================================

/// One measured cell of the grid.
#[derive(Debug, Serialize)]
struct Report {
	procs: usize,
	x: f64,
	ops_per_sec: u64,
}

/// Draws `count` distinct keys from `0..range`.
fn populate(count: usize, range: u32, rng: &mut impl Rng) -> Vec<u32> {
	let mut keys = HashSet::with_capacity(count);
	while keys.len() < count {
		keys.insert(rng.random_range(0..range));
	}
	keys.into_iter().collect()
}

/// Runs `threads` workers against a fresh tree for `duration` and returns the
/// total number of operations they completed.
fn run(keys: &Arc<Vec<u32>>, threads: usize, x: f64, duration: Duration) -> u64 {
	let tree = Arc::new(Tree::new());
	let alive = Arc::new(AtomicBool::new(true));
	let partition = keys.len() / threads;

	let handles: Vec<_> = (0..threads)
		.map(|id| {
			let tree = Arc::clone(&tree);
			let alive = Arc::clone(&alive);
			let keys = Arc::clone(keys);
			thread::spawn(move || {
				let slice = &keys[id * partition..(id + 1) * partition];
				let mut rng = rand::rng();
				let mut ops = 0u64;
				while alive.load(Ordering::Relaxed) {
					let key = slice[rng.random_range(0..slice.len())];
					let p: f64 = rng.random();
					if p < x {
						tree.insert(key);
					} else if p < 2.0 * x {
						tree.delete(&key);
					} else {
						tree.contains(&key);
					}
					ops += 1;
				}
				ops
			})
		})
		.collect();

	thread::sleep(duration);
	alive.store(false, Ordering::Relaxed);

	handles.into_iter().map(|h| h.join().unwrap_or(0)).sum()
}

fn main() {
	init_tracing();

	let config = match WorkloadConfig::from_env() {
		Ok(config) => config,
		Err(err) => {
			eprintln!("throughput: {err}");
			process::exit(1);
		}
	};

	let keys = Arc::new(populate(config.keys, config.key_range, &mut rand::rng()));

	if !config.warmup.is_zero() {
		eprintln!("Warming up...");
		run(&keys, config.max_threads.min(2), 0.2, config.warmup);
	}

	if config.format == Format::Csv {
		println!("procs;x;ops/s");
	}

	let secs = config.duration.as_secs_f64().max(f64::EPSILON);
	for procs in 1..=config.max_threads {
		for &x in &config.ratios {
			let total = run(&keys, procs, x, config.duration);
			let report = Report {
				procs,
				x,
				ops_per_sec: (total as f64 / secs) as u64,
			};
			match config.format {
				Format::Csv => println!("{};{:.1};{}", report.procs, report.x, report.ops_per_sec),
				Format::Json => match serde_json::to_string(&report) {
					Ok(line) => println!("{line}"),
					Err(err) => eprintln!("throughput: {err}"),
				},
			}
		}
	}
}
