//! # Bramble: A Concurrent Binary Search Tree Set
//!
//! This crate provides an unbalanced binary search tree that supports `insert`,
//! `delete` and `contains` from any number of threads at once. It synchronizes
//! with **fine-grained per-node latches** rather than a global lock or lock-free
//! CAS loops.
//!
//! ## Design Overview
//!
//! The protocol follows "A Concurrency-Optimal Binary Search Tree" (Aksenov,
//! Gramoli, Kuznetsov et al., <https://arxiv.org/abs/1702.04441>).
//!
//! ### Key Concepts
//!
//! **Optimistic Traversal**: Every operation first walks from the root without
//! taking any lock. The nodes it finds may be stale by the time it acts on them.
//!
//! **Conditional Locking**: A traversal result is turned into a mutation through a
//! short sequence of conditional latch acquisitions. Each acquisition states what
//! it expects (a node state, a child pointer, a child key) and re-checks it once
//! granted. If anything differs, the attempt releases what it holds and the whole
//! operation restarts from the root.
//!
//! **Routing Nodes**: Deleting a key whose node has two children does not change
//! the shape of the tree. The node is turned into a `ROUTING` placeholder that
//! still divides its subtrees but no longer counts as a member. A later insert of
//! the same key turns it back into a `DATA` node.
//!
//! **Removal**: A node leaves the tree either by a *splice* (one child, linked
//! directly to the parent) or a *leaf removal*. When a leaf's parent is a routing
//! node, the leaf and its parent are removed together in a *collapse* and the
//! leaf's sibling takes the parent's place. Removed nodes are marked with a
//! one-way `removed` flag so threads holding stale references give up on them.
//!
//! ### Tree Structure
//!
//! ```text
//!                    ┌─────────────────┐
//!                    │   Root (inf)    │  <- Sentinel, greater than every key
//!                    └────────┬────────┘
//!                             │ left
//!                             ▼
//!                    ┌─────────────────┐
//!                    │  50  (ROUTING)  │  <- Deleted, kept to divide subtrees
//!                    └────────┬────────┘
//!                   ┌─────────┴─────────┐
//!                   ▼                   ▼
//!             ┌──────────┐        ┌──────────┐
//!             │ 30 (DATA)│        │ 70 (DATA)│  <- Members of the set
//!             └──────────┘        └──────────┘
//! ```
//!
//! Deleting 30 from the tree above collapses 30 and 50 at once, leaving 70 as the
//! root's left child.
//!
//! ## Basic Usage
//!
//! ```
//! use bramble::Tree;
//!
//! let tree = Tree::new();
//!
//! assert!(tree.insert(3));
//! assert!(tree.insert(1));
//! assert!(!tree.insert(3)); // already present
//!
//! assert!(tree.contains(&1));
//! assert!(tree.delete(&1));
//! assert!(!tree.contains(&1));
//! ```
//!
//! ## Thread Safety
//!
//! The tree is fully thread-safe and can be shared across threads via `Arc<Tree<K>>`.
//! Unlinked nodes are retired through epoch-based reclamation (`crossbeam_epoch`),
//! so readers that still hold a pointer to them remain safe.
//!
//! Operations are obstruction-free: a thread that keeps losing validation races
//! retries without bound. The tree is not balanced, inserting keys in sorted order
//! produces a linked list.

use std::borrow::Borrow;
use std::fmt;

pub mod error;
pub mod latch;
mod node;
mod sync;
mod tracing_helpers;

use error::Error;
use node::{Direction, Expected, Key, Node, SlotGuard, State};
use sync::epoch::{self as epoch, Guard, Owned, Shared};
use tracing_helpers::{debug_log, trace_log};

// ---------------------------------------------------------------------------
// Core Tree Structure
// ---------------------------------------------------------------------------

/// A concurrent set of ordered keys stored in an unbalanced binary search tree.
///
/// # Type Parameters
///
/// - `K`: The key type. Must implement `Clone + Ord`; a key is cloned into a new
///   node once its insertion is certain to succeed.
///
/// # Internal Structure
///
/// The tree owns a sentinel root whose key compares greater than every `K`. All
/// real keys therefore live in the sentinel's left subtree, and every node a
/// traversal can find has a parent.
pub struct Tree<K> {
	root: Node<K>,
}

impl<K: Clone + Ord> Default for Tree<K> {
	fn default() -> Self {
		Self::new()
	}
}

// ---------------------------------------------------------------------------
// Internal Helper Types
// ---------------------------------------------------------------------------

/// Result of a lock-free traversal.
///
/// `current` is the node holding the searched key or null. `parent` is the last
/// node visited before `current` and is never null, since the sentinel is visited
/// first. `grandparent` is null when `parent` is the sentinel.
struct Position<'g, K> {
	grandparent: Shared<'g, Node<K>>,
	parent: Shared<'g, Node<K>>,
	current: Shared<'g, Node<K>>,
}

/// Dereferences a node pointer obtained under `'g`.
#[inline]
fn deref<'g, K>(ptr: Shared<'g, Node<K>>) -> Option<&'g Node<K>> {
	// SAFETY: every pointer comes from a load performed under a pinned epoch
	// guard living for 'g, and nodes are only freed through deferred destruction.
	unsafe { ptr.as_ref() }
}

// ---------------------------------------------------------------------------
// Tree Implementation
// ---------------------------------------------------------------------------

impl<K: Clone + Ord> Tree<K> {
	/// Creates a new, empty tree.
	///
	/// # Example
	///
	/// ```
	/// use bramble::Tree;
	///
	/// let tree: Tree<u64> = Tree::new();
	/// assert!(tree.is_empty());
	/// ```
	pub fn new() -> Self {
		Tree {
			root: Node::new(Key::Inf),
		}
	}

	// -----------------------------------------------------------------------
	// Traversal
	// -----------------------------------------------------------------------

	/// Walks from the root towards `key` without taking any latch.
	///
	/// Never blocks and never fails, but the returned position is only a hint:
	/// every step that acts on it must revalidate under a guard.
	fn locate<'g, Q>(&'g self, key: &Q, eg: &'g Guard) -> Position<'g, K>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		let mut grandparent = Shared::null();
		let mut parent = Shared::null();
		let mut current = Shared::from(&self.root as *const Node<K>);

		while let Some(node) = deref(current) {
			let ord = node.key.cmp_to(key);
			if ord == std::cmp::Ordering::Equal {
				break;
			}
			grandparent = parent;
			parent = current;
			current = node.child(Direction::descend(ord), eg);
		}

		Position {
			grandparent,
			parent,
			current,
		}
	}

	// -----------------------------------------------------------------------
	// Public API: Read Operations
	// -----------------------------------------------------------------------

	/// Returns `true` if `key` is a member of the set.
	///
	/// Takes no latch: the answer is the state of the node holding `key` at the
	/// moment it is read.
	///
	/// # Example
	///
	/// ```
	/// use bramble::Tree;
	///
	/// let tree = Tree::new();
	/// tree.insert("a".to_string());
	///
	/// assert!(tree.contains("a"));
	/// assert!(!tree.contains("b"));
	/// ```
	pub fn contains<Q>(&self, key: &Q) -> bool
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		let eg = &epoch::pin();
		let position = self.locate(key, eg);
		deref(position.current).is_some_and(|node| node.state() == State::Data)
	}

	// -----------------------------------------------------------------------
	// Public API: Write Operations
	// -----------------------------------------------------------------------

	/// Adds `key` to the set. Returns `false` if it was already present.
	///
	/// # Algorithm
	///
	/// 1. If a routing node holds the key, turn it back into a data node
	/// 2. Otherwise latch the empty slot where the key belongs, pin the parent's
	///    state with a barrier, and link a new node unless the parent was removed
	///
	/// # Example
	///
	/// ```
	/// use bramble::Tree;
	///
	/// let tree = Tree::new();
	/// assert!(tree.insert(1));
	/// assert!(!tree.insert(1));
	/// ```
	pub fn insert(&self, key: K) -> bool {
		let eg = &epoch::pin();

		loop {
			match self.try_insert(&key, eg) {
				Ok(inserted) => return inserted,
				Err(_err) => {
					trace_log!(error = %_err, "insert: restarting");
					continue;
				}
			}
		}
	}

	fn try_insert<'g>(&'g self, key: &K, eg: &'g Guard) -> error::Result<bool> {
		let position = self.locate(key, eg);

		if let Some(current) = deref(position.current) {
			if current.state() == State::Data {
				return Ok(false);
			}
			let state = current.try_mutate_state(State::Routing)?;
			state.set_state(State::Data);
			debug_log!("insert: routing node revived");
			return Ok(true);
		}

		let parent = deref(position.parent).ok_or(Error::Unwind)?;
		let dir = Direction::descend(parent.key.cmp_to(key));

		let link = parent.try_lock_slot(dir, Expected::Node(Shared::null()), eg)?;
		let _barrier = parent.barrier_or_spin();
		if parent.is_removed() {
			return Err(Error::Removed);
		}

		let fresh = Owned::new(Node::new(Key::Fin(key.clone())));
		link.store(fresh.into_shared(eg));
		Ok(true)
	}

	/// Removes `key` from the set. Returns `false` if it was not present.
	///
	/// # Algorithm
	///
	/// Depending on the number of children of the node holding the key:
	///
	/// - **Two**: the node becomes a routing node, the shape is unchanged
	/// - **One**: the node is spliced out and its child linked to its parent
	/// - **None**: the leaf is unlinked; if its parent is a routing node, the
	///   parent is collapsed with it and the leaf's sibling takes its place
	///
	/// # Example
	///
	/// ```
	/// use bramble::Tree;
	///
	/// let tree = Tree::new();
	/// tree.insert(1);
	///
	/// assert!(tree.delete(&1));
	/// assert!(!tree.delete(&1)); // no-op
	/// ```
	pub fn delete<Q>(&self, key: &Q) -> bool
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		let eg = &epoch::pin();

		loop {
			match self.try_delete(key, eg) {
				Ok(removed) => return removed,
				Err(_err) => {
					trace_log!(error = %_err, "delete: restarting");
					continue;
				}
			}
		}
	}

	fn try_delete<'g, Q>(&'g self, key: &Q, eg: &'g Guard) -> error::Result<bool>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		let position = self.locate(key, eg);

		let current = match deref(position.current) {
			Some(node) if node.state() == State::Data => node,
			_ => return Ok(false),
		};

		match current.child_count(eg) {
			2 => Self::retire_to_routing(current, eg),
			1 => Self::splice(&position, current, eg),
			_ => {
				let parent = deref(position.parent).ok_or(Error::Unwind)?;
				if parent.state() == State::Data {
					Self::remove_leaf(parent, current, eg)
				} else {
					Self::collapse(&position, parent, current, eg)
				}
			}
		}
	}

	// -----------------------------------------------------------------------
	// Delete Protocols
	// -----------------------------------------------------------------------

	/// Latches `parent`'s `dir` slot if it still points at `child` and `parent`
	/// has not been removed.
	fn lock_link<'g>(
		parent: &'g Node<K>,
		dir: Direction,
		child: Shared<'g, Node<K>>,
		eg: &'g Guard,
	) -> error::Result<SlotGuard<'g, K>> {
		let link = parent.try_lock_slot(dir, Expected::Node(child), eg)?;
		if parent.is_removed() {
			return Err(Error::Removed);
		}
		Ok(link)
	}

	/// Deletes the key of a node with two children by turning it into a routing node.
	fn retire_to_routing(current: &Node<K>, eg: &Guard) -> error::Result<bool> {
		let state = current.try_mutate_state(State::Data)?;
		if current.child_count(eg) != 2 {
			return Err(Error::Unwind);
		}
		state.set_state(State::Routing);
		Ok(true)
	}

	/// Unlinks a node with a single child, attaching the child to its parent.
	fn splice<'g>(
		position: &Position<'g, K>,
		current: &'g Node<K>,
		eg: &'g Guard,
	) -> error::Result<bool> {
		let parent = deref(position.parent).ok_or(Error::Unwind)?;

		let left = current.child(Direction::Left, eg);
		let (child_dir, child) = if left.is_null() {
			(Direction::Right, current.child(Direction::Right, eg))
		} else {
			(Direction::Left, left)
		};
		if child.is_null() {
			return Err(Error::Unwind);
		}
		let current_dir = Direction::descend(parent.key.cmp(&current.key));

		let _child_link = Self::lock_link(current, child_dir, child, eg)?;
		let parent_link = Self::lock_link(parent, current_dir, position.current, eg)?;
		let state = current.try_mutate_state(State::Data)?;
		if current.child_count(eg) != 1 {
			return Err(Error::Unwind);
		}

		state.mark_removed();
		parent_link.store(child);
		// SAFETY: the node is unlinked and marked removed, no new traversal reaches it
		unsafe { eg.defer_destroy(position.current) };

		debug_log!("delete: spliced out node with one child");
		Ok(true)
	}

	/// Unlinks a leaf whose parent is a data node.
	fn remove_leaf<'g>(
		parent: &'g Node<K>,
		current: &'g Node<K>,
		eg: &'g Guard,
	) -> error::Result<bool> {
		let leaf_dir = Direction::descend(parent.key.cmp(&current.key));

		let link = parent.try_lock_slot(leaf_dir, Expected::Key(&current.key), eg)?;
		let leaf_ptr = link.load(eg);
		let leaf = deref(leaf_ptr).ok_or(Error::Unwind)?;
		let leaf_state = leaf.try_mutate_state(State::Data)?;
		if leaf.child_count(eg) != 0 {
			return Err(Error::Unwind);
		}
		let _barrier = parent.try_barrier(State::Data)?;

		leaf_state.mark_removed();
		link.store(Shared::null());
		// SAFETY: the leaf is unlinked and marked removed, no new traversal reaches it
		unsafe { eg.defer_destroy(leaf_ptr) };

		Ok(true)
	}

	/// Unlinks a leaf together with its routing parent, attaching the leaf's
	/// sibling to the grandparent.
	fn collapse<'g>(
		position: &Position<'g, K>,
		parent: &'g Node<K>,
		current: &'g Node<K>,
		eg: &'g Guard,
	) -> error::Result<bool> {
		// A routing parent is never the sentinel, so a grandparent exists
		let grandparent = deref(position.grandparent).ok_or(Error::Unwind)?;

		let leaf_dir = Direction::descend(parent.key.cmp(&current.key));
		let sibling_dir = leaf_dir.opposite();
		let sibling = parent.child(sibling_dir, eg);
		let parent_dir = Direction::descend(grandparent.key.cmp(&parent.key));

		let leaf_link = parent.try_lock_slot(leaf_dir, Expected::Key(&current.key), eg)?;
		let leaf_ptr = leaf_link.load(eg);
		let leaf = deref(leaf_ptr).ok_or(Error::Unwind)?;
		let leaf_state = leaf.try_mutate_state(State::Data)?;
		if leaf.child_count(eg) != 0 {
			return Err(Error::Unwind);
		}
		let _sibling_link = Self::lock_link(parent, sibling_dir, sibling, eg)?;
		let grandparent_link = Self::lock_link(grandparent, parent_dir, position.parent, eg)?;
		let parent_state = parent.try_mutate_state(State::Routing)?;

		parent_state.mark_removed();
		leaf_state.mark_removed();
		grandparent_link.store(sibling);
		// SAFETY: both nodes are unlinked and marked removed, no new traversal reaches them
		unsafe {
			eg.defer_destroy(position.parent);
			eg.defer_destroy(leaf_ptr);
		}

		debug_log!("delete: collapsed leaf with its routing parent");
		Ok(true)
	}

	// -----------------------------------------------------------------------
	// Size Operations
	// -----------------------------------------------------------------------

	/// Returns the number of keys in the set.
	///
	/// **Note**: This is an O(n) walk over the tree. Under concurrent
	/// modification the result is only an estimate.
	pub fn len(&self) -> usize {
		let eg = &epoch::pin();
		self.nodes(eg).into_iter().filter(|(node, _)| node.key != Key::Inf && node.is_live()).count()
	}

	/// Returns `true` if the set contains no keys. O(n), see [`len`](Self::len).
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	// -----------------------------------------------------------------------
	// Diagnostics
	// -----------------------------------------------------------------------

	/// Every reachable node with its depth, in pre-order, starting with the sentinel.
	fn nodes<'g>(&'g self, eg: &'g Guard) -> Vec<(&'g Node<K>, usize)> {
		let mut out = Vec::new();
		let mut stack = vec![(&self.root, 0usize)];

		while let Some((node, depth)) = stack.pop() {
			out.push((node, depth));
			for dir in [Direction::Right, Direction::Left] {
				if let Some(child) = deref(node.child(dir, eg)) {
					stack.push((child, depth + 1));
				}
			}
		}
		out
	}

	/// Writes the shape of the tree, one node per line in pre-order.
	///
	/// Each line is indented with one `-` per level. Members of the set are
	/// printed as `(key)`, routing or removed nodes as `xkeyx`. The sentinel root
	/// is printed as `inf`.
	///
	/// # Example
	///
	/// ```
	/// use bramble::Tree;
	///
	/// let tree = Tree::new();
	/// tree.insert(2);
	/// tree.insert(1);
	///
	/// let mut out = String::new();
	/// tree.write_tree(&mut out).unwrap();
	/// assert_eq!(out, "(inf)\n-(2)\n--(1)\n");
	/// ```
	pub fn write_tree<W: fmt::Write>(&self, out: &mut W) -> fmt::Result
	where
		K: fmt::Debug,
	{
		let eg = &epoch::pin();
		for (node, depth) in self.nodes(eg) {
			for _ in 0..depth {
				out.write_char('-')?;
			}
			if node.is_live() {
				writeln!(out, "({:?})", node.key)?;
			} else {
				writeln!(out, "x{:?}x", node.key)?;
			}
		}
		Ok(())
	}

	/// Prints the shape of the tree to stdout. See [`write_tree`](Self::write_tree).
	pub fn print_tree(&self)
	where
		K: fmt::Debug,
	{
		let mut out = String::new();
		if self.write_tree(&mut out).is_ok() {
			println!("{out}");
		}
	}
}

impl<K: Clone + Ord + fmt::Debug> fmt::Debug for Tree<K> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let eg = &epoch::pin();
		let mut keys: Vec<&Key<K>> = self
			.nodes(eg)
			.into_iter()
			.filter(|(node, _)| node.key != Key::Inf && node.is_live())
			.map(|(node, _)| &node.key)
			.collect();
		keys.sort();
		f.debug_set().entries(keys).finish()
	}
}

impl<K> Drop for Tree<K> {
	fn drop(&mut self) {
		let eg = &epoch::pin();
		let mut stack = vec![self.root.child(Direction::Left, eg), self.root.child(Direction::Right, eg)];

		// Iterative, a degenerate tree is as deep as it is large
		while let Some(ptr) = stack.pop() {
			if let Some(node) = deref(ptr) {
				stack.push(node.child(Direction::Left, eg));
				stack.push(node.child(Direction::Right, eg));
				// SAFETY: `&mut self` rules out other threads, and reachable nodes
				// were never handed to deferred destruction
				drop(unsafe { ptr.into_owned() });
			}
		}
	}
}

// ===========================================================================
// Test-Only Validation Module
// ===========================================================================

/// Invariant validation for testing.
#[cfg(any(test, feature = "test-utils"))]
impl<K: Clone + Ord + fmt::Debug> Tree<K> {
	/// Validates the structure of the tree. Panics with diagnostic info if an
	/// invariant is violated. Only meaningful while no other thread mutates.
	///
	/// # Invariants Checked
	///
	/// 1. The sentinel is a data node with no right child
	/// 2. Key ordering: every reachable node, data or routing, lies strictly
	///    between the bounds set by its ancestors (so keys are unique)
	/// 3. No reachable node is marked removed
	/// 4. Every routing node has exactly two children
	pub fn assert_invariants(&self) {
		let eg = &epoch::pin();

		assert!(self.root.key == Key::Inf, "sentinel key replaced");
		assert_eq!(self.root.state(), State::Data, "sentinel is not a data node");
		assert!(!self.root.is_removed(), "sentinel marked removed");
		assert!(self.root.child(Direction::Right, eg).is_null(), "sentinel has a right child");

		let mut stack: Vec<(Shared<'_, Node<K>>, Option<&Key<K>>, Option<&Key<K>>)> =
			vec![(self.root.child(Direction::Left, eg), None, Some(&self.root.key))];

		while let Some((ptr, lower, upper)) = stack.pop() {
			let Some(node) = deref(ptr) else {
				continue;
			};

			assert!(!node.is_removed(), "removed node {:?} is reachable", node.key);
			if let Some(lower) = lower {
				assert!(node.key > *lower, "node {:?} not above bound {:?}", node.key, lower);
			}
			if let Some(upper) = upper {
				assert!(node.key < *upper, "node {:?} not below bound {:?}", node.key, upper);
			}
			if node.state() == State::Routing {
				assert_eq!(
					node.child_count(eg),
					2,
					"routing node {:?} does not have two children",
					node.key
				);
			}

			stack.push((node.child(Direction::Left, eg), lower, Some(&node.key)));
			stack.push((node.child(Direction::Right, eg), Some(&node.key), upper));
		}
	}

	/// Returns the number of reachable nodes, routing nodes included, sentinel excluded.
	pub fn node_count(&self) -> usize {
		let eg = &epoch::pin();
		self.nodes(eg).len() - 1
	}
}

// ===========================================================================
// Unit Tests
// ===========================================================================
