//! Tree nodes and their guards.
//!
//! A node carries three independent [`Latch`]es:
//!
//! - the **state latch**, handed out in one of two roles. A [`Role::Mutate`]
//!   guard may change the node's state or mark it removed. A [`Role::Barrier`]
//!   guard only pins the state: it is taken by threads that splice a pointer
//!   elsewhere and need this node to stay as it is meanwhile. There is a single
//!   holder at a time regardless of role.
//! - one **slot latch** per child pointer. The pointer is only ever written by
//!   the holder of its slot latch.
//!
//! Every conditional acquisition checks its condition, takes the latch without
//! waiting, and re-checks the condition before reporting success. A failure at any
//! point yields [`Error::Unwind`] (or [`Error::Removed`]) and the guard, if it
//! was granted, is released on the spot.

use std::borrow::Borrow;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;

use crate::error::{Error, Result};
use crate::latch::{Latch, LatchGuard};
use crate::sync::epoch::{Atomic, Guard, Shared};
use crate::sync::{AtomicBool, AtomicU8, Ordering};

/// All protocol fields are read and written with sequential consistency.
const ORDER: Ordering = Ordering::SeqCst;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A node key: either a finite user key or the sentinel above every key.
///
/// The variant order matters, the derived `Ord` puts `Inf` after every `Fin`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Key<K> {
	Fin(K),
	Inf,
}

impl<K> Key<K> {
	/// Compares this key with a borrowed user key.
	#[inline]
	pub(crate) fn cmp_to<Q>(&self, other: &Q) -> CmpOrdering
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		match self {
			Key::Fin(k) => k.borrow().cmp(other),
			Key::Inf => CmpOrdering::Greater,
		}
	}
}

impl<K: fmt::Debug> fmt::Debug for Key<K> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Key::Fin(k) => k.fmt(f),
			Key::Inf => f.write_str("inf"),
		}
	}
}

// ---------------------------------------------------------------------------
// State, Direction, Expected
// ---------------------------------------------------------------------------

/// Logical state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum State {
	/// The key is a member of the set.
	Data = 0,
	/// The node only divides its two subtrees; its key is not a member.
	Routing = 1,
}

impl State {
	#[inline]
	fn from_u8(raw: u8) -> State {
		if raw == State::Routing as u8 {
			State::Routing
		} else {
			State::Data
		}
	}
}

/// Which child slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
	Left,
	Right,
}

impl Direction {
	/// The slot to follow from a node whose key compares to the search key as `ord`.
	#[inline]
	pub(crate) fn descend(ord: CmpOrdering) -> Direction {
		if ord == CmpOrdering::Greater {
			Direction::Left
		} else {
			Direction::Right
		}
	}

	#[inline]
	pub(crate) fn opposite(self) -> Direction {
		match self {
			Direction::Left => Direction::Right,
			Direction::Right => Direction::Left,
		}
	}
}

/// What a slot must hold for a slot guard to be granted.
pub(crate) enum Expected<'e, 'g, K> {
	/// Exactly this pointer (possibly null).
	Node(Shared<'g, Node<K>>),
	/// Some node carrying this key, whatever its identity.
	Key(&'e Key<K>),
}

/// The role a state guard was granted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
	Mutate,
	Barrier,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One key slot of the tree.
pub(crate) struct Node<K> {
	pub(crate) key: Key<K>,
	state: AtomicU8,
	removed: AtomicBool,
	left: Atomic<Node<K>>,
	right: Atomic<Node<K>>,
	state_latch: Latch,
	left_latch: Latch,
	right_latch: Latch,
}

impl<K> Node<K> {
	/// Creates a childless `Data` node.
	pub(crate) fn new(key: Key<K>) -> Node<K> {
		Node {
			key,
			state: AtomicU8::new(State::Data as u8),
			removed: AtomicBool::new(false),
			left: Atomic::null(),
			right: Atomic::null(),
			state_latch: Latch::new(),
			left_latch: Latch::new(),
			right_latch: Latch::new(),
		}
	}

	#[inline]
	pub(crate) fn state(&self) -> State {
		State::from_u8(self.state.load(ORDER))
	}

	#[inline]
	pub(crate) fn is_removed(&self) -> bool {
		self.removed.load(ORDER)
	}

	/// `true` if the node holds a live key: `Data` and never removed.
	#[inline]
	pub(crate) fn is_live(&self) -> bool {
		!self.is_removed() && self.state() == State::Data
	}

	#[inline]
	fn slot(&self, dir: Direction) -> (&Atomic<Node<K>>, &Latch) {
		match dir {
			Direction::Left => (&self.left, &self.left_latch),
			Direction::Right => (&self.right, &self.right_latch),
		}
	}

	/// Unsynchronized read of a child pointer.
	#[inline]
	pub(crate) fn child<'g>(&self, dir: Direction, eg: &'g Guard) -> Shared<'g, Node<K>> {
		self.slot(dir).0.load(ORDER, eg)
	}

	/// Unsynchronized count of non-null children.
	#[inline]
	pub(crate) fn child_count(&self, eg: &Guard) -> usize {
		let left = !self.child(Direction::Left, eg).is_null();
		let right = !self.child(Direction::Right, eg).is_null();
		left as usize + right as usize
	}

	#[inline]
	fn state_holds(&self, expected: State) -> bool {
		!self.is_removed() && self.state() == expected
	}

	fn try_state(&self, expected: State, role: Role) -> Result<StateGuard<'_, K>> {
		if self.is_removed() {
			return Err(Error::Removed);
		}
		if self.state() != expected {
			return Err(Error::Unwind);
		}
		let latch = self.state_latch.try_acquire()?;
		// Re-check now that no other role can be held
		if !self.state_holds(expected) {
			return Err(Error::Unwind);
		}
		Ok(StateGuard {
			node: self,
			role,
			_latch: latch,
		})
	}

	/// Acquires the state guard in the mutate role, provided the node is not
	/// removed and is in the `expected` state.
	#[inline]
	pub(crate) fn try_mutate_state(&self, expected: State) -> Result<StateGuard<'_, K>> {
		self.try_state(expected, Role::Mutate)
	}

	/// Acquires the state guard in the barrier role, provided the node is not
	/// removed and is in the `expected` state.
	#[inline]
	pub(crate) fn try_barrier(&self, expected: State) -> Result<StateGuard<'_, K>> {
		self.try_state(expected, Role::Barrier)
	}

	/// Acquires the state guard in the barrier role, spinning while another
	/// thread holds it. The node may turn out to be removed once granted.
	#[inline]
	pub(crate) fn barrier_or_spin(&self) -> StateGuard<'_, K> {
		StateGuard {
			node: self,
			role: Role::Barrier,
			_latch: self.state_latch.acquire_or_spin(),
		}
	}

	fn slot_holds<'g>(&self, dir: Direction, expected: &Expected<'_, 'g, K>, eg: &'g Guard) -> bool
	where
		K: Eq,
	{
		let current = self.child(dir, eg);
		match expected {
			Expected::Node(ptr) => current == *ptr,
			// SAFETY: `eg` is pinned and nodes are only freed through deferred destruction
			Expected::Key(key) => match unsafe { current.as_ref() } {
				Some(child) => child.key == **key,
				None => false,
			},
		}
	}

	/// Acquires the guard of the `dir` slot, provided it holds `expected`.
	pub(crate) fn try_lock_slot<'g>(
		&'g self,
		dir: Direction,
		expected: Expected<'_, 'g, K>,
		eg: &'g Guard,
	) -> Result<SlotGuard<'g, K>>
	where
		K: Eq,
	{
		if !self.slot_holds(dir, &expected, eg) {
			return Err(Error::Unwind);
		}
		let latch = self.slot(dir).1.try_acquire()?;
		if !self.slot_holds(dir, &expected, eg) {
			return Err(Error::Unwind);
		}
		Ok(SlotGuard {
			node: self,
			dir,
			_latch: latch,
		})
	}
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// A held state latch. Released when dropped.
pub(crate) struct StateGuard<'a, K> {
	node: &'a Node<K>,
	role: Role,
	_latch: LatchGuard<'a>,
}

impl<'a, K> StateGuard<'a, K> {
	#[cfg(test)]
	pub(crate) fn role(&self) -> Role {
		self.role
	}

	#[inline]
	pub(crate) fn set_state(&self, state: State) {
		debug_assert_eq!(self.role, Role::Mutate, "state change under a barrier guard");
		self.node.state.store(state as u8, ORDER);
	}

	/// Marks the node permanently removed.
	#[inline]
	pub(crate) fn mark_removed(&self) {
		debug_assert_eq!(self.role, Role::Mutate, "removal under a barrier guard");
		self.node.removed.store(true, ORDER);
	}
}

/// A held slot latch. Only its holder writes the slot. Released when dropped.
pub(crate) struct SlotGuard<'a, K> {
	node: &'a Node<K>,
	dir: Direction,
	_latch: LatchGuard<'a>,
}

impl<'a, K> SlotGuard<'a, K> {
	/// Reads the guarded slot. Stable for as long as the guard is held.
	#[inline]
	pub(crate) fn load<'g>(&self, eg: &'g Guard) -> Shared<'g, Node<K>> {
		self.node.child(self.dir, eg)
	}

	#[inline]
	pub(crate) fn store(&self, new: Shared<'_, Node<K>>) {
		self.node.slot(self.dir).0.store(new, ORDER);
	}
}
