use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Cause, Error};

/// Observable state of a key, as reported by
/// [`InstanceRegistry::state`](crate::InstanceRegistry::state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
	/// No value and no construction in progress.
	Empty,
	/// A factory is running for this key.
	Building,
	/// A value has been published.
	Ready,
	/// A failed construction was kept as a tombstone.
	Failed,
}

/// Why a build attempt did not publish a value.
#[derive(Debug, Clone)]
pub(crate) enum Failure {
	/// The factory returned an error.
	Factory(Cause),
	/// The factory unwound.
	Panicked,
}

impl Failure {
	pub(crate) fn into_error(self) -> Error {
		match self {
			Failure::Factory(cause) => Error::Construction(cause),
			Failure::Panicked => Error::Panicked,
		}
	}

	fn into_poison(self) -> Cause {
		match self {
			Failure::Factory(cause) => cause,
			Failure::Panicked => Arc::new(Error::Panicked),
		}
	}
}

/// Transition state guarded by the slot mutex.
#[derive(Debug)]
pub(crate) enum State {
	Empty,
	Building {
		builder: ThreadId,
		attempt: u64,
	},
	/// The value lives in [`Slot::value`].
	Ready,
	Failed(Cause),
	/// Removed from its shard. Holders of a stale handle must look the key up again.
	Detached,
}

#[derive(Debug)]
pub(crate) struct Inner {
	pub state: State,
	/// Number of build attempts started on this slot.
	attempts: u64,
	/// Most recent failed attempt, kept so waiters on that attempt can see it.
	last_failure: Option<(u64, Failure)>,
	/// Callers currently blocked on the condvar.
	waiters: usize,
}

impl Inner {
	pub fn observe(&self) -> EntryState {
		match self.state {
			State::Empty | State::Detached => EntryState::Empty,
			State::Building { .. } => EntryState::Building,
			State::Ready => EntryState::Ready,
			State::Failed(_) => EntryState::Failed,
		}
	}

	pub fn is_idle(&self) -> bool {
		matches!(self.state, State::Empty) && self.waiters == 0
	}

	/// Claim the build for the calling thread. Returns the attempt number.
	pub fn elect(&mut self) -> u64 {
		self.attempts += 1;
		self.state = State::Building {
			builder: thread::current().id(),
			attempt: self.attempts,
		};
		self.attempts
	}

	/// The failure of `attempt`, if that attempt failed and nobody has claimed
	/// the slot since.
	pub fn failure_of(&self, attempt: u64) -> Option<&Failure> {
		match (&self.state, &self.last_failure) {
			(State::Empty, Some((failed, failure))) if *failed == attempt => Some(failure),
			_ => None,
		}
	}
}

/// Per-key cache entry.
///
/// The published value sits in a [`OnceLock`] next to the mutex-guarded state
/// so the hit path is a single acquire load. The value is set before the state
/// flips to `Ready` under the lock, so a thread that observes `Ready` also
/// observes the fully built value.
pub(crate) struct Slot<V> {
	value: OnceLock<Arc<V>>,
	inner: Mutex<Inner>,
	resolved: Condvar,
	hits: AtomicU64,
}

impl<V> Slot<V> {
	pub fn new() -> Self {
		Self {
			value: OnceLock::new(),
			inner: Mutex::new(Inner {
				state: State::Empty,
				attempts: 0,
				last_failure: None,
				waiters: 0,
			}),
			resolved: Condvar::new(),
			hits: AtomicU64::new(0),
		}
	}

	/// A slot that starts out published, for eager seeding.
	pub fn ready(value: Arc<V>) -> Self {
		let slot = Self::new();
		let set = slot.value.set(value);
		debug_assert!(set.is_ok());
		slot.inner.lock().state = State::Ready;
		slot
	}

	/// Published value, if any. Never blocks.
	pub fn value(&self) -> Option<&Arc<V>> {
		self.value.get()
	}

	pub fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock()
	}

	/// Record that a caller was served a value it did not build.
	pub fn hit(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	/// Block until the slot changes state or `deadline` passes.
	///
	/// Returns `false` on timeout.
	pub fn wait(&self, inner: &mut MutexGuard<'_, Inner>, deadline: Option<Instant>) -> bool {
		inner.waiters += 1;
		let timed_out = match deadline {
			Some(deadline) => self.resolved.wait_until(inner, deadline).timed_out(),
			None => {
				self.resolved.wait(inner);
				false
			}
		};
		inner.waiters -= 1;
		!timed_out
	}

	/// Publish the value built by the current attempt and wake every waiter.
	pub fn publish(&self, value: Arc<V>) {
		// Only the elected builder of a never-published slot gets here.
		let set = self.value.set(value);
		debug_assert!(set.is_ok(), "slot published twice");
		let mut inner = self.inner.lock();
		inner.state = State::Ready;
		inner.last_failure = None;
		drop(inner);
		self.resolved.notify_all();
	}

	/// Resolve the current attempt as failed and wake every waiter.
	///
	/// With `poison` the failure stays as a tombstone; otherwise the slot
	/// reverts to empty. Returns whether the slot is left idle, which means
	/// nobody is waiting on it and it may be dropped from its shard.
	pub fn fail(&self, attempt: u64, failure: Failure, poison: bool) -> bool {
		let mut inner = self.inner.lock();
		if poison {
			inner.state = State::Failed(failure.into_poison());
			inner.last_failure = None;
		} else {
			inner.state = State::Empty;
			inner.last_failure = Some((attempt, failure));
		}
		let idle = inner.is_idle();
		drop(inner);
		self.resolved.notify_all();
		idle
	}
}
