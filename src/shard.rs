use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crate::entry::{Slot, State};

/// One shard of the registry: a plain map from key to slot.
///
/// The shard is not thread-safe on its own; the registry wraps it in `RwLock`.
/// The lock only ever guards structural changes and lookups. It is never held
/// while a factory runs.
pub(crate) struct Shard<K, V, S> {
	slots: HashMap<K, Arc<Slot<V>>, S>,
}

impl<K, V, S> Shard<K, V, S>
where
	K: Hash + Eq,
	S: BuildHasher,
{
	pub fn with_hasher(hasher: S) -> Self {
		Self {
			slots: HashMap::with_hasher(hasher),
		}
	}

	/// Get the slot for a key.
	pub fn get<Q>(&self, key: &Q) -> Option<&Arc<Slot<V>>>
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		self.slots.get(key)
	}

	/// Get the slot for a key, inserting an empty one if absent.
	pub fn get_or_insert(&mut self, key: K) -> Arc<Slot<V>> {
		self.slots.entry(key).or_insert_with(|| Arc::new(Slot::new())).clone()
	}

	/// Insert a published slot. Replaces whatever was there.
	pub fn insert_ready(&mut self, key: K, value: Arc<V>) -> Option<Arc<Slot<V>>> {
		self.slots.insert(key, Arc::new(Slot::ready(value)))
	}

	/// Remove `slot` under `key` if it is still the live slot and nobody is
	/// using it.
	pub fn remove_if_idle<Q>(&mut self, key: &Q, slot: &Arc<Slot<V>>) -> bool
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		match self.slots.get(key) {
			Some(live) if Arc::ptr_eq(live, slot) => {}
			_ => return false,
		}

		let mut inner = slot.lock();
		if !inner.is_idle() {
			return false;
		}
		inner.state = State::Detached;
		drop(inner);

		self.slots.remove(key);
		true
	}

	/// Detach and remove a key's slot unless a build is in progress.
	///
	/// Returns the removed slot's state before detaching, or `None` if nothing
	/// was removed.
	pub fn detach<Q>(&mut self, key: &Q) -> Option<Detached>
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let slot = self.slots.get(key)?;
		let mut inner = slot.lock();
		let detached = match inner.state {
			State::Building { .. } | State::Detached => return None,
			State::Ready => Detached::Ready,
			State::Failed(_) => Detached::Failed,
			State::Empty => Detached::Empty,
		};
		inner.state = State::Detached;
		drop(inner);

		self.slots.remove(key);
		Some(detached)
	}

	/// Detach and remove every slot that is not being built.
	///
	/// Returns the number of published values dropped from the shard.
	pub fn clear(&mut self) -> usize {
		let mut published = 0;
		self.slots.retain(|_, slot| {
			let mut inner = slot.lock();
			if matches!(inner.state, State::Building { .. }) {
				return true;
			}
			if matches!(inner.state, State::Ready) {
				published += 1;
			}
			inner.state = State::Detached;
			false
		});
		published
	}

	/// Number of slots, in any state.
	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.slots.len()
	}
}

/// What a detached slot held when it was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detached {
	Empty,
	Ready,
	Failed,
}
