use std::borrow::Borrow;
use std::convert::Infallible;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::entry::{EntryState, Failure, Slot, State};
use crate::error::{BoxError, Cause, Error, Result};
#[cfg(feature = "metrics")]
use crate::metrics::RegistryMetrics;
use crate::shard::{Detached, Shard};
use crate::traits::{Factory, FailurePolicy};

/// Default number of shards.
///
/// Shards only bound contention on the key map. Builds for different keys never
/// serialize on a shard, whatever the count.
pub(crate) const DEFAULT_SHARD_COUNT: usize = 64;

/// Concurrent registry that builds at most one shared instance per key.
///
/// Every caller of [`get_or_create`](Self::get_or_create) for the same key gets
/// the same `Arc<V>`. When the key is missing, exactly one concurrent caller is
/// elected to run its factory; everyone else for that key waits for the result.
/// Callers for other keys are never held up by a running factory.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use instance_registry::InstanceRegistry;
///
/// #[derive(Debug)]
/// struct Font {
///     family: String,
///     size: u32,
/// }
///
/// let fonts: InstanceRegistry<(&str, u32), Font> = InstanceRegistry::new();
///
/// let a = fonts
///     .get_or_create(("mono", 12), || Ok::<_, std::io::Error>(Font { family: "mono".into(), size: 12 }))
///     .unwrap();
/// let b = fonts
///     .get_or_create(("mono", 12), || -> std::io::Result<Font> { unreachable!("already built") })
///     .unwrap();
///
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(fonts.len(), 1);
/// ```
///
/// # Concurrency
///
/// Keys are spread over shards, each a `parking_lot::RwLock` around a hash map
/// of per-key slots. The shard lock is held only to find or insert a slot. Each
/// slot carries its own mutex and condition variable, which is where callers
/// for the same key elect a builder and wait for it. No lock of any kind is held
/// while a factory runs, so a factory may itself use the registry for other keys.
pub struct InstanceRegistry<K, V, S = RandomState> {
	/// Sharded slot maps
	shards: Box<[RwLock<Shard<K, V, S>>]>,
	/// Hasher used for shard selection (each shard holds a clone)
	hasher: S,
	/// Number of shards minus one
	shard_mask: usize,
	/// What a failed build leaves behind
	policy: FailurePolicy,
	/// Wait limit applied by `get_or_create`
	wait_timeout: Option<Duration>,
	/// Number of published entries
	published: AtomicUsize,
	/// Metrics: calls served an existing value
	#[cfg(feature = "metrics")]
	hits: AtomicU64,
	/// Metrics: factory runs
	#[cfg(feature = "metrics")]
	builds: AtomicU64,
	/// Metrics: factory runs that did not publish
	#[cfg(feature = "metrics")]
	failures: AtomicU64,
	/// Metrics: times a caller blocked on another caller's build
	#[cfg(feature = "metrics")]
	waits: AtomicU64,
	/// Metrics: waits abandoned on timeout
	#[cfg(feature = "metrics")]
	timeouts: AtomicU64,
	/// Metrics: entries removed by `invalidate` or `clear`
	#[cfg(feature = "metrics")]
	invalidations: AtomicU64,
}

impl<K, V> InstanceRegistry<K, V, RandomState>
where
	K: Hash + Eq + Clone,
{
	/// Create an empty registry with default configuration.
	///
	/// Uses 64 shards, [`FailurePolicy::Retry`] and no wait timeout. See
	/// [`RegistryBuilder`](crate::RegistryBuilder) for the knobs.
	pub fn new() -> Self {
		Self::with_shards(DEFAULT_SHARD_COUNT)
	}

	/// Create with a custom shard count, rounded up to a power of two.
	pub fn with_shards(shard_count: usize) -> Self {
		Self::with_config(shard_count, FailurePolicy::default(), None, RandomState::new())
	}
}

impl<K, V> Default for InstanceRegistry<K, V, RandomState>
where
	K: Hash + Eq + Clone,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<K, V, S> InstanceRegistry<K, V, S>
where
	K: Hash + Eq + Clone,
	S: BuildHasher + Clone,
{
	/// Create with a custom hasher and default configuration otherwise.
	pub fn with_hasher(hasher: S) -> Self {
		Self::with_config(DEFAULT_SHARD_COUNT, FailurePolicy::default(), None, hasher)
	}

	/// Full constructor used by `RegistryBuilder`.
	pub(crate) fn with_config(
		shard_count: usize,
		policy: FailurePolicy,
		wait_timeout: Option<Duration>,
		hasher: S,
	) -> Self {
		let shard_count = shard_count.max(1).next_power_of_two();
		let shards = (0..shard_count)
			.map(|_| RwLock::new(Shard::with_hasher(hasher.clone())))
			.collect();

		Self {
			shards,
			hasher,
			shard_mask: shard_count - 1,
			policy,
			wait_timeout,
			published: AtomicUsize::new(0),
			#[cfg(feature = "metrics")]
			hits: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			builds: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			failures: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			waits: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			timeouts: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			invalidations: AtomicU64::new(0),
		}
	}

	/// Return the value for `key`, building it with `factory` if needed.
	///
	/// - If a value is published, it is returned without running `factory`.
	/// - If nobody is building the key, this caller runs `factory` and
	///   publishes the result to every current and future caller.
	/// - If another caller is building the key, this caller blocks until that
	///   build resolves. It then receives the published value, or under
	///   [`FailurePolicy::Retry`] may itself be elected to build.
	///
	/// Uses the registry's default wait timeout, if one was configured.
	///
	/// # Errors
	///
	/// - [`Error::Construction`] if this caller's factory failed (or, under
	///   [`FailurePolicy::Propagate`], the build it waited on failed).
	/// - [`Error::Panicked`] if the build it waited on panicked, under `Propagate`.
	/// - [`Error::Poisoned`] if the key holds a tombstone under [`FailurePolicy::Poison`].
	/// - [`Error::Timeout`] if the wait limit elapsed.
	/// - [`Error::Reentrant`] if called from inside this key's own factory.
	///
	/// # Panics
	///
	/// If `factory` panics, the panic is propagated after the entry has been
	/// released, so waiters are never left blocked.
	pub fn get_or_create<F>(&self, key: K, factory: F) -> Result<Arc<V>>
	where
		F: Factory<V>,
	{
		self.resolve(key, factory, self.wait_timeout)
	}

	/// Like [`get_or_create`](Self::get_or_create), but gives up waiting for
	/// another caller's build after `timeout`.
	///
	/// A timed-out caller leaves the in-flight build and every other waiter
	/// untouched. The timeout does not bound this caller's own factory run.
	pub fn get_or_create_timeout<F>(&self, key: K, timeout: Duration, factory: F) -> Result<Arc<V>>
	where
		F: Factory<V>,
	{
		self.resolve(key, factory, Some(timeout))
	}

	/// Register `value` under `key` unless a value is already published.
	///
	/// Returns whichever value ends up registered. Waits for an in-flight build
	/// like [`get_or_create`](Self::get_or_create).
	pub fn get_or_insert(&self, key: K, value: V) -> Result<Arc<V>> {
		self.get_or_create(key, move || Ok::<_, Infallible>(value))
	}

	/// Return the published value for `key` without building it.
	pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let shard = self.get_shard(self.hasher.hash_one(key)).read();
		shard.get(key)?.value().cloned()
	}

	/// Whether a value is published for `key`.
	pub fn contains_key<Q>(&self, key: &Q) -> bool
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let shard = self.get_shard(self.hasher.hash_one(key)).read();
		shard.get(key).is_some_and(|slot| slot.value().is_some())
	}

	/// Current state of `key`.
	pub fn state<Q>(&self, key: &Q) -> EntryState
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let shard = self.get_shard(self.hasher.hash_one(key)).read();
		shard.get(key).map_or(EntryState::Empty, |slot| slot.lock().observe())
	}

	/// Number of calls for `key` that were served a value they did not build.
	///
	/// For a key built once and requested `n` times, this is `n - 1`. Returns
	/// `None` if the registry holds no entry for `key`.
	pub fn hits<Q>(&self, key: &Q) -> Option<u64>
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let shard = self.get_shard(self.hasher.hash_one(key)).read();
		shard.get(key).map(|slot| slot.hits())
	}

	/// Remove a published or poisoned entry so the next request rebuilds it.
	///
	/// Values already handed out are unaffected. Returns `false` if the key
	/// has no such entry, including while it is being built.
	pub fn invalidate<Q>(&self, key: &Q) -> bool
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let hash = self.hasher.hash_one(key);
		let detached = self.get_shard(hash).write().detach(key);

		let removed = match detached {
			Some(Detached::Ready) => {
				self.published.fetch_sub(1, Ordering::Relaxed);
				true
			}
			Some(Detached::Failed) => true,
			Some(Detached::Empty) | None => false,
		};

		if removed {
			debug!(key_hash = %format_args!("{hash:016x}"), "invalidated entry");
			#[cfg(feature = "metrics")]
			self.invalidations.fetch_add(1, Ordering::Relaxed);
		}
		removed
	}

	/// Invalidate every entry that is not currently being built.
	pub fn clear(&self) {
		for shard_lock in &self.shards {
			let dropped = shard_lock.write().clear();
			self.published.fetch_sub(dropped, Ordering::Relaxed);
			#[cfg(feature = "metrics")]
			self.invalidations.fetch_add(dropped as u64, Ordering::Relaxed);
		}
	}

	/// Number of published values.
	pub fn len(&self) -> usize {
		self.published.load(Ordering::Relaxed)
	}

	/// Whether no value is published.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of shards.
	pub fn shard_count(&self) -> usize {
		self.shards.len()
	}

	/// Configured failure policy.
	pub fn failure_policy(&self) -> FailurePolicy {
		self.policy
	}

	/// Snapshot of the registry's counters.
	#[cfg(feature = "metrics")]
	pub fn metrics(&self) -> RegistryMetrics {
		RegistryMetrics {
			hits: self.hits.load(Ordering::Relaxed),
			builds: self.builds.load(Ordering::Relaxed),
			failures: self.failures.load(Ordering::Relaxed),
			waits: self.waits.load(Ordering::Relaxed),
			timeouts: self.timeouts.load(Ordering::Relaxed),
			invalidations: self.invalidations.load(Ordering::Relaxed),
			entry_count: self.len(),
		}
	}

	/// Publish `value` under `key` before the registry is shared.
	pub(crate) fn seed(&mut self, key: K, value: V) {
		let hash = self.hasher.hash_one(&key);
		let index = self.shard_index(hash);
		let replaced = self.shards[index].get_mut().insert_ready(key, Arc::new(value));
		if !replaced.is_some_and(|slot| slot.value().is_some()) {
			self.published.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Single-flight lookup with double-checked publication.
	fn resolve<F>(&self, key: K, factory: F, timeout: Option<Duration>) -> Result<Arc<V>>
	where
		F: Factory<V>,
	{
		let hash = self.hasher.hash_one(&key);
		let shard_lock = self.get_shard(hash);
		// Overflowing deadlines wait forever.
		let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

		'lookup: loop {
			// Fast path: a published value only needs the shard read lock.
			let existing = shard_lock.read().get(&key).cloned();
			if let Some(slot) = &existing
				&& let Some(value) = slot.value()
			{
				return Ok(self.hit(slot, value));
			}

			let slot = match existing {
				Some(slot) => slot,
				None => shard_lock.write().get_or_insert(key.clone()),
			};

			// Slow path: re-check under the slot lock.
			let mut inner = slot.lock();
			loop {
				let (builder, attempt) = match &inner.state {
					State::Building { builder, attempt } => (*builder, *attempt),
					State::Ready => {
						drop(inner);
						// Ready is only entered once the value is set.
						match slot.value() {
							Some(value) => return Ok(self.hit(&slot, value)),
							None => continue 'lookup,
						}
					}
					State::Failed(cause) => return Err(Error::Poisoned(cause.clone())),
					State::Detached => continue 'lookup,
					State::Empty => {
						let attempt = inner.elect();
						drop(inner);
						return self.build(&key, hash, &slot, attempt, factory);
					}
				};

				if builder == thread::current().id() {
					warn!(key_hash = %format_args!("{hash:016x}"), "factory re-entered its own key");
					return Err(Error::Reentrant);
				}

				trace!(key_hash = %format_args!("{hash:016x}"), attempt, "waiting on in-flight build");
				#[cfg(feature = "metrics")]
				self.waits.fetch_add(1, Ordering::Relaxed);

				if !slot.wait(&mut inner, deadline) {
					drop(inner);
					let waited = timeout.unwrap_or_default();
					warn!(key_hash = %format_args!("{hash:016x}"), ?waited, "gave up waiting on build");
					#[cfg(feature = "metrics")]
					self.timeouts.fetch_add(1, Ordering::Relaxed);
					// The build may have failed while this caller was timing out.
					shard_lock.write().remove_if_idle(&key, &slot);
					return Err(Error::Timeout(waited));
				}

				if self.policy == FailurePolicy::Propagate
					&& let Some(failure) = inner.failure_of(attempt)
				{
					let err = failure.clone().into_error();
					drop(inner);
					// The last waiter out drops the reverted slot.
					shard_lock.write().remove_if_idle(&key, &slot);
					return Err(err);
				}
			}
		}
	}

	/// Run the elected factory and resolve the slot.
	fn build<F>(&self, key: &K, hash: u64, slot: &Arc<Slot<V>>, attempt: u64, factory: F) -> Result<Arc<V>>
	where
		F: Factory<V>,
	{
		trace!(key_hash = %format_args!("{hash:016x}"), attempt, "elected builder");
		#[cfg(feature = "metrics")]
		self.builds.fetch_add(1, Ordering::Relaxed);

		let guard = BuildGuard {
			registry: self,
			key,
			hash,
			slot,
			attempt,
			armed: true,
		};

		match factory.build() {
			Ok(value) => {
				let value = Arc::new(value);
				guard.publish(value.clone());
				Ok(value)
			}
			Err(err) => {
				let err: BoxError = err.into();
				let cause: Cause = Arc::from(err);
				warn!(key_hash = %format_args!("{hash:016x}"), attempt, error = %cause, "construction failed");
				guard.fail(Failure::Factory(cause.clone()));
				Err(Error::Construction(cause))
			}
		}
	}

	/// Resolve a failed attempt, dropping the slot if nobody is left on it.
	fn abandon(&self, key: &K, hash: u64, slot: &Arc<Slot<V>>, attempt: u64, failure: Failure) {
		#[cfg(feature = "metrics")]
		self.failures.fetch_add(1, Ordering::Relaxed);

		let poison = self.policy == FailurePolicy::Poison;
		if slot.fail(attempt, failure, poison) {
			self.get_shard(hash).write().remove_if_idle(key, slot);
		}
	}

	fn hit(&self, slot: &Slot<V>, value: &Arc<V>) -> Arc<V> {
		slot.hit();
		#[cfg(feature = "metrics")]
		self.hits.fetch_add(1, Ordering::Relaxed);
		value.clone()
	}

	/// Get the shard for a given hash.
	fn get_shard(&self, hash: u64) -> &RwLock<Shard<K, V, S>> {
		&self.shards[self.shard_index(hash)]
	}

	fn shard_index(&self, hash: u64) -> usize {
		// The low bits pick buckets inside each shard's map.
		((hash >> 32) as usize) & self.shard_mask
	}
}

impl<K, V> FromIterator<(K, V)> for InstanceRegistry<K, V, RandomState>
where
	K: Hash + Eq + Clone,
{
	/// Eagerly build a registry whose values are published up front.
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut registry = Self::new();
		for (key, value) in iter {
			registry.seed(key, value);
		}
		registry
	}
}

impl<K, V, S> fmt::Debug for InstanceRegistry<K, V, S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InstanceRegistry")
			.field("len", &self.published.load(Ordering::Relaxed))
			.field("shards", &self.shards.len())
			.field("policy", &self.policy)
			.field("wait_timeout", &self.wait_timeout)
			.finish_non_exhaustive()
	}
}

/// Releases the slot if the factory unwinds.
struct BuildGuard<'a, K, V, S>
where
	K: Hash + Eq + Clone,
	S: BuildHasher + Clone,
{
	registry: &'a InstanceRegistry<K, V, S>,
	key: &'a K,
	hash: u64,
	slot: &'a Arc<Slot<V>>,
	attempt: u64,
	armed: bool,
}

impl<K, V, S> BuildGuard<'_, K, V, S>
where
	K: Hash + Eq + Clone,
	S: BuildHasher + Clone,
{
	fn publish(mut self, value: Arc<V>) {
		self.armed = false;
		// Counted before the slot turns Ready, since only a Ready slot can be
		// invalidated and counted back down.
		self.registry.published.fetch_add(1, Ordering::Relaxed);
		self.slot.publish(value);
		debug!(key_hash = %format_args!("{:016x}", self.hash), attempt = self.attempt, "published value");
	}

	fn fail(mut self, failure: Failure) {
		self.armed = false;
		self.registry.abandon(self.key, self.hash, self.slot, self.attempt, failure);
	}
}

impl<K, V, S> Drop for BuildGuard<'_, K, V, S>
where
	K: Hash + Eq + Clone,
	S: BuildHasher + Clone,
{
	fn drop(&mut self) {
		if self.armed {
			warn!(key_hash = %format_args!("{:016x}", self.hash), attempt = self.attempt, "factory panicked");
			self.registry.abandon(self.key, self.hash, self.slot, self.attempt, Failure::Panicked);
		}
	}
}
