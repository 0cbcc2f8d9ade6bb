use std::hash::{BuildHasher, Hash};
use std::time::Duration;

use ahash::RandomState;

use crate::registry::{DEFAULT_SHARD_COUNT, InstanceRegistry};
use crate::traits::FailurePolicy;

/// Upper bound on the shard count.
const MAX_SHARD_COUNT: usize = 1 << 16;

/// Builder for configuring an [`InstanceRegistry`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use instance_registry::{FailurePolicy, InstanceRegistry, RegistryBuilder};
///
/// let registry: InstanceRegistry<u64, String> = RegistryBuilder::new()
///     .shards(16)
///     .failure_policy(FailurePolicy::Propagate)
///     .wait_timeout(Duration::from_secs(5))
///     .build();
///
/// assert_eq!(registry.shard_count(), 16);
/// ```
#[derive(Debug, Clone)]
pub struct RegistryBuilder<S = RandomState> {
	shard_count: usize,
	failure_policy: FailurePolicy,
	wait_timeout: Option<Duration>,
	hasher: S,
}

impl RegistryBuilder {
	/// Create a builder with default settings.
	pub fn new() -> Self {
		Self {
			shard_count: DEFAULT_SHARD_COUNT,
			failure_policy: FailurePolicy::default(),
			wait_timeout: None,
			hasher: RandomState::new(),
		}
	}
}

impl Default for RegistryBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl<S> RegistryBuilder<S> {
	/// Set the number of shards.
	///
	/// More shards reduce contention on the key map. Will be rounded up to the
	/// next power of 2.
	///
	/// Default: 64 shards
	pub fn shards(mut self, count: usize) -> Self {
		assert!(
			count > 0 && count <= MAX_SHARD_COUNT,
			"shard count must be between 1 and {MAX_SHARD_COUNT}"
		);
		self.shard_count = count;
		self
	}

	/// Set what a failed construction leaves behind.
	///
	/// Default: [`FailurePolicy::Retry`]
	pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
		self.failure_policy = policy;
		self
	}

	/// Limit how long `get_or_create` waits on another caller's build.
	///
	/// Default: wait until the build resolves
	pub fn wait_timeout(mut self, timeout: Duration) -> Self {
		assert!(!timeout.is_zero(), "wait_timeout must be non-zero");
		self.wait_timeout = Some(timeout);
		self
	}

	/// Use a custom hasher for key placement.
	pub fn hasher<H>(self, hasher: H) -> RegistryBuilder<H> {
		RegistryBuilder {
			shard_count: self.shard_count,
			failure_policy: self.failure_policy,
			wait_timeout: self.wait_timeout,
			hasher,
		}
	}

	/// Build an empty registry.
	pub fn build<K, V>(self) -> InstanceRegistry<K, V, S>
	where
		K: Hash + Eq + Clone,
		S: BuildHasher + Clone,
	{
		InstanceRegistry::with_config(
			self.shard_count,
			self.failure_policy,
			self.wait_timeout,
			self.hasher,
		)
	}

	/// Build a registry with every entry of `entries` published up front.
	///
	/// Nothing is constructed lazily for these keys, so they never contend.
	/// Later keys are still built on demand.
	pub fn build_eager<K, V, I>(self, entries: I) -> InstanceRegistry<K, V, S>
	where
		K: Hash + Eq + Clone,
		S: BuildHasher + Clone,
		I: IntoIterator<Item = (K, V)>,
	{
		let mut registry = self.build();
		for (key, value) in entries {
			registry.seed(key, value);
		}
		registry
	}
}

#[cfg(test)]
mod tests {
	use std::hash::BuildHasherDefault;
	use std::hash::DefaultHasher;

	use super::*;

	#[test]
	fn test_builder_default() {
		let registry: InstanceRegistry<u32, u32> = RegistryBuilder::new().build();
		assert!(registry.is_empty());
		assert_eq!(registry.shard_count(), DEFAULT_SHARD_COUNT);
		assert_eq!(registry.failure_policy(), FailurePolicy::Retry);
	}

	#[test]
	fn test_builder_with_shards() {
		let registry: InstanceRegistry<u32, u32> = RegistryBuilder::new().shards(3).build();
		assert_eq!(registry.shard_count(), 4);
	}

	#[test]
	fn test_builder_with_policy() {
		let registry: InstanceRegistry<u32, u32> =
			RegistryBuilder::new().failure_policy(FailurePolicy::Poison).build();
		assert_eq!(registry.failure_policy(), FailurePolicy::Poison);
	}

	#[test]
	fn test_builder_with_hasher() {
		let registry: InstanceRegistry<u32, u32, BuildHasherDefault<DefaultHasher>> =
			RegistryBuilder::new().hasher(BuildHasherDefault::default()).build();
		assert_eq!(*registry.get_or_insert(1, 10).unwrap(), 10);
	}

	#[test]
	fn test_build_eager() {
		let registry = RegistryBuilder::new().build_eager([("a", 1), ("b", 2), ("a", 3)]);
		assert_eq!(registry.len(), 2);
		assert_eq!(registry.get("a").as_deref(), Some(&3));
	}

	#[test]
	#[should_panic(expected = "shard count must be between")]
	fn test_builder_invalid_shards() {
		RegistryBuilder::new().shards(0);
	}

	#[test]
	#[should_panic(expected = "wait_timeout must be non-zero")]
	fn test_builder_invalid_timeout() {
		RegistryBuilder::new().wait_timeout(Duration::ZERO);
	}
}
