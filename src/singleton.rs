use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::RegistryBuilder;
use crate::entry::EntryState;
use crate::error::Result;
use crate::registry::InstanceRegistry;
use crate::traits::{Factory, FailurePolicy};

/// A lazily built, shared single instance.
///
/// This is an [`InstanceRegistry`] with exactly one implicit key. It adds no
/// synchronization of its own: every guarantee (one construction under
/// contention, safe publication, retry after failure) comes from the registry.
///
/// Hold it wherever shared access is needed, rather than behind a global:
///
/// ```
/// use std::sync::Arc;
/// use instance_registry::Singleton;
///
/// struct Config {
///     verbose: bool,
/// }
///
/// struct App {
///     config: Singleton<Config>,
/// }
///
/// let app = App { config: Singleton::new() };
/// let a = app.config.get_or_init(|| Ok::<_, std::io::Error>(Config { verbose: true })).unwrap();
/// let b = app.config.get().unwrap();
/// assert!(a.verbose);
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct Singleton<V> {
	registry: InstanceRegistry<(), V>,
}

impl<V> Singleton<V> {
	/// Create an uninitialized singleton that retries after a failed build.
	pub fn new() -> Self {
		Self::with_policy(FailurePolicy::default())
	}

	/// Create an uninitialized singleton with the given failure policy.
	pub fn with_policy(policy: FailurePolicy) -> Self {
		Self {
			registry: RegistryBuilder::new().shards(1).failure_policy(policy).build(),
		}
	}

	/// Create an already initialized singleton.
	pub fn from_value(value: V) -> Self {
		Self {
			registry: RegistryBuilder::new().shards(1).build_eager([((), value)]),
		}
	}

	/// Return the instance, building it with `factory` on first use.
	///
	/// See [`InstanceRegistry::get_or_create`] for the waiting and failure rules.
	pub fn get_or_init<F>(&self, factory: F) -> Result<Arc<V>>
	where
		F: Factory<V>,
	{
		self.registry.get_or_create((), factory)
	}

	/// Like [`get_or_init`](Self::get_or_init), but gives up waiting on a
	/// concurrent build after `timeout`.
	pub fn get_or_init_timeout<F>(&self, timeout: Duration, factory: F) -> Result<Arc<V>>
	where
		F: Factory<V>,
	{
		self.registry.get_or_create_timeout((), timeout, factory)
	}

	/// Return the instance if it has been built.
	pub fn get(&self) -> Option<Arc<V>> {
		self.registry.get(&())
	}

	/// Whether the instance has been built.
	pub fn is_initialized(&self) -> bool {
		self.registry.contains_key(&())
	}

	/// Current state of the instance.
	pub fn state(&self) -> EntryState {
		self.registry.state(&())
	}

	/// Drop the instance so the next call builds a new one.
	///
	/// Handles already given out keep the old instance alive.
	pub fn invalidate(&self) -> bool {
		self.registry.invalidate(&())
	}
}

impl<V> Default for Singleton<V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<V> fmt::Debug for Singleton<V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Singleton").field("state", &self.state()).finish()
	}
}

#[cfg(test)]
mod tests {
	use std::io;
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;
	use crate::error::Error;

	#[test]
	fn test_singleton_builds_once() {
		let singleton = Singleton::new();
		let calls = AtomicU32::new(0);
		let factory = || {
			calls.fetch_add(1, Ordering::SeqCst);
			Ok::<_, io::Error>(vec![1, 2, 3])
		};

		assert!(!singleton.is_initialized());
		let a = singleton.get_or_init(factory).unwrap();
		let b = singleton.get_or_init(factory).unwrap();

		assert!(Arc::ptr_eq(&a, &b));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(singleton.is_initialized());
		assert_eq!(singleton.state(), EntryState::Ready);
	}

	#[test]
	fn test_singleton_retries_after_failure() {
		let singleton: Singleton<u32> = Singleton::new();

		let err = singleton.get_or_init(|| Err::<u32, _>("not yet")).unwrap_err();
		assert!(matches!(err, Error::Construction(_)));
		assert!(singleton.get().is_none());

		assert_eq!(*singleton.get_or_init(|| Ok::<_, io::Error>(5)).unwrap(), 5);
	}

	#[test]
	fn test_singleton_poison() {
		let singleton: Singleton<u32> = Singleton::with_policy(FailurePolicy::Poison);

		singleton.get_or_init(|| Err::<u32, _>("broken")).unwrap_err();
		let err = singleton.get_or_init(|| Ok::<_, io::Error>(5)).unwrap_err();
		assert!(matches!(err, Error::Poisoned(_)));
		assert_eq!(singleton.state(), EntryState::Failed);
	}

	#[test]
	fn test_singleton_from_value() {
		let singleton = Singleton::from_value("ready");
		assert!(singleton.is_initialized());
		assert_eq!(singleton.get().as_deref(), Some(&"ready"));
	}

	#[test]
	fn test_singleton_invalidate() {
		let singleton = Singleton::from_value(1u8);
		let old = singleton.get().unwrap();

		assert!(singleton.invalidate());
		assert!(!singleton.is_initialized());
		assert_eq!(*old, 1);

		let new = singleton.get_or_init(|| Ok::<_, io::Error>(2)).unwrap();
		assert_eq!(*new, 2);
	}
}
