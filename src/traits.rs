use crate::error::BoxError;

/// What happens to an entry after its factory fails.
///
/// Whatever the policy, the caller that ran the factory always receives
/// [`Error::Construction`](crate::Error::Construction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FailurePolicy {
	/// Revert the entry to empty. Callers that were blocked on the failed
	/// attempt elect a new builder among themselves, each bringing its own
	/// factory. Later callers build afresh.
	#[default]
	Retry,

	/// Revert the entry to empty, and hand the failure to every caller that
	/// was blocked on the failed attempt. Later callers build afresh.
	Propagate,

	/// Keep the failure as a tombstone. Every later call fails with
	/// [`Error::Poisoned`](crate::Error::Poisoned) until the key is invalidated.
	Poison,
}

/// Produces the value for a key. Run at most once per elected build.
///
/// Implemented for every `FnOnce() -> Result<V, E>` whose error converts into
/// [`BoxError`], so closures are the usual way to supply a factory:
///
/// ```
/// use instance_registry::InstanceRegistry;
///
/// let registry: InstanceRegistry<&str, String> = InstanceRegistry::new();
/// let value = registry
///     .get_or_create("greeting", || Ok::<_, std::io::Error>("hello".to_string()))
///     .unwrap();
/// assert_eq!(*value, "hello");
/// ```
///
/// A factory must be safe to run again after a failure: under the default
/// [`FailurePolicy::Retry`] the next caller simply tries again.
pub trait Factory<V> {
	/// The error produced when construction fails.
	type Error: Into<BoxError>;

	/// Build the value.
	fn build(self) -> Result<V, Self::Error>;
}

impl<V, E, F> Factory<V> for F
where
	F: FnOnce() -> Result<V, E>,
	E: Into<BoxError>,
{
	type Error = E;

	fn build(self) -> Result<V, E> {
		self()
	}
}
