use std::sync::Arc;
use std::time::Duration;

/// Boxed error accepted from factories.
///
/// Any `E: std::error::Error + Send + Sync + 'static` converts into this, as do
/// `String` and `&str`, so factories can use `?` freely.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared cause of a failed construction.
///
/// Shared rather than boxed so that one failure can be handed to the builder
/// and to every waiter released by the same attempt.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by [`InstanceRegistry`](crate::InstanceRegistry) and
/// [`Singleton`](crate::Singleton).
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	/// The elected factory invocation returned an error.
	#[error("construction failed: {0}")]
	Construction(Cause),

	/// The elected factory invocation panicked.
	///
	/// The builder itself unwinds; this is only observed by waiters that were
	/// blocked on the attempt under [`FailurePolicy::Propagate`](crate::FailurePolicy::Propagate).
	#[error("construction panicked")]
	Panicked,

	/// The caller gave up waiting for another caller's construction.
	///
	/// The in-flight build and all other waiters are unaffected.
	#[error("timed out after {0:?} waiting for construction")]
	Timeout(Duration),

	/// An earlier construction failed and the registry is configured with
	/// [`FailurePolicy::Poison`](crate::FailurePolicy::Poison).
	#[error("entry poisoned by an earlier failed construction: {0}")]
	Poisoned(Cause),

	/// A factory requested the key it is currently building.
	#[error("factory re-entered the registry for the key it is building")]
	Reentrant,
}

impl Error {
	/// The underlying factory error, if this error carries one.
	pub fn cause(&self) -> Option<&Cause> {
		match self {
			Error::Construction(cause) | Error::Poisoned(cause) => Some(cause),
			_ => None,
		}
	}

	/// Whether a later call for the same key may succeed without intervention.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Error::Poisoned(_) | Error::Reentrant)
	}
}
