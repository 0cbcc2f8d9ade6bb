//! Registry counters.

/// Counters describing how a registry has been used.
///
/// # Example
///
/// ```
/// use instance_registry::InstanceRegistry;
///
/// let registry: InstanceRegistry<u32, String> = InstanceRegistry::new();
/// registry.get_or_insert(1, "one".to_string()).unwrap();
/// registry.get_or_insert(1, "uno".to_string()).unwrap();
///
/// let metrics = registry.metrics();
/// assert_eq!(metrics.builds, 1);
/// assert_eq!(metrics.hits, 1);
/// println!("Hit rate: {:.2}%", metrics.hit_rate() * 100.0);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct RegistryMetrics {
	/// Calls served a value they did not build.
	pub hits: u64,
	/// Factory runs, successful or not.
	pub builds: u64,
	/// Factory runs that failed or panicked.
	pub failures: u64,
	/// Times a caller blocked on another caller's build.
	pub waits: u64,
	/// Waits abandoned because the caller's timeout elapsed.
	pub timeouts: u64,
	/// Entries removed by `invalidate` or `clear`.
	pub invalidations: u64,
	/// Current number of published values.
	pub entry_count: usize,
}

impl RegistryMetrics {
	/// Fraction of resolved requests that were served an existing value.
	///
	/// Returns 0.0 if nothing has been requested.
	pub fn hit_rate(&self) -> f64 {
		let total = self.total_requests();
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}

	/// Requests that either hit or ran a factory.
	pub fn total_requests(&self) -> u64 {
		self.hits + self.builds
	}

	/// Fraction of factory runs that did not publish.
	pub fn failure_rate(&self) -> f64 {
		if self.builds == 0 {
			0.0
		} else {
			self.failures as f64 / self.builds as f64
		}
	}
}
