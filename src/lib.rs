#![doc = include_str!("../README.md")]

mod builder;
mod entry;
mod error;
#[cfg(feature = "metrics")]
mod metrics;
mod registry;
mod shard;
mod singleton;
mod traits;

pub use builder::RegistryBuilder;
pub use entry::EntryState;
pub use error::{BoxError, Cause, Error, Result};
#[cfg(feature = "metrics")]
pub use metrics::RegistryMetrics;
pub use registry::InstanceRegistry;
pub use singleton::Singleton;
pub use traits::{Factory, FailurePolicy};
