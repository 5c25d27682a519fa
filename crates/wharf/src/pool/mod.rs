//! Adaptive worker pool.
//!
//! A [`Pool`] runs caller-supplied [`Job`]s on a set of Tokio tasks whose size
//! floats between a minimum and a maximum supplied as callables, so operators
//! can retune bounds at runtime.
//!
//! ## Submodules
//!
//! - `config`: Sizing functions and idle timeout.
//! - `manager`: The [`Pool`] handle: submission, resizing, shutdown.
//! - `worker`: Worker loop and panic containment.
//! - `stats`: Lock-free counters and the [`Stats`] snapshot.
//! - `registry`: [`PoolRegistry`], for sharing pools between servers.

mod config;
mod job;
mod manager;
mod registry;
mod stats;
mod worker;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_IDLE_TIMEOUT, PoolConfig, SizeFn, fixed};
pub use job::Job;
pub use manager::Pool;
pub use registry::PoolRegistry;
pub use stats::Stats;
