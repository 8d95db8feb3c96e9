//! ops-core: Shared infrastructure for the metering operator tools.
pub mod config;
pub mod error;
pub mod observability;

pub use serde;
pub use tracing;
