//! Configuration for the usage-metering CLI.

use ops_core::config::Config;
use ops_core::error::OpsError;
use std::env;

/// Process-level configuration. The engine entry points take every parameter
/// explicitly; this is read only by the binary.
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    pub common: Config,
    /// Default DSN when the invocation does not pass `--database-url`.
    pub database_url: Option<String>,
}

impl MeteringConfig {
    pub fn from_env() -> Result<Self, OpsError> {
        let common = Config::load()?;

        Ok(Self {
            common,
            database_url: env::var("DATABASE_URL").ok(),
        })
    }
}
