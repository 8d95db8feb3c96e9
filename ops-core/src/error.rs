use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("Query error: {0}")]
    Query(anyhow::Error),

    // Filters matched zero subscriptions; nothing to report, not a fault.
    #[error("No matching subscriptions: {0}")]
    NoMatch(String),

    #[error("Entitlement artifact error: {0}")]
    Artifact(anyhow::Error),

    #[error("Unknown plan code: {0}")]
    UnknownPlan(String),

    #[error("Plan filter matched no plans in the artifact: {0}")]
    EmptyFilter(String),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for OpsError {
    fn from(err: config::ConfigError) -> Self {
        OpsError::Config(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for OpsError {
    fn from(err: std::io::Error) -> Self {
        OpsError::Internal(anyhow::Error::new(err))
    }
}
