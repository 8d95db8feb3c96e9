//! Usage report request model.

use chrono::{DateTime, Utc};

/// Fraction of the active limit at which a feature is flagged as
/// approaching, when the caller does not override it.
pub const DEFAULT_WARN_THRESHOLD: f64 = 0.8;

/// Parameters for one report run. Read-only once constructed; empty filter
/// lists mean "no filter".
#[derive(Debug, Clone)]
pub struct UsageReportRequest {
    pub database_url: String,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub tenant_slugs: Vec<String>,
    pub plan_codes: Vec<String>,
    pub feature_keys: Vec<String>,
    pub include_inactive: bool,
    /// Fraction in [0, 1] of the active limit.
    pub warn_threshold: f64,
}

impl Default for UsageReportRequest {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            period_start: None,
            period_end: None,
            tenant_slugs: Vec::new(),
            plan_codes: Vec::new(),
            feature_keys: Vec::new(),
            include_inactive: false,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
        }
    }
}
