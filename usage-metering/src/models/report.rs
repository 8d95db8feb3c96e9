//! Usage report models: guardrail statuses, accumulators, and snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::row::UsageRow;

/// Guardrail status of one feature against its plan limits. Exactly one
/// status holds per snapshot; breaches take precedence over warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStatus {
    Ok,
    Approaching,
    SoftLimitExceeded,
    HardLimitExceeded,
}

impl GuardrailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailStatus::Ok => "ok",
            GuardrailStatus::Approaching => "approaching",
            GuardrailStatus::SoftLimitExceeded => "soft_limit_exceeded",
            GuardrailStatus::HardLimitExceeded => "hard_limit_exceeded",
        }
    }
}

/// Running totals for one (subscription, feature) pair.
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    pub quantity: i64,
    pub unit: Option<String>,
    pub observed_start: Option<DateTime<Utc>>,
    pub observed_end: Option<DateTime<Utc>>,
}

impl UsageAccumulator {
    /// Fold one usage row into the totals: sum the quantity, keep the last
    /// seen unit, and widen the observed window.
    pub fn absorb(&mut self, row: &UsageRow) {
        self.quantity += row.quantity;
        self.unit = row.unit.clone();
        self.observed_start = Some(match self.observed_start {
            Some(current) => current.min(row.period_start),
            None => row.period_start,
        });
        self.observed_end = Some(match self.observed_end {
            Some(current) => current.max(row.period_end),
            None => row.period_end,
        });
    }
}

/// One feature's usage measured against its declared limits.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureUsageSnapshot {
    pub feature_key: String,
    pub display_name: String,
    pub unit: Option<String>,
    pub quantity: i64,
    pub soft_limit: Option<i64>,
    pub hard_limit: Option<i64>,
    pub remaining_to_soft_limit: Option<i64>,
    pub remaining_to_hard_limit: Option<i64>,
    pub percent_of_soft_limit: Option<f64>,
    pub percent_of_hard_limit: Option<f64>,
    pub status: GuardrailStatus,
    pub approaching: bool,
    pub usage_window_start: Option<DateTime<Utc>>,
    pub usage_window_end: Option<DateTime<Utc>>,
}

/// One tenant subscription with its per-feature snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct TenantUsageSnapshot {
    pub tenant_id: Uuid,
    pub tenant_slug: String,
    pub tenant_name: String,
    pub plan_code: String,
    pub plan_name: String,
    pub subscription_status: String,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub features: Vec<FeatureUsageSnapshot>,
}

/// Report envelope: applied parameters, totals, and per-tenant snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub generated_at: DateTime<Utc>,
    pub applied_period_start: Option<DateTime<Utc>>,
    pub applied_period_end: Option<DateTime<Utc>>,
    pub tenant_filters: Vec<String>,
    pub plan_filters: Vec<String>,
    pub feature_filters: Vec<String>,
    pub warn_threshold: f64,
    pub include_inactive: bool,
    pub tenant_count: usize,
    pub feature_count: usize,
    pub tenants: Vec<TenantUsageSnapshot>,
}
