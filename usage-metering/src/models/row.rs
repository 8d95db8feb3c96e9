//! Read-only projections fetched for report generation and sync.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// One subscription joined to its tenant account and billing plan.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    pub tenant_slug: String,
    pub tenant_name: String,
    pub plan_id: Uuid,
    pub plan_code: String,
    pub plan_name: String,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// A metered feature declared on a plan. Absence of a row for a feature key
/// means the feature is undeclared, not zero-limited.
#[derive(Debug, Clone, FromRow)]
pub struct PlanFeatureRow {
    pub plan_code: String,
    pub feature_key: String,
    pub display_name: Option<String>,
    pub soft_limit: Option<i64>,
    pub hard_limit: Option<i64>,
    pub is_metered: bool,
}

/// One recorded usage interval for a subscription feature.
#[derive(Debug, Clone, FromRow)]
pub struct UsageRow {
    pub subscription_id: Uuid,
    pub feature_key: String,
    pub unit: Option<String>,
    pub quantity: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}
