//! Usage report generation: window resolution, usage aggregation, and
//! guardrail evaluation.

use crate::models::{
    FeatureUsageSnapshot, GuardrailStatus, PlanFeatureRow, SubscriptionRow, TenantUsageSnapshot,
    UsageAccumulator, UsageReport, UsageReportRequest, UsageRow,
};
use crate::services::database::Database;
use chrono::{DateTime, Utc};
use ops_core::error::OpsError;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, instrument};
use uuid::Uuid;

type Window = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

/// Generate a usage report for the request's filters.
///
/// Opens its own connection pool and closes it on every exit path. Returns
/// `OpsError::NoMatch` when the filters select zero subscriptions.
#[instrument(skip(request), fields(
    tenants = request.tenant_slugs.len(),
    plans = request.plan_codes.len(),
    features = request.feature_keys.len(),
))]
pub async fn generate_report(request: &UsageReportRequest) -> Result<UsageReport, OpsError> {
    let db = Database::connect(&request.database_url).await?;
    let result = build_report(&db, request).await;
    db.close().await;
    result
}

async fn build_report(db: &Database, request: &UsageReportRequest) -> Result<UsageReport, OpsError> {
    let subscriptions = db.fetch_subscriptions(request).await?;
    if subscriptions.is_empty() {
        return Err(OpsError::NoMatch(describe_filters(request)));
    }

    let mut plan_codes: Vec<String> =
        subscriptions.iter().map(|s| s.plan_code.clone()).collect();
    plan_codes.sort();
    plan_codes.dedup();
    let plan_features = db.fetch_plan_features(&plan_codes, &request.feature_keys).await?;

    let subscription_ids: Vec<Uuid> =
        subscriptions.iter().map(|s| s.subscription_id).collect();
    let usage_rows = db
        .fetch_usage_rows(
            &subscription_ids,
            &request.feature_keys,
            request.period_start,
            request.period_end,
        )
        .await?;

    let (derived_start, derived_end) = resolve_report_window(request, &subscriptions);

    let windows: HashMap<Uuid, Window> = subscriptions
        .iter()
        .map(|s| {
            let window = resolve_subscription_window(request, s, derived_start, derived_end);
            (s.subscription_id, window)
        })
        .collect();

    let usage = aggregate_usage(&usage_rows, &windows);

    let mut tenants = Vec::with_capacity(subscriptions.len());
    for subscription in &subscriptions {
        let (window_start, window_end) = windows[&subscription.subscription_id];
        let features = build_feature_snapshots(subscription, &plan_features, &usage, request);
        tenants.push(TenantUsageSnapshot {
            tenant_id: subscription.tenant_id,
            tenant_slug: subscription.tenant_slug.clone(),
            tenant_name: subscription.tenant_name.clone(),
            plan_code: subscription.plan_code.clone(),
            plan_name: subscription.plan_name.clone(),
            subscription_status: subscription.status.clone(),
            window_start,
            window_end,
            features,
        });
    }

    let feature_count = tenants.iter().map(|t| t.features.len()).sum();
    info!(
        tenant_count = tenants.len(),
        feature_count = feature_count,
        "Usage report assembled"
    );

    Ok(UsageReport {
        generated_at: Utc::now(),
        applied_period_start: derived_start,
        applied_period_end: derived_end,
        tenant_filters: request.tenant_slugs.clone(),
        plan_filters: request.plan_codes.clone(),
        feature_filters: request.feature_keys.clone(),
        warn_threshold: request.warn_threshold,
        include_inactive: request.include_inactive,
        tenant_count: tenants.len(),
        feature_count,
        tenants,
    })
}

/// Resolve the report-wide window: explicit request bounds win, otherwise
/// the earliest start and latest end across the matched subscriptions'
/// current billing periods.
fn resolve_report_window(
    request: &UsageReportRequest,
    subscriptions: &[SubscriptionRow],
) -> Window {
    let start = request
        .period_start
        .or_else(|| subscriptions.iter().filter_map(|s| s.current_period_start).min());
    let end = request
        .period_end
        .or_else(|| subscriptions.iter().filter_map(|s| s.current_period_end).max());
    normalize_window(start, end)
}

/// Resolve one subscription's effective window: request bounds, then the
/// subscription's own billing period, then the report-wide fallback.
fn resolve_subscription_window(
    request: &UsageReportRequest,
    subscription: &SubscriptionRow,
    derived_start: Option<DateTime<Utc>>,
    derived_end: Option<DateTime<Utc>>,
) -> Window {
    let start = request
        .period_start
        .or(subscription.current_period_start)
        .or(derived_start);
    let end = request
        .period_end
        .or(subscription.current_period_end)
        .or(derived_end);
    normalize_window(start, end)
}

/// Swap inverted bounds instead of rejecting them; open-ended windows pass
/// through untouched.
fn normalize_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Window {
    match (start, end) {
        (Some(s), Some(e)) if s > e => (Some(e), Some(s)),
        other => other,
    }
}

/// Group usage rows by (subscription, feature), keeping only rows that
/// overlap the subscription's effective window.
fn aggregate_usage(
    rows: &[UsageRow],
    windows: &HashMap<Uuid, Window>,
) -> HashMap<(Uuid, String), UsageAccumulator> {
    let mut usage: HashMap<(Uuid, String), UsageAccumulator> = HashMap::new();
    for row in rows {
        let Some(&(window_start, window_end)) = windows.get(&row.subscription_id) else {
            continue;
        };
        if !row_overlaps_window(row, window_start, window_end) {
            continue;
        }
        usage
            .entry((row.subscription_id, row.feature_key.clone()))
            .or_default()
            .absorb(row);
    }
    usage
}

/// A row is excluded only when it ends before the window opens or starts
/// after the window closes; rows touching a boundary count.
fn row_overlaps_window(
    row: &UsageRow,
    window_start: Option<DateTime<Utc>>,
    window_end: Option<DateTime<Utc>>,
) -> bool {
    if let Some(start) = window_start {
        if row.period_end < start {
            return false;
        }
    }
    if let Some(end) = window_end {
        if row.period_start > end {
            return false;
        }
    }
    true
}

/// Build the per-feature snapshots for one subscription: the union of the
/// plan's declared features and the features with recorded usage, sorted by
/// feature key.
fn build_feature_snapshots(
    subscription: &SubscriptionRow,
    plan_features: &HashMap<String, HashMap<String, PlanFeatureRow>>,
    usage: &HashMap<(Uuid, String), UsageAccumulator>,
    request: &UsageReportRequest,
) -> Vec<FeatureUsageSnapshot> {
    let declared = plan_features.get(&subscription.plan_code);

    let mut keys: BTreeSet<String> = declared
        .map(|features| features.keys().cloned().collect())
        .unwrap_or_default();
    for (subscription_id, feature_key) in usage.keys() {
        if *subscription_id == subscription.subscription_id {
            keys.insert(feature_key.clone());
        }
    }
    if !request.feature_keys.is_empty() {
        keys.retain(|key| request.feature_keys.contains(key));
    }

    keys.into_iter()
        .map(|feature_key| {
            let plan_feature = declared.and_then(|features| features.get(&feature_key));
            let accumulator = usage.get(&(subscription.subscription_id, feature_key.clone()));
            build_feature_snapshot(feature_key, plan_feature, accumulator, request.warn_threshold)
        })
        .collect()
}

fn build_feature_snapshot(
    feature_key: String,
    plan_feature: Option<&PlanFeatureRow>,
    accumulator: Option<&UsageAccumulator>,
    warn_threshold: f64,
) -> FeatureUsageSnapshot {
    let quantity = accumulator.map(|acc| acc.quantity).unwrap_or(0);
    let soft_limit = plan_feature.and_then(|f| f.soft_limit);
    let hard_limit = plan_feature.and_then(|f| f.hard_limit);

    let (status, approaching) = derive_status(quantity, soft_limit, hard_limit, warn_threshold);

    let display_name = plan_feature
        .and_then(|f| f.display_name.clone())
        .unwrap_or_else(|| feature_key.clone());

    FeatureUsageSnapshot {
        feature_key,
        display_name,
        unit: accumulator.and_then(|acc| acc.unit.clone()),
        quantity,
        soft_limit,
        hard_limit,
        remaining_to_soft_limit: remaining(soft_limit, quantity),
        remaining_to_hard_limit: remaining(hard_limit, quantity),
        percent_of_soft_limit: percent_of(soft_limit, quantity),
        percent_of_hard_limit: percent_of(hard_limit, quantity),
        status,
        approaching,
        usage_window_start: accumulator.and_then(|acc| acc.observed_start),
        usage_window_end: accumulator.and_then(|acc| acc.observed_end),
    }
}

/// Evaluate the guardrail precedence: hard breach, then soft breach, then
/// approaching, then ok. Limits are inclusive at the breach boundary.
fn derive_status(
    quantity: i64,
    soft_limit: Option<i64>,
    hard_limit: Option<i64>,
    warn_threshold: f64,
) -> (GuardrailStatus, bool) {
    if let Some(hard) = hard_limit {
        if quantity >= hard {
            return (GuardrailStatus::HardLimitExceeded, true);
        }
    }
    if let Some(soft) = soft_limit {
        if quantity >= soft {
            return (GuardrailStatus::SoftLimitExceeded, true);
        }
    }
    if let Some(active) = soft_limit.or(hard_limit) {
        if active != 0 && quantity as f64 / active as f64 >= warn_threshold {
            return (GuardrailStatus::Approaching, true);
        }
    }
    (GuardrailStatus::Ok, false)
}

/// Remaining headroom to a limit, clamped at zero; `None` when undeclared.
fn remaining(limit: Option<i64>, quantity: i64) -> Option<i64> {
    limit.map(|l| (l - quantity).max(0))
}

/// Percent of a limit consumed, rounded to two decimals; `None` when the
/// limit is undeclared or zero.
fn percent_of(limit: Option<i64>, quantity: i64) -> Option<f64> {
    match limit {
        Some(l) if l != 0 => Some(round2(quantity as f64 / l as f64 * 100.0)),
        _ => None,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn describe_filters(request: &UsageReportRequest) -> String {
    format!(
        "tenants={:?} plans={:?} features={:?} include_inactive={}",
        request.tenant_slugs, request.plan_codes, request.feature_keys, request.include_inactive
    )
}
