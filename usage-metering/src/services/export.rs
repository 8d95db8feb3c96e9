//! Report export: nested JSON and a flattened CSV projection.

use crate::models::{FeatureUsageSnapshot, TenantUsageSnapshot, UsageReport};
use chrono::{DateTime, Utc};
use ops_core::error::OpsError;
use std::fs;
use std::path::Path;
use tracing::info;

/// Canonical CSV columns, one row per tenant and feature. The header is
/// written even when the report contains no rows.
const CSV_COLUMNS: [&str; 22] = [
    "tenant_id",
    "tenant_slug",
    "tenant_name",
    "plan_code",
    "plan_name",
    "subscription_status",
    "window_start",
    "window_end",
    "feature_key",
    "display_name",
    "unit",
    "quantity",
    "soft_limit",
    "hard_limit",
    "remaining_to_soft_limit",
    "remaining_to_hard_limit",
    "percent_of_soft_limit",
    "percent_of_hard_limit",
    "status",
    "approaching",
    "usage_window_start",
    "usage_window_end",
];

/// Write the report to the requested paths; `None` paths are skipped.
/// Parent directories are created as needed.
pub fn export_report(
    report: &UsageReport,
    json_path: Option<&Path>,
    csv_path: Option<&Path>,
) -> Result<(), OpsError> {
    if let Some(path) = json_path {
        write_file(path, &report_to_json(report)?)?;
        info!(path = %path.display(), "Report JSON written");
    }
    if let Some(path) = csv_path {
        write_file(path, &report_to_csv(report))?;
        info!(path = %path.display(), "Report CSV written");
    }
    Ok(())
}

/// Render the full nested report document.
pub fn report_to_json(report: &UsageReport) -> Result<String, OpsError> {
    serde_json::to_string_pretty(report)
        .map_err(|e| OpsError::Internal(anyhow::anyhow!("Failed to encode report JSON: {}", e)))
}

/// Render the flattened CSV projection.
pub fn report_to_csv(report: &UsageReport) -> String {
    let mut csv = CSV_COLUMNS.join(",");
    csv.push('\n');
    for tenant in &report.tenants {
        for feature in &tenant.features {
            csv.push_str(&csv_row(tenant, feature));
            csv.push('\n');
        }
    }
    csv
}

fn csv_row(tenant: &TenantUsageSnapshot, feature: &FeatureUsageSnapshot) -> String {
    [
        tenant.tenant_id.to_string(),
        csv_field(&tenant.tenant_slug),
        csv_field(&tenant.tenant_name),
        csv_field(&tenant.plan_code),
        csv_field(&tenant.plan_name),
        csv_field(&tenant.subscription_status),
        format_timestamp(tenant.window_start),
        format_timestamp(tenant.window_end),
        csv_field(&feature.feature_key),
        csv_field(&feature.display_name),
        feature.unit.as_deref().map(csv_field).unwrap_or_default(),
        feature.quantity.to_string(),
        format_optional(feature.soft_limit),
        format_optional(feature.hard_limit),
        format_optional(feature.remaining_to_soft_limit),
        format_optional(feature.remaining_to_hard_limit),
        format_optional(feature.percent_of_soft_limit),
        format_optional(feature.percent_of_hard_limit),
        feature.status.as_str().to_string(),
        feature.approaching.to_string(),
        format_timestamp(feature.usage_window_start),
        format_timestamp(feature.usage_window_end),
    ]
    .join(",")
}

/// Quote a field when it contains a comma, quote, or newline; embedded
/// quotes are doubled.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn format_timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map(|v| v.to_rfc3339()).unwrap_or_default()
}

fn format_optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write content to a path, creating missing parent directories first.
fn write_file(path: &Path, content: &str) -> Result<(), OpsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)?;
    Ok(())
}
