//! Entitlement synchronization options and results.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Options for one sync invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Restrict the sync to these plan codes, matched case-insensitively
    /// against the artifact; empty means every declared plan.
    pub plan_codes: Vec<String>,
    /// Delete persisted plan features absent from the artifact.
    pub prune_missing: bool,
    /// Compute and report the diff, then roll everything back.
    pub dry_run: bool,
    /// Proceed even when the artifact is marked disabled.
    pub allow_disabled: bool,
}

/// Insert/update/prune counts for one plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSyncResult {
    pub plan_code: String,
    pub inserted: u32,
    pub updated: u32,
    pub pruned: u32,
}

/// Outcome of one sync invocation.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEntitlementSyncResult {
    pub artifact_path: String,
    pub artifact_generated_at: DateTime<Utc>,
    pub dry_run: bool,
    pub plans: Vec<PlanSyncResult>,
}
