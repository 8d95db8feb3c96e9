//! Entitlement synchronization: load a declarative artifact and reconcile
//! the `plan_features` table against it.
//!
//! Every selected plan is processed inside one transaction; a failure on any
//! plan rolls the whole invocation back. Dry runs compute the full diff and
//! roll back unconditionally. Nothing serializes concurrent invocations
//! beyond that transaction.

use crate::models::{
    ArtifactFeature, ArtifactPlan, EntitlementArtifact, PlanFeatureRow, PlanSyncResult,
    SyncOptions, UsageEntitlementSyncResult,
};
use crate::services::database::{self, Database};
use ops_core::error::OpsError;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, instrument};
use validator::Validate;

/// Load, parse, and schema-validate an entitlement artifact.
///
/// A disabled artifact (`"enabled": false`) is the producer's kill switch
/// against applying stale exports; it is refused unless `allow_disabled`.
pub fn load_artifact(path: &Path, allow_disabled: bool) -> Result<EntitlementArtifact, OpsError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        OpsError::Artifact(anyhow::anyhow!("Failed to read artifact {}: {}", path.display(), e))
    })?;

    let artifact: EntitlementArtifact = serde_json::from_str(&raw).map_err(|e| {
        OpsError::Artifact(anyhow::anyhow!("Invalid artifact JSON in {}: {}", path.display(), e))
    })?;

    artifact.validate().map_err(|e| {
        OpsError::Artifact(anyhow::anyhow!(
            "Artifact {} failed schema validation: {}",
            path.display(),
            e
        ))
    })?;

    if !artifact.enabled && !allow_disabled {
        return Err(OpsError::Artifact(anyhow::anyhow!(
            "Artifact {} is disabled; pass --allow-disabled to apply it anyway",
            path.display()
        )));
    }

    Ok(artifact)
}

/// Synchronize the artifact's declared features into `plan_features`.
///
/// Opens its own connection pool and closes it on every exit path. The
/// returned per-plan counts reflect the computed diff even on a dry run.
#[instrument(skip(database_url, artifact_path, options), fields(
    dry_run = options.dry_run,
    prune_missing = options.prune_missing,
))]
pub async fn sync_usage_entitlements(
    database_url: &str,
    artifact_path: &Path,
    options: &SyncOptions,
) -> Result<UsageEntitlementSyncResult, OpsError> {
    let artifact = load_artifact(artifact_path, options.allow_disabled)?;
    let plans = select_plans(&artifact, &options.plan_codes)?;

    let db = Database::connect(database_url).await?;
    let result = apply_plans(&db, &plans, options).await;
    db.close().await;
    let plan_results = result?;

    info!(
        plans = plan_results.len(),
        dry_run = options.dry_run,
        "Entitlement sync finished"
    );

    Ok(UsageEntitlementSyncResult {
        artifact_path: artifact_path.display().to_string(),
        artifact_generated_at: artifact.generated_at,
        dry_run: options.dry_run,
        plans: plan_results,
    })
}

/// Filter the artifact's plans down to the requested codes, matched
/// case-insensitively after deduplication. An empty filter selects every
/// declared plan; a filter matching none of them is an error.
fn select_plans<'a>(
    artifact: &'a EntitlementArtifact,
    plan_codes: &[String],
) -> Result<Vec<&'a ArtifactPlan>, OpsError> {
    if plan_codes.is_empty() {
        return Ok(artifact.plans.iter().collect());
    }

    let mut wanted: Vec<String> = plan_codes.iter().map(|code| code.to_lowercase()).collect();
    wanted.sort();
    wanted.dedup();

    let selected: Vec<&ArtifactPlan> = artifact
        .plans
        .iter()
        .filter(|plan| wanted.contains(&plan.plan_code.to_lowercase()))
        .collect();

    if selected.is_empty() {
        return Err(OpsError::EmptyFilter(wanted.join(", ")));
    }
    Ok(selected)
}

async fn apply_plans(
    db: &Database,
    plans: &[&ArtifactPlan],
    options: &SyncOptions,
) -> Result<Vec<PlanSyncResult>, OpsError> {
    let mut tx = db.begin().await?;

    match sync_plans(&mut tx, plans, options).await {
        Ok(results) => {
            if options.dry_run {
                tx.rollback().await.map_err(|e| {
                    OpsError::Query(anyhow::anyhow!("Failed to roll back dry run: {}", e))
                })?;
            } else {
                tx.commit().await.map_err(|e| {
                    OpsError::Query(anyhow::anyhow!("Failed to commit transaction: {}", e))
                })?;
            }
            Ok(results)
        }
        Err(e) => {
            tx.rollback().await.ok();
            Err(e)
        }
    }
}

async fn sync_plans(
    tx: &mut Transaction<'static, Postgres>,
    plans: &[&ArtifactPlan],
    options: &SyncOptions,
) -> Result<Vec<PlanSyncResult>, OpsError> {
    let mut results = Vec::with_capacity(plans.len());
    for plan in plans {
        results.push(sync_plan(tx, plan, options).await?);
    }
    Ok(results)
}

/// Reconcile one plan: diff the artifact's declarations against the
/// persisted rows, then apply inserts, updates, and (when opted in) prunes.
async fn sync_plan(
    tx: &mut Transaction<'static, Postgres>,
    plan: &ArtifactPlan,
    options: &SyncOptions,
) -> Result<PlanSyncResult, OpsError> {
    let plan_id = database::plan_id_by_code(&mut **tx, &plan.plan_code)
        .await?
        .ok_or_else(|| OpsError::UnknownPlan(plan.plan_code.clone()))?;

    let existing = database::plan_features_by_key(&mut **tx, plan_id).await?;
    let diff = diff_plan_features(&existing, &plan.features, options.prune_missing);

    if !options.dry_run {
        for feature in &diff.inserts {
            database::insert_plan_feature(&mut **tx, plan_id, feature).await?;
        }
        for feature in &diff.updates {
            database::update_plan_feature(&mut **tx, plan_id, feature).await?;
        }
        for feature_key in &diff.prunes {
            database::delete_plan_feature(&mut **tx, plan_id, feature_key).await?;
        }
    }

    info!(
        plan_code = %plan.plan_code,
        inserted = diff.inserts.len(),
        updated = diff.updates.len(),
        pruned = diff.prunes.len(),
        "Plan features reconciled"
    );

    Ok(PlanSyncResult {
        plan_code: plan.plan_code.clone(),
        inserted: diff.inserts.len() as u32,
        updated: diff.updates.len() as u32,
        pruned: diff.prunes.len() as u32,
    })
}

/// Planned mutations for one plan.
#[derive(Debug, Default)]
struct PlanFeatureDiff<'a> {
    inserts: Vec<&'a ArtifactFeature>,
    updates: Vec<&'a ArtifactFeature>,
    prunes: Vec<String>,
}

/// Compare the artifact's declarations against the persisted rows, keyed by
/// exact feature key.
fn diff_plan_features<'a>(
    existing: &HashMap<String, PlanFeatureRow>,
    desired: &'a [ArtifactFeature],
    prune_missing: bool,
) -> PlanFeatureDiff<'a> {
    let mut diff = PlanFeatureDiff::default();

    for feature in desired {
        match existing.get(&feature.feature_key) {
            None => diff.inserts.push(feature),
            Some(row) if feature_changed(row, feature) => diff.updates.push(feature),
            Some(_) => {}
        }
    }

    if prune_missing {
        for feature_key in existing.keys() {
            if !desired.iter().any(|f| f.feature_key == *feature_key) {
                diff.prunes.push(feature_key.clone());
            }
        }
        diff.prunes.sort();
    }

    diff
}

/// Change detection over the synchronized columns only.
fn feature_changed(row: &PlanFeatureRow, feature: &ArtifactFeature) -> bool {
    row.display_name.as_deref() != Some(feature.display_name.as_str())
        || row.hard_limit != feature.hard_limit
        || row.soft_limit != feature.soft_limit
        || row.is_metered != feature.is_metered
}
