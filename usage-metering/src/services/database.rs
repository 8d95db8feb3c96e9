//! Database service for usage-metering.

use crate::models::{ArtifactFeature, PlanFeatureRow, SubscriptionRow, UsageReportRequest, UsageRow};
use chrono::{DateTime, Utc};
use ops_core::error::OpsError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Pool sizing for one-shot operator invocations.
const MAX_CONNECTIONS: u32 = 5;
const MIN_CONNECTIONS: u32 = 1;

/// Database connection pool wrapper. Every report or sync call opens its own
/// pool and closes it on exit, success or failure.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, OpsError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .min_connections(MIN_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| OpsError::Query(anyhow::anyhow!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool, releasing every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), OpsError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OpsError::Query(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Begin a transaction for the entitlement synchronizer.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, OpsError> {
        self.pool
            .begin()
            .await
            .map_err(|e| OpsError::Query(anyhow::anyhow!("Failed to begin transaction: {}", e)))
    }

    // =========================================================================
    // Report Projections
    // =========================================================================

    /// Fetch subscriptions joined to their tenant and plan, honoring the
    /// request filters, ordered by tenant slug then plan code.
    #[instrument(skip(self, request))]
    pub async fn fetch_subscriptions(
        &self,
        request: &UsageReportRequest,
    ) -> Result<Vec<SubscriptionRow>, OpsError> {
        let mut builder = QueryBuilder::new(
            "SELECT s.id AS subscription_id, \
                 t.id AS tenant_id, t.slug AS tenant_slug, t.name AS tenant_name, \
                 p.id AS plan_id, p.code AS plan_code, p.name AS plan_name, \
                 s.status, s.current_period_start, s.current_period_end \
             FROM tenant_subscriptions s \
             JOIN tenant_accounts t ON t.id = s.tenant_id \
             JOIN billing_plans p ON p.id = s.plan_id",
        );

        let mut has_where = false;
        if !request.include_inactive {
            builder.push(" WHERE s.status = ");
            builder.push_bind("active");
            has_where = true;
        }

        if !request.tenant_slugs.is_empty() {
            builder.push(if has_where { " AND t.slug IN (" } else { " WHERE t.slug IN (" });
            push_bind_list(&mut builder, &request.tenant_slugs);
            builder.push(")");
            has_where = true;
        }

        if !request.plan_codes.is_empty() {
            builder.push(if has_where { " AND p.code IN (" } else { " WHERE p.code IN (" });
            push_bind_list(&mut builder, &request.plan_codes);
            builder.push(")");
        }

        builder.push(" ORDER BY t.slug, p.code");

        let rows = builder
            .build_query_as::<SubscriptionRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OpsError::Query(anyhow::anyhow!("Failed to fetch subscriptions: {}", e)))?;

        info!(subscriptions = rows.len(), "Fetched subscriptions");
        Ok(rows)
    }

    /// Fetch metered plan features for the given plan codes, keyed by plan
    /// code then feature key. Issues no query when `plan_codes` is empty.
    #[instrument(skip_all, fields(plans = plan_codes.len()))]
    pub async fn fetch_plan_features(
        &self,
        plan_codes: &[String],
        feature_keys: &[String],
    ) -> Result<HashMap<String, HashMap<String, PlanFeatureRow>>, OpsError> {
        if plan_codes.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder = QueryBuilder::new(
            "SELECT p.code AS plan_code, f.feature_key, f.display_name, \
                 f.soft_limit, f.hard_limit, f.is_metered \
             FROM plan_features f \
             JOIN billing_plans p ON p.id = f.plan_id \
             WHERE f.is_metered = TRUE AND p.code IN (",
        );
        push_bind_list(&mut builder, plan_codes);
        builder.push(")");

        if !feature_keys.is_empty() {
            builder.push(" AND f.feature_key IN (");
            push_bind_list(&mut builder, feature_keys);
            builder.push(")");
        }

        let rows = builder
            .build_query_as::<PlanFeatureRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OpsError::Query(anyhow::anyhow!("Failed to fetch plan features: {}", e)))?;

        let mut by_plan: HashMap<String, HashMap<String, PlanFeatureRow>> = HashMap::new();
        for row in rows {
            by_plan
                .entry(row.plan_code.clone())
                .or_default()
                .insert(row.feature_key.clone(), row);
        }
        Ok(by_plan)
    }

    /// Fetch usage rows for the given subscriptions. The optional period
    /// bounds are applied as a coarse overlap pre-filter; exact per-
    /// subscription window checks happen during aggregation. Issues no query
    /// when `subscription_ids` is empty.
    #[instrument(skip_all, fields(subscriptions = subscription_ids.len()))]
    pub async fn fetch_usage_rows(
        &self,
        subscription_ids: &[Uuid],
        feature_keys: &[String],
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<UsageRow>, OpsError> {
        if subscription_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::new(
            "SELECT u.subscription_id, u.feature_key, u.unit, u.quantity, \
                 u.period_start, u.period_end \
             FROM subscription_usage u \
             WHERE u.subscription_id IN (",
        );
        push_bind_list(&mut builder, subscription_ids);
        builder.push(")");

        if !feature_keys.is_empty() {
            builder.push(" AND u.feature_key IN (");
            push_bind_list(&mut builder, feature_keys);
            builder.push(")");
        }

        if let Some(start) = period_start {
            builder.push(" AND u.period_end >= ");
            builder.push_bind(start);
        }
        if let Some(end) = period_end {
            builder.push(" AND u.period_start <= ");
            builder.push_bind(end);
        }

        builder.push(" ORDER BY u.period_start, u.id");

        let rows = builder
            .build_query_as::<UsageRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OpsError::Query(anyhow::anyhow!("Failed to fetch usage rows: {}", e)))?;

        info!(usage_rows = rows.len(), "Fetched usage rows");
        Ok(rows)
    }
}

/// Append one uniquely numbered bind per value; values are always bound,
/// never interpolated into the SQL text.
fn push_bind_list<'args, T>(builder: &mut QueryBuilder<'args, Postgres>, values: &[T])
where
    T: 'args + sqlx::Encode<'args, Postgres> + sqlx::Type<Postgres> + Send + Clone,
{
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
}

// =============================================================================
// Synchronizer Statements
// =============================================================================

/// Resolve a billing plan id by exact, case-sensitive code.
pub(crate) async fn plan_id_by_code(
    conn: &mut PgConnection,
    code: &str,
) -> Result<Option<Uuid>, OpsError> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM billing_plans WHERE code = $1")
        .bind(code)
        .fetch_optional(conn)
        .await
        .map_err(|e| OpsError::Query(anyhow::anyhow!("Failed to look up plan '{}': {}", code, e)))
}

/// Fetch the persisted features of one plan, keyed by feature key.
pub(crate) async fn plan_features_by_key(
    conn: &mut PgConnection,
    plan_id: Uuid,
) -> Result<HashMap<String, PlanFeatureRow>, OpsError> {
    let rows = sqlx::query_as::<_, PlanFeatureRow>(
        "SELECT p.code AS plan_code, f.feature_key, f.display_name, \
             f.soft_limit, f.hard_limit, f.is_metered \
         FROM plan_features f \
         JOIN billing_plans p ON p.id = f.plan_id \
         WHERE f.plan_id = $1",
    )
    .bind(plan_id)
    .fetch_all(conn)
    .await
    .map_err(|e| OpsError::Query(anyhow::anyhow!("Failed to fetch plan features: {}", e)))?;

    Ok(rows.into_iter().map(|row| (row.feature_key.clone(), row)).collect())
}

/// Insert one plan feature from its artifact declaration.
pub(crate) async fn insert_plan_feature(
    conn: &mut PgConnection,
    plan_id: Uuid,
    feature: &ArtifactFeature,
) -> Result<(), OpsError> {
    sqlx::query(
        "INSERT INTO plan_features \
             (id, plan_id, feature_key, display_name, hard_limit, soft_limit, is_metered) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(plan_id)
    .bind(&feature.feature_key)
    .bind(&feature.display_name)
    .bind(feature.hard_limit)
    .bind(feature.soft_limit)
    .bind(feature.is_metered)
    .execute(conn)
    .await
    .map_err(|e| {
        OpsError::Query(anyhow::anyhow!(
            "Failed to insert plan feature '{}': {}",
            feature.feature_key,
            e
        ))
    })?;
    Ok(())
}

/// Overwrite the synchronized columns of one plan feature.
pub(crate) async fn update_plan_feature(
    conn: &mut PgConnection,
    plan_id: Uuid,
    feature: &ArtifactFeature,
) -> Result<(), OpsError> {
    sqlx::query(
        "UPDATE plan_features \
         SET display_name = $3, hard_limit = $4, soft_limit = $5, is_metered = $6 \
         WHERE plan_id = $1 AND feature_key = $2",
    )
    .bind(plan_id)
    .bind(&feature.feature_key)
    .bind(&feature.display_name)
    .bind(feature.hard_limit)
    .bind(feature.soft_limit)
    .bind(feature.is_metered)
    .execute(conn)
    .await
    .map_err(|e| {
        OpsError::Query(anyhow::anyhow!(
            "Failed to update plan feature '{}': {}",
            feature.feature_key,
            e
        ))
    })?;
    Ok(())
}

/// Delete one plan feature no longer declared by the artifact.
pub(crate) async fn delete_plan_feature(
    conn: &mut PgConnection,
    plan_id: Uuid,
    feature_key: &str,
) -> Result<(), OpsError> {
    sqlx::query("DELETE FROM plan_features WHERE plan_id = $1 AND feature_key = $2")
        .bind(plan_id)
        .bind(feature_key)
        .execute(conn)
        .await
        .map_err(|e| {
            OpsError::Query(anyhow::anyhow!(
                "Failed to prune plan feature '{}': {}",
                feature_key,
                e
            ))
        })?;
    Ok(())
}
