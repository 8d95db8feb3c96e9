//! Test helper module for usage-metering integration tests.
//!
//! Tests need a PostgreSQL instance reachable through TEST_DATABASE_URL;
//! each test gets its own schema for isolation.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use usage_metering::models::PlanFeatureRow;
use usage_metering::services::Database;
use uuid::Uuid;

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns true when no test database is configured.
pub fn should_skip() -> bool {
    std::env::var("TEST_DATABASE_URL").is_err()
}

/// Macro to skip database tests when TEST_DATABASE_URL is unset.
#[macro_export]
macro_rules! skip_if_no_database {
    () => {
        if common::should_skip() {
            eprintln!("Skipping test: TEST_DATABASE_URL is not set");
            return;
        }
    };
}

/// Get the database URL for testing from the environment.
pub fn get_test_database_url() -> String {
    std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set")
}

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_metering_{}_{}", std::process::id(), counter)
}

/// Shorthand for a UTC midnight timestamp.
pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// One isolated schema with the metering tables applied.
pub struct TestDb {
    /// DSN pinned to this test's schema via search_path.
    pub url: String,
    pub db: Database,
    schema_name: String,
}

impl TestDb {
    /// Create a schema, point a DSN at it, and run the migrations.
    pub async fn create() -> Self {
        let base_url = get_test_database_url();
        let schema_name = unique_schema_name();

        // Create schema for test isolation
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");
        pool.close().await;

        // Use ? or & depending on whether the URL already has parameters
        let separator = if base_url.contains('?') { "&" } else { "?" };
        let url = format!("{}{}options=-c search_path%3D{}", base_url, separator, schema_name);

        let db = Database::connect(&url).await.expect("Failed to connect to test schema");
        db.run_migrations().await.expect("Failed to run migrations");

        TestDb { url, db, schema_name }
    }

    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    /// Insert a tenant account, returning its id.
    pub async fn seed_tenant(&self, slug: &str, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO tenant_accounts (id, slug, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(slug)
            .bind(name)
            .execute(self.pool())
            .await
            .expect("Failed to seed tenant");
        id
    }

    /// Insert a billing plan, returning its id.
    pub async fn seed_plan(&self, code: &str, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO billing_plans (id, code, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(code)
            .bind(name)
            .execute(self.pool())
            .await
            .expect("Failed to seed plan");
        id
    }

    /// Insert a subscription, returning its id.
    pub async fn seed_subscription(
        &self,
        tenant_id: Uuid,
        plan_id: Uuid,
        status: &str,
        period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tenant_subscriptions \
                 (id, tenant_id, plan_id, status, current_period_start, current_period_end) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(plan_id)
        .bind(status)
        .bind(period.map(|p| p.0))
        .bind(period.map(|p| p.1))
        .execute(self.pool())
        .await
        .expect("Failed to seed subscription");
        id
    }

    /// Insert a plan feature declaration.
    pub async fn seed_plan_feature(
        &self,
        plan_id: Uuid,
        feature_key: &str,
        display_name: Option<&str>,
        soft_limit: Option<i64>,
        hard_limit: Option<i64>,
    ) {
        sqlx::query(
            "INSERT INTO plan_features \
                 (id, plan_id, feature_key, display_name, soft_limit, hard_limit, is_metered) \
             VALUES ($1, $2, $3, $4, $5, $6, TRUE)",
        )
        .bind(Uuid::new_v4())
        .bind(plan_id)
        .bind(feature_key)
        .bind(display_name)
        .bind(soft_limit)
        .bind(hard_limit)
        .execute(self.pool())
        .await
        .expect("Failed to seed plan feature");
    }

    /// Insert one usage interval.
    pub async fn seed_usage(
        &self,
        subscription_id: Uuid,
        feature_key: &str,
        unit: Option<&str>,
        quantity: i64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) {
        sqlx::query(
            "INSERT INTO subscription_usage \
                 (id, subscription_id, feature_key, unit, quantity, period_start, period_end) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(subscription_id)
        .bind(feature_key)
        .bind(unit)
        .bind(quantity)
        .bind(period_start)
        .bind(period_end)
        .execute(self.pool())
        .await
        .expect("Failed to seed usage");
    }

    /// Read back a plan's persisted features, ordered by feature key.
    pub async fn plan_features(&self, plan_id: Uuid) -> Vec<PlanFeatureRow> {
        sqlx::query_as::<_, PlanFeatureRow>(
            "SELECT p.code AS plan_code, f.feature_key, f.display_name, \
                 f.soft_limit, f.hard_limit, f.is_metered \
             FROM plan_features f \
             JOIN billing_plans p ON p.id = f.plan_id \
             WHERE f.plan_id = $1 \
             ORDER BY f.feature_key",
        )
        .bind(plan_id)
        .fetch_all(self.pool())
        .await
        .expect("Failed to fetch plan features")
    }

    /// Cleanup test resources (schema).
    pub async fn cleanup(&self) {
        self.db.close().await;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&get_test_database_url())
            .await
            .ok();
        if let Some(pool) = pool {
            sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema_name))
                .execute(&pool)
                .await
                .ok();
            pool.close().await;
        }
    }
}

/// Write an entitlement artifact document to `dir`, returning its path.
pub fn write_artifact(dir: &Path, document: &serde_json::Value) -> PathBuf {
    let path = dir.join("entitlements.json");
    std::fs::write(&path, serde_json::to_string_pretty(document).unwrap())
        .expect("Failed to write artifact");
    path
}
