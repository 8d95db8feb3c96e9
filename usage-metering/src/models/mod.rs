//! Domain models for usage-metering.

mod artifact;
mod report;
mod request;
mod row;
mod sync;

pub use artifact::{ArtifactFeature, ArtifactPlan, EntitlementArtifact};
pub use report::{
    FeatureUsageSnapshot, GuardrailStatus, TenantUsageSnapshot, UsageAccumulator, UsageReport,
};
pub use request::{UsageReportRequest, DEFAULT_WARN_THRESHOLD};
pub use row::{PlanFeatureRow, SubscriptionRow, UsageRow};
pub use sync::{PlanSyncResult, SyncOptions, UsageEntitlementSyncResult};
