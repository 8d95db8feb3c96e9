//! Service layer for usage-metering.

pub mod database;
pub mod export;
pub mod report;
pub mod sync;

pub use database::Database;
pub use export::{export_report, report_to_csv, report_to_json};
pub use report::generate_report;
pub use sync::{load_artifact, sync_usage_entitlements};
