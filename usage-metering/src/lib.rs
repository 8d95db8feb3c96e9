//! usage-metering: per-tenant usage reports measured against plan limits,
//! and idempotent synchronization of a declarative entitlement artifact into
//! the `plan_features` table.

pub mod config;
pub mod models;
pub mod services;
