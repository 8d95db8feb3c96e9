//! usage-metering CLI entry point.

use std::path::PathBuf;
use std::process;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use ops_core::error::OpsError;
use ops_core::observability::init_tracing;

use usage_metering::config::MeteringConfig;
use usage_metering::models::{SyncOptions, UsageReportRequest, DEFAULT_WARN_THRESHOLD};
use usage_metering::services::{
    export_report, generate_report, report_to_json, sync_usage_entitlements, Database,
};

/// Usage metering and entitlement synchronization for tenant operations
#[derive(Debug, Parser)]
#[command(name = "usage-metering", version, about, long_about = None)]
struct Cli {
    /// Database connection string (defaults to DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate a per-tenant usage report measured against plan limits
    Report(ReportArgs),
    /// Synchronize an entitlement artifact into plan features
    SyncEntitlements(SyncArgs),
    /// Apply the bundled schema migrations
    Migrate,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Count usage from this instant (RFC 3339)
    #[arg(long)]
    period_start: Option<DateTime<Utc>>,

    /// Count usage up to this instant (RFC 3339)
    #[arg(long)]
    period_end: Option<DateTime<Utc>>,

    /// Restrict the report to a tenant slug (repeatable)
    #[arg(long = "tenant")]
    tenants: Vec<String>,

    /// Restrict the report to a plan code (repeatable)
    #[arg(long = "plan")]
    plans: Vec<String>,

    /// Restrict the report to a feature key (repeatable)
    #[arg(long = "feature")]
    features: Vec<String>,

    /// Include non-active subscriptions
    #[arg(long)]
    include_inactive: bool,

    /// Fraction of the active limit that flags a feature as approaching
    #[arg(long, default_value_t = DEFAULT_WARN_THRESHOLD, value_parser = parse_warn_threshold)]
    warn_threshold: f64,

    /// Write the report as nested JSON to this path
    #[arg(long)]
    json_out: Option<PathBuf>,

    /// Write the report as flattened CSV to this path
    #[arg(long)]
    csv_out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Path to the entitlement artifact JSON
    artifact: PathBuf,

    /// Restrict the sync to a plan code (repeatable, case-insensitive)
    #[arg(long = "plan")]
    plans: Vec<String>,

    /// Delete plan features absent from the artifact
    #[arg(long)]
    prune_missing: bool,

    /// Compute and print the diff without persisting it
    #[arg(long)]
    dry_run: bool,

    /// Apply the artifact even when it is marked disabled
    #[arg(long)]
    allow_disabled: bool,
}

fn parse_warn_threshold(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("not a number: {}", e))?;
    if !(0.0..=1.0).contains(&value) {
        return Err("must be between 0 and 1".to_string());
    }
    Ok(value)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match MeteringConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    init_tracing(&config.common.log_level);

    if let Err(e) = run(cli, config).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli, config: MeteringConfig) -> Result<(), OpsError> {
    let database_url = cli.database_url.or(config.database_url).ok_or_else(|| {
        OpsError::Config(anyhow::anyhow!(
            "DATABASE_URL is not set and --database-url was not given"
        ))
    })?;

    match cli.command {
        Commands::Report(args) => {
            let request = UsageReportRequest {
                database_url,
                period_start: args.period_start,
                period_end: args.period_end,
                tenant_slugs: args.tenants,
                plan_codes: args.plans,
                feature_keys: args.features,
                include_inactive: args.include_inactive,
                warn_threshold: args.warn_threshold,
            };

            let report = generate_report(&request).await?;
            export_report(&report, args.json_out.as_deref(), args.csv_out.as_deref())?;
            println!("{}", report_to_json(&report)?);
        }
        Commands::SyncEntitlements(args) => {
            let options = SyncOptions {
                plan_codes: args.plans,
                prune_missing: args.prune_missing,
                dry_run: args.dry_run,
                allow_disabled: args.allow_disabled,
            };

            let result = sync_usage_entitlements(&database_url, &args.artifact, &options).await?;
            let rendered = serde_json::to_string_pretty(&result)
                .map_err(|e| OpsError::Internal(anyhow::anyhow!("Failed to render result: {}", e)))?;
            println!("{}", rendered);
        }
        Commands::Migrate => {
            let db = Database::connect(&database_url).await?;
            let result = db.run_migrations().await;
            db.close().await;
            result?;
            println!("Migrations applied");
        }
    }

    Ok(())
}
