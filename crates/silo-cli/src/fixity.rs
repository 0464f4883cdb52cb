//! Fixity reports and passes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use silo_catalog::SiloState;
use silo_config::{log_cli_info, log_fixity_warn};
use silo_engine::report::to_csv;
use silo_engine::scratch::{clean_scratch, restore_to_scratch};
use silo_engine::{FixityReconciler, PoolFixity};

use crate::pool::Pool;

#[derive(Args, Debug)]
pub struct SiloArgs {
    pub silo: String,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    pub silo: String,
    /// One package instead of the whole silo
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct PoolFixityArgs {
    /// CSV rows instead of JSON
    #[arg(long)]
    pub csv: bool,

    /// Only packages stored before this time (RFC 3339)
    #[arg(long)]
    pub stored_before: Option<DateTime<Utc>>,
}

pub fn report(pool: &Pool, args: ReportArgs) -> Result<()> {
    let silo = pool.resolver().lookup(&args.silo)?;
    let report = silo.fixity_report(args.name.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn reconciler(pool: &Pool) -> FixityReconciler {
    FixityReconciler::from_config(pool.catalog.clone(), pool.clock.clone(), &pool.config.fixity)
}

/// Tape silos are compared through a full restore onto the scratch disk.
pub fn reconcile(pool: &Pool, args: SiloArgs) -> Result<()> {
    let record = pool.record(&args.silo)?;
    let report = if record.state == SiloState::TapeMaster {
        let scratch = pool
            .config
            .fixity
            .scratch_dir
            .as_ref()
            .context("fixity.scratch_dir must be set to reconcile a tape silo")?;
        let agent = pool.tape_agent();
        let restored = restore_to_scratch(
            &agent,
            &record.key.filesystem,
            scratch,
            pool.config.fixity.restore_timeout(),
        )?;
        let report = reconciler(pool).reconcile(&record.key, &restored);
        let removed = clean_scratch(restored.root())?;
        log_cli_info!("scratch cleaned", directories = removed);
        report?
    } else {
        let store = pool.disk_silo(&record)?.physical_store()?;
        reconciler(pool).reconcile(&record.key, &store)?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

pub fn verify(pool: &Pool, args: SiloArgs) -> Result<()> {
    let silo = pool.resolver().lookup(&args.silo)?;
    let report = reconciler(pool).verify(silo.key(), silo.fixity_source())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success {
        let name = report.silo.as_str();
        log_fixity_warn!("verification found failures", silo = name, failures = report.failures.len());
        std::process::exit(1);
    }
    Ok(())
}

pub fn pool_fixity(pool: &Pool, args: PoolFixityArgs) -> Result<()> {
    let fixity = PoolFixity::new(pool.catalog.as_ref(), &pool.hostname);
    if args.csv {
        print!("{}", to_csv(&fixity.list(args.stored_before)?));
        return Ok(());
    }
    let summary = fixity.summary(args.stored_before)?;
    let lines = fixity.list(args.stored_before)?;
    let body = serde_json::json!({ "summary": summary, "packages": lines });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
