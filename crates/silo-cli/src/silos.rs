//! Silo registration, lifecycle and method permissions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use silo_catalog::{Method, SiloRecord, SiloState};
use silo_config::log_cli_info;
use silo_engine::lifecycle::effective_methods;
use silo_engine::DiskSilo;

use crate::pool::Pool;

#[derive(Subcommand, Debug)]
pub enum SiloCommand {
    /// Register an existing directory as a disk silo of this host
    Create {
        #[arg(value_name = "DIR")]
        directory: PathBuf,
    },

    /// List this host's silos
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show a silo's state and the states it may move to, or move it
    State {
        silo: String,
        /// disk_master, disk_idling or tape_master
        state: Option<SiloState>,
    },

    /// Re-allow a method the silo's state supports
    Allow { silo: String, method: Method },

    /// Forbid a method until the next state change
    Forbid { silo: String, method: Method },

    /// Restrict a silo to reads
    Retire { silo: String },

    /// Lift a retirement
    Reactivate { silo: String },
}

pub fn run(pool: &Pool, command: SiloCommand) -> Result<()> {
    match command {
        SiloCommand::Create { directory } => {
            let directory = directory
                .canonicalize()
                .with_context(|| format!("cannot resolve {}", directory.display()))?;
            let silo = DiskSilo::create(pool.catalog.clone(), pool.clock.clone(), &pool.hostname, &directory)?;
            let key = silo_engine::Silo::key(&silo).to_string();
            log_cli_info!("silo registered", silo = key.as_str());
            println!("{}", key);
            Ok(())
        }
        SiloCommand::List { json } => list(pool, json),
        SiloCommand::State { silo, state } => {
            let silo = pool.resolver().lookup(&silo)?;
            if let Some(state) = state {
                silo.set_state(state)?;
            }
            let current = silo.state()?;
            let allowed: Vec<String> = silo.allowed_states()?.iter().map(|s| s.to_string()).collect();
            println!("{} {}", silo.key(), current);
            println!("allowed: {}", allowed.join(", "));
            Ok(())
        }
        SiloCommand::Allow { silo, method } => {
            pool.resolver().lookup(&silo)?.allow(method)?;
            Ok(())
        }
        SiloCommand::Forbid { silo, method } => {
            pool.resolver().lookup(&silo)?.forbid(method)?;
            Ok(())
        }
        SiloCommand::Retire { silo } => {
            pool.resolver().lookup(&silo)?.retire()?;
            Ok(())
        }
        SiloCommand::Reactivate { silo } => {
            pool.resolver().lookup(&silo)?.reactivate()?;
            Ok(())
        }
    }
}

fn methods(record: &SiloRecord) -> String {
    effective_methods(record)
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn list(pool: &Pool, json: bool) -> Result<()> {
    let records = pool.resolver().records()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for record in &records {
        let count = pool
            .catalog
            .count_packages(&record.key, &silo_catalog::PackageQuery::extant_only())?;
        println!(
            "{:<32} {:<12} {:<20} {:>8}{}",
            record.key.filesystem.display(),
            record.state,
            methods(record),
            count,
            if record.retired { "  retired" } else { "" }
        );
    }
    Ok(())
}
