//! # silopool CLI
//!
//! Operator interface to a host's storage pool: silo administration,
//! package transfer, fixity passes and archive inspection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use silo_config::logging::{init_logging, LogLevel};
use silo_config::Config;

mod archive;
mod fixity;
mod packages;
mod pool;
mod silos;

use pool::Pool;

/// silopool - pooled disk and tape storage for preservation packages
#[derive(Parser, Debug)]
#[command(name = "silopool")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Read settings from this file instead of the standard locations
    #[arg(long, global = true, env = "SILOPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register and administer silos
    Silo {
        #[command(subcommand)]
        command: silos::SiloCommand,
    },

    /// Store a file as a package in the best-fitting disk silo
    Put(packages::PutArgs),

    /// Write a package's bytes to a file or stdout
    Get(packages::GetArgs),

    /// Delete a package from a silo
    Delete(packages::PackageArgs),

    /// Check whether a package is stored and cataloged
    Exists(packages::PackageArgs),

    /// Fixity history of a silo or one package, as JSON
    Report(fixity::ReportArgs),

    /// Compare a silo's directory with its catalog rows
    Reconcile(fixity::SiloArgs),

    /// Recompute checksums of every package in a silo
    Verify(fixity::SiloArgs),

    /// Latest fixity of every package on this host
    PoolFixity(fixity::PoolFixityArgs),

    /// List or read the files inside a stored package
    Member(archive::MemberArgs),

    /// Inspect tar archives
    Tar {
        #[command(subcommand)]
        command: archive::TarCommand,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file locations
    Path,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("cannot read {}", path.display())),
        None => Config::load().context("cannot load configuration"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        config.logging.level.parse().unwrap_or(LogLevel::Info)
    };
    init_logging(level);

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommand::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigCommand::Path => {
                match Config::global_config_path() {
                    Some(path) => println!("Global:  {}", path.display()),
                    None => println!("Global:  (no home directory)"),
                }
                println!("Project: .silopool/config.toml");
                Ok(())
            }
        },
        Commands::Tar { command } => archive::run(command),
        command => {
            let pool = Pool::open(config)?;
            match command {
                Commands::Silo { command } => silos::run(&pool, command),
                Commands::Put(args) => packages::put(&pool, args),
                Commands::Get(args) => packages::get(&pool, args),
                Commands::Delete(args) => packages::delete(&pool, args),
                Commands::Exists(args) => packages::exists(&pool, args),
                Commands::Report(args) => fixity::report(&pool, args),
                Commands::Reconcile(args) => fixity::reconcile(&pool, args),
                Commands::Verify(args) => fixity::verify(&pool, args),
                Commands::PoolFixity(args) => fixity::pool_fixity(&pool, args),
                Commands::Member(args) => archive::member(&pool, args),
                Commands::Tar { .. } | Commands::Config { .. } => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_silo_state_change() {
        let cli = Cli::try_parse_from(["silopool", "silo", "state", "001", "disk_idling"]).unwrap();
        match cli.command {
            Commands::Silo {
                command: silos::SiloCommand::State { silo, state },
            } => {
                assert_eq!(silo, "001");
                assert_eq!(state, Some(silo_catalog::SiloState::DiskIdling));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_method() {
        assert!(Cli::try_parse_from(["silopool", "silo", "allow", "001", "patch"]).is_err());
        assert!(Cli::try_parse_from(["silopool", "silo", "allow", "001", "post"]).is_ok());
    }

    #[test]
    fn test_parse_pool_fixity_flags() {
        let cli = Cli::try_parse_from(["silopool", "pool-fixity", "--csv", "--stored-before", "2011-06-01T00:00:00Z"])
            .unwrap();
        match cli.command {
            Commands::PoolFixity(args) => {
                assert!(args.csv);
                assert!(args.stored_before.is_some());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
