//! Tar archives, loose or stored as packages.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use silo_engine::PackageArchive;
use silo_tar::TarReader;

use crate::pool::Pool;

#[derive(Subcommand, Debug)]
pub enum TarCommand {
    /// List the regular files in an archive
    List {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },

    /// Write one member to stdout
    Cat {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
        member: String,
    },
}

pub fn run(command: TarCommand) -> Result<()> {
    match command {
        TarCommand::List { archive } => {
            let reader = TarReader::open(&archive).with_context(|| format!("cannot read {}", archive.display()))?;
            for entry in reader.entries() {
                println!("{:>12} {:o} {}", entry.size, entry.mode, entry.name);
            }
            Ok(())
        }
        TarCommand::Cat { archive, member } => {
            let mut reader =
                TarReader::open(&archive).with_context(|| format!("cannot read {}", archive.display()))?;
            let entry = reader
                .find(&member)
                .with_context(|| format!("{} has no member {}", archive.display(), member))?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut reader.member(&entry), &mut out)?;
            out.flush()?;
            Ok(())
        }
    }
}

#[derive(Args, Debug)]
pub struct MemberArgs {
    pub silo: String,
    pub package: String,

    /// File inside the package; lists the package's files when omitted
    pub path: Option<String>,
}

/// Read inside a stored package, restoring it from tape when needed.
pub fn member(pool: &Pool, args: MemberArgs) -> Result<()> {
    let silo = pool.resolver().lookup(&args.silo)?;
    let Some(mut archive) = PackageArchive::open(&*silo, &args.package)? else {
        bail!("package {} is not in silo {}", args.package, silo.key());
    };

    let Some(path) = args.path else {
        for entry in archive.entries() {
            println!("{:>12} {:o} {}", entry.size, entry.mode, entry.name);
        }
        return Ok(());
    };
    let Some(mut member) = archive.member(&path) else {
        bail!("package {} has no file {}", args.package, path);
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut member, &mut out)?;
    out.flush()?;
    Ok(())
}
