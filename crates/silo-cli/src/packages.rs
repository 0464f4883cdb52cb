//! Package transfer commands.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use silo_config::log_cli_info;
use silo_engine::PackageCheck;

use crate::pool::Pool;

#[derive(Args, Debug)]
pub struct PutArgs {
    /// File holding the package bytes
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Package name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,

    /// Reject the package unless its MD5 matches
    #[arg(long)]
    pub md5: Option<String>,

    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    pub silo: String,
    pub name: String,

    /// Write here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PackageArgs {
    pub silo: String,
    pub name: String,
}

pub fn put(pool: &Pool, args: PutArgs) -> Result<()> {
    let name = match args.name {
        Some(name) => name,
        None => args
            .file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("cannot derive a package name from {}", args.file.display()))?,
    };
    let file = File::open(&args.file).with_context(|| format!("cannot open {}", args.file.display()))?;
    let size = file.metadata()?.len();

    let record = pool.allocator().with_reservation(size, |silo| {
        silo.put_reader(&name, &file, args.content_type.as_deref(), args.md5.as_deref())
    })?;

    let silo = record.silo.to_string();
    log_cli_info!("package stored", silo = silo.as_str(), package = record.name.as_str(), size = record.size);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn get(pool: &Pool, args: GetArgs) -> Result<()> {
    let silo = pool.resolver().lookup(&args.silo)?;
    let Some(mut reader) = silo.open(&args.name)? else {
        bail!("package {} is not in silo {}", args.name, silo.key());
    };
    match args.output {
        Some(path) => {
            let mut out = File::create(&path).with_context(|| format!("cannot create {}", path.display()))?;
            io::copy(&mut reader, &mut out)?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut reader, &mut out)?;
            out.flush()?;
        }
    }
    Ok(())
}

pub fn delete(pool: &Pool, args: PackageArgs) -> Result<()> {
    pool.resolver().lookup(&args.silo)?.delete(&args.name)?;
    Ok(())
}

pub fn exists(pool: &Pool, args: PackageArgs) -> Result<()> {
    let check = pool.resolver().lookup(&args.silo)?.check(&args.name)?;
    let word = match check {
        PackageCheck::Present => "present",
        PackageCheck::Absent => "absent",
        PackageCheck::Alien => "alien",
        PackageCheck::Ghost => "ghost",
        PackageCheck::Missing => "missing",
    };
    println!("{}", word);
    if check != PackageCheck::Present {
        std::process::exit(1);
    }
    Ok(())
}
