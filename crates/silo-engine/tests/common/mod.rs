//! Shared fixtures for silo-engine integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use silo_catalog::{ManualClock, MemoryCatalog};
use silo_tape::{parse_listing, TapeAgent, TapeListing, TapeRun};
use walkdir::WalkDir;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2011, 6, 1, 12, 0, 0).unwrap()
}

pub fn catalog_and_clock() -> (Arc<MemoryCatalog>, Arc<ManualClock>) {
    (Arc::new(MemoryCatalog::new()), Arc::new(ManualClock::new(t0())))
}

/// Copy the tree at `from` into `to`, keeping relative paths.
pub fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry.path().strip_prefix(from).map_err(std::io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Tape agent that treats a local directory as the tape library.
///
/// `restore(source, destination)` copies `tape_root/<source>` into
/// `destination/<last component of source>`, like the real client does
/// with `-subdir=yes`.
pub struct FakeTape {
    tape_root: PathBuf,
    status: Mutex<i32>,
    pub restores: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl FakeTape {
    pub fn new(tape_root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            tape_root: tape_root.into(),
            status: Mutex::new(0),
            restores: Mutex::new(Vec::new()),
        })
    }

    /// Status reported by later runs; a fatal status skips the copy.
    pub fn set_status(&self, status: i32) {
        *self.status.lock().unwrap() = status;
    }

    pub fn restore_count(&self) -> usize {
        self.restores.lock().unwrap().len()
    }

    fn on_tape(&self, path: &Path) -> PathBuf {
        self.tape_root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn run(&self, command: String, status: i32, output: Vec<String>, errors: Vec<String>) -> TapeRun {
        TapeRun {
            command,
            status,
            output,
            errors,
        }
    }
}

impl TapeAgent for FakeTape {
    fn save(&self, path: &Path, _timeout: Option<Duration>) -> TapeRun {
        let target = self.on_tape(path);
        let status = match copy_tree(path, &target) {
            Ok(()) => *self.status.lock().unwrap(),
            Err(_) => 12,
        };
        self.run(format!("save {}", path.display()), status, Vec::new(), Vec::new())
    }

    fn list(&self, path: &Path, _timeout: Option<Duration>) -> TapeListing {
        let root = self.on_tape(path);
        let lines: Vec<String> = WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                let original = Path::new("/").join(e.path().strip_prefix(&self.tape_root).unwrap());
                format!("{}  B  01/01/2011 00:00:00  DEFAULT  A  {}", size, original.display())
            })
            .collect();
        let files = parse_listing(&lines);
        TapeListing {
            run: self.run(format!("list {}", path.display()), 0, lines, Vec::new()),
            files,
        }
    }

    fn restore(&self, source: &Path, destination: &Path, _timeout: Option<Duration>) -> TapeRun {
        self.restores
            .lock()
            .unwrap()
            .push((source.to_path_buf(), destination.to_path_buf()));
        let command = format!("restore {} {}", source.display(), destination.display());
        let status = *self.status.lock().unwrap();
        if status > 8 {
            return self.run(
                command,
                status,
                vec!["ANS1000I".to_string()],
                vec!["ANS1311E server out of data storage space".to_string()],
            );
        }

        let from = self.on_tape(source);
        let name = source.file_name().map(PathBuf::from).unwrap_or_default();
        if !from.is_dir() {
            let error = format!("ANS1302E no objects on server match {}", source.display());
            return self.run(command, 8, Vec::new(), vec![error]);
        }
        match copy_tree(&from, &destination.join(name)) {
            Ok(()) => self.run(command, status, Vec::new(), Vec::new()),
            Err(e) => self.run(command, 12, Vec::new(), vec![e.to_string()]),
        }
    }
}
