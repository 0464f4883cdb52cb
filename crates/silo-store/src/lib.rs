//! # silo-store
//!
//! Directory-backed object store underneath every silo.
//!
//! Objects are immutable once written. Each one gets its own directory,
//! addressed by the MD5 of the object *name* (not its content), holding the
//! bytes plus small sidecar files:
//!
//! ```text
//! <silo root>/
//! └── 9a0/
//!     └── 364b9e99bb480dd25e1f0284c8555/
//!         ├── data       # object bytes
//!         ├── md5        # hex MD5 of data
//!         ├── sha1       # hex SHA1 of data
//!         ├── type       # content type
//!         ├── datetime   # RFC 3339 store time
//!         └── name       # object name
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::Serialize;
use sha1::Sha1;
use thiserror::Error;
use tracing::{debug, instrument};

/// Content type recorded when the caller supplies none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const DATA_FILE: &str = "data";
const CHUNK_SIZE: usize = 1024 * 1024;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("object not found: {name}")]
    NotFound { name: String },

    #[error("object already exists: {name}")]
    AlreadyExists { name: String },

    #[error("not a usable directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("corrupt sidecar {sidecar} for {name}: {reason}")]
    Corrupt {
        name: String,
        sidecar: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Relative directory of an object: `md5[0..3]/md5[3..]`
pub fn hashpath(name: &str) -> PathBuf {
    let hex = hex::encode(Md5::digest(name.as_bytes()));
    PathBuf::from(&hex[..3]).join(&hex[3..])
}

/// Relative parent directory of an object: `md5[0..3]`
pub fn hashpath_parent(name: &str) -> PathBuf {
    let hex = hex::encode(Md5::digest(name.as_bytes()));
    PathBuf::from(&hex[..3])
}

/// Everything the sidecars record about one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMeta {
    pub name: String,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub content_type: String,
    pub datetime: DateTime<Utc>,
}

/// One directory tree of named immutable objects
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open a store rooted at an existing directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StoreError::NotADirectory { path: root });
        }
        Ok(Self { root })
    }

    /// Open a store, creating its root directory if needed.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_dir(&self, name: &str) -> PathBuf {
        self.root.join(hashpath(name))
    }

    /// Path of the object's bytes, whether or not it exists.
    pub fn data_path(&self, name: &str) -> PathBuf {
        self.object_dir(name).join(DATA_FILE)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.data_path(name).is_file()
    }

    /// Store bytes under a new name, stamped with the current time.
    pub fn put(&self, name: &str, data: &[u8], content_type: Option<&str>) -> Result<ObjectMeta> {
        self.put_at(name, data, content_type, Utc::now())
    }

    /// Store bytes under a new name with an explicit timestamp.
    pub fn put_at(
        &self,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<ObjectMeta> {
        self.put_reader(name, data, content_type, at)
    }

    /// Stream an object into the store.
    ///
    /// The object is assembled in a hidden temporary directory beside its
    /// final location and renamed into place, so readers never observe a
    /// partial object. Fails with [`StoreError::AlreadyExists`] if the name
    /// is taken.
    #[instrument(skip(self, reader), level = "debug")]
    pub fn put_reader<R: Read>(
        &self,
        name: &str,
        mut reader: R,
        content_type: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<ObjectMeta> {
        let final_dir = self.object_dir(name);
        if final_dir.join(DATA_FILE).exists() {
            return Err(StoreError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let parent = self.root.join(hashpath_parent(name));
        fs::create_dir_all(&parent)?;

        let temp_dir = parent.join(format!(
            ".put.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir(&temp_dir)?;

        let written = self.write_object(&temp_dir, name, &mut reader, content_type, at);
        let meta = match written {
            Ok(meta) => meta,
            Err(e) => {
                let _ = fs::remove_dir_all(&temp_dir);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp_dir, &final_dir) {
            let _ = fs::remove_dir_all(&temp_dir);
            if final_dir.join(DATA_FILE).exists() {
                return Err(StoreError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            return Err(StoreError::Io(e));
        }

        debug!(name, size = meta.size, "stored object");
        Ok(meta)
    }

    fn write_object<R: Read>(
        &self,
        dir: &Path,
        name: &str,
        reader: &mut R,
        content_type: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<ObjectMeta> {
        let mut file = File::create(dir.join(DATA_FILE))?;
        let mut md5 = Md5::new();
        let mut sha1 = Sha1::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            md5.update(&buf[..n]);
            sha1.update(&buf[..n]);
            file.write_all(&buf[..n])?;
            size += n as u64;
        }
        file.sync_all()?;

        let meta = ObjectMeta {
            name: name.to_string(),
            size,
            md5: hex::encode(md5.finalize()),
            sha1: hex::encode(sha1.finalize()),
            content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
            datetime: at,
        };

        fs::write(dir.join("md5"), &meta.md5)?;
        fs::write(dir.join("sha1"), &meta.sha1)?;
        fs::write(dir.join("type"), &meta.content_type)?;
        fs::write(dir.join("datetime"), meta.datetime.to_rfc3339())?;
        fs::write(dir.join("name"), name)?;
        Ok(meta)
    }

    /// Read the whole object. Absence is `Ok(None)`.
    pub fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.data_path(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Open the object's bytes for streaming. Absence is `Ok(None)`.
    pub fn open(&self, name: &str) -> Result<Option<File>> {
        match File::open(self.data_path(name)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove an object and its sidecars.
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, name: &str) -> Result<()> {
        let dir = self.object_dir(name);
        if !dir.join(DATA_FILE).exists() {
            return Err(StoreError::NotFound {
                name: name.to_string(),
            });
        }
        fs::remove_dir_all(&dir)?;
        // The fan-out directory goes too once it is empty.
        if let Some(parent) = dir.parent() {
            let _ = fs::remove_dir(parent);
        }
        Ok(())
    }

    fn sidecar(&self, name: &str, sidecar: &'static str) -> Result<String> {
        match fs::read_to_string(self.object_dir(name).join(sidecar)) {
            Ok(s) => Ok(s.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn md5(&self, name: &str) -> Result<String> {
        self.sidecar(name, "md5")
    }

    pub fn sha1(&self, name: &str) -> Result<String> {
        self.sidecar(name, "sha1")
    }

    pub fn content_type(&self, name: &str) -> Result<String> {
        self.sidecar(name, "type")
    }

    pub fn datetime(&self, name: &str) -> Result<DateTime<Utc>> {
        let raw = self.sidecar(name, "datetime")?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                name: name.to_string(),
                sidecar: "datetime",
                reason: e.to_string(),
            })
    }

    pub fn size(&self, name: &str) -> Result<u64> {
        match fs::metadata(self.data_path(name)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent of the data file's access and modification times.
    pub fn last_access(&self, name: &str) -> Result<DateTime<Utc>> {
        let meta = match fs::metadata(self.data_path(name)) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let modified = meta.modified()?;
        let latest = match meta.accessed() {
            Ok(accessed) if accessed > modified => accessed,
            _ => modified,
        };
        Ok(DateTime::<Utc>::from(latest))
    }

    /// All sidecar metadata for one object.
    pub fn meta(&self, name: &str) -> Result<ObjectMeta> {
        Ok(ObjectMeta {
            name: name.to_string(),
            size: self.size(name)?,
            md5: self.md5(name)?,
            sha1: self.sha1(name)?,
            content_type: self.content_type(name)?,
            datetime: self.datetime(name)?,
        })
    }

    /// Recompute MD5 and SHA1 of the stored bytes.
    pub fn compute_checksums(&self, name: &str) -> Result<(String, String)> {
        let file = self.open(name)?.ok_or_else(|| StoreError::NotFound {
            name: name.to_string(),
        })?;
        Ok(checksums_of(BufReader::new(file))?)
    }

    /// Iterate the names of every stored object, in directory order.
    pub fn names(&self) -> Names {
        Names {
            walker: walkdir::WalkDir::new(&self.root)
                .min_depth(2)
                .max_depth(2)
                .into_iter(),
        }
    }
}

/// MD5 and SHA1 (hex) of everything a reader yields.
pub fn checksums_of<R: Read>(mut reader: R) -> io::Result<(String, String)> {
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        md5.update(&buf[..n]);
        sha1.update(&buf[..n]);
    }
    Ok((hex::encode(md5.finalize()), hex::encode(sha1.finalize())))
}

/// Iterator over object names, see [`ContentStore::names`].
pub struct Names {
    walker: walkdir::IntoIter,
}

impl Iterator for Names {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let err = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("directory walk failed"));
                    return Some(Err(StoreError::Io(err)));
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !entry.path().join(DATA_FILE).is_file() {
                continue;
            }
            return Some(
                fs::read_to_string(entry.path().join("name"))
                    .map(|n| n.trim_end_matches('\n').to_string())
                    .map_err(StoreError::from),
            );
        }
    }
}
