//! # silo-engine
//!
//! Storage pool engine: silos on disk and tape, their lifecycle, best-fit
//! placement of new packages, and fixity reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   reserve    ┌───────────────┐
//! │ PoolAllocator│─────────────▶│   DiskSilo    │──▶ ContentStore
//! └──────┬───────┘              ├───────────────┤
//!        │ pool lock            │   TapeSilo    │──▶ TapeAgent + cache
//!        ▼                      └───────┬───────┘
//!   ReservedSpace                       │
//!        │                              ▼
//!        └──────────────────────────▶ Catalog ◀── FixityReconciler
//! ```
//!
//! Every silo operation reads its state from the [`silo_catalog::Catalog`];
//! nothing here caches silo state between calls.

mod allocator;
mod archive;
mod diff;
mod disk;
mod error;
pub mod lifecycle;
mod lock;
mod reconcile;
pub mod report;
mod resolve;
pub mod scratch;
mod silo;
mod space;
mod tape;

pub use allocator::{PoolAllocator, Reservation};
pub use archive::PackageArchive;
pub use diff::{DiffItem, MergeDiff, OutOfOrder, SortedStream};
pub use disk::DiskSilo;
pub use error::{ErrorClass, Result, SiloError};
pub use lifecycle::DirectoryStatus;
pub use lock::PoolLock;
pub use reconcile::{
    classify, CatalogState, FixityReconciler, FixitySource, Outcome, ReconcileReport, VerifyFailure,
    VerifyReport,
};
pub use report::{FixityReport, PoolFixity};
pub use resolve::SiloResolver;
pub use silo::{PackageCheck, Silo};
pub use space::{FixedSpace, FsSpace, SpaceProbe};
pub use tape::{cache_dir_name, TapeSilo};
