//! Typed package queries.
//!
//! Both catalog backends hand every package of a silo, name-sorted, to
//! [`PackageQuery::apply`], so filtering, ordering and paging behave the
//! same regardless of storage.

use crate::PackageRecord;

/// Sort order of a package listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackageOrder {
    /// Byte order of the package name, ascending
    #[default]
    NameAsc,
    /// Newest put first; ties fall back to name order
    InitialTimestampDesc,
}

/// Filter, order and page over the packages of one silo
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageQuery {
    extant: Option<bool>,
    name_contains: Option<String>,
    order: PackageOrder,
    page: Option<(usize, usize)>,
}

impl PackageQuery {
    /// Every package, deleted or not, in name order
    pub fn new() -> Self {
        Self::default()
    }

    /// Only currently-stored packages, in name order
    pub fn extant_only() -> Self {
        Self::new().extant(true)
    }

    pub fn extant(mut self, extant: bool) -> Self {
        self.extant = Some(extant);
        self
    }

    /// Substring match on the package name; an empty string matches all.
    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.name_contains = if needle.is_empty() { None } else { Some(needle) };
        self
    }

    pub fn order(mut self, order: PackageOrder) -> Self {
        self.order = order;
        self
    }

    /// One-based page of `per_page` rows. Page 0 is treated as page 1.
    pub fn page(mut self, page: usize, per_page: usize) -> Self {
        self.page = Some((page.max(1), per_page));
        self
    }

    pub fn matches(&self, record: &PackageRecord) -> bool {
        if let Some(extant) = self.extant {
            if record.extant != extant {
                return false;
            }
        }
        match &self.name_contains {
            Some(needle) => record.name.contains(needle.as_str()),
            None => true,
        }
    }

    /// Apply the query to a silo's packages.
    pub fn apply(&self, records: Vec<PackageRecord>) -> Vec<PackageRecord> {
        let mut rows: Vec<PackageRecord> = records.into_iter().filter(|r| self.matches(r)).collect();

        match self.order {
            PackageOrder::NameAsc => rows.sort_by(|a, b| a.name.cmp(&b.name)),
            PackageOrder::InitialTimestampDesc => rows.sort_by(|a, b| {
                b.initial_timestamp
                    .cmp(&a.initial_timestamp)
                    .then_with(|| a.name.cmp(&b.name))
            }),
        }

        match self.page {
            Some((page, per_page)) => rows
                .into_iter()
                .skip((page - 1).saturating_mul(per_page))
                .take(per_page)
                .collect(),
            None => rows,
        }
    }

    /// Number of rows the query would return before paging.
    pub fn count(&self, records: &[PackageRecord]) -> usize {
        records.iter().filter(|r| self.matches(r)).count()
    }
}
