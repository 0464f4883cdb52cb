//! Merge-style diff of two key-sorted streams.
//!
//! Both inputs must yield strictly ascending keys. [`SortedStream`] enforces
//! that as it goes, so a backend that returns rows out of order fails the
//! diff instead of silently misclassifying keys.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::iter::Fuse;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stream out of order: {next:?} follows {previous:?}")]
pub struct OutOfOrder<K: Debug> {
    pub previous: K,
    pub next: K,
}

/// Passes `(key, value)` pairs through, failing on the first key that is
/// not strictly greater than the one before it.
pub struct SortedStream<K, V, I>
where
    I: Iterator<Item = (K, V)>,
{
    inner: Fuse<I>,
    last: Option<K>,
}

impl<K, V, I> SortedStream<K, V, I>
where
    K: Ord + Clone + Debug,
    I: Iterator<Item = (K, V)>,
{
    pub fn new<T: IntoIterator<IntoIter = I>>(items: T) -> Self {
        Self {
            inner: items.into_iter().fuse(),
            last: None,
        }
    }
}

impl<K, V, I> Iterator for SortedStream<K, V, I>
where
    K: Ord + Clone + Debug,
    I: Iterator<Item = (K, V)>,
{
    type Item = Result<(K, V), OutOfOrder<K>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.inner.next()?;
        if let Some(previous) = &self.last {
            if key <= *previous {
                return Some(Err(OutOfOrder {
                    previous: previous.clone(),
                    next: key,
                }));
            }
        }
        self.last = Some(key.clone());
        Some(Ok((key, value)))
    }
}

/// One key from either side of a [`MergeDiff`]
pub type DiffItem<K, A, B> = (K, Option<A>, Option<B>);

/// Walks two sorted streams in lock-step, yielding every key once with the
/// value from each side that has it.
pub struct MergeDiff<K, A, B, L, R>
where
    K: Debug,
    L: Iterator<Item = Result<(K, A), OutOfOrder<K>>>,
    R: Iterator<Item = Result<(K, B), OutOfOrder<K>>>,
{
    left: L,
    right: R,
    left_head: Option<(K, A)>,
    right_head: Option<(K, B)>,
    failed: bool,
}

impl<K, A, B, L, R> MergeDiff<K, A, B, L, R>
where
    K: Ord + Debug,
    L: Iterator<Item = Result<(K, A), OutOfOrder<K>>>,
    R: Iterator<Item = Result<(K, B), OutOfOrder<K>>>,
{
    pub fn new(left: L, right: R) -> Self {
        Self {
            left,
            right,
            left_head: None,
            right_head: None,
            failed: false,
        }
    }

    fn fill(&mut self) -> Result<(), OutOfOrder<K>> {
        if self.left_head.is_none() {
            self.left_head = self.left.next().transpose()?;
        }
        if self.right_head.is_none() {
            self.right_head = self.right.next().transpose()?;
        }
        Ok(())
    }
}

impl<K, A, B, L, R> Iterator for MergeDiff<K, A, B, L, R>
where
    K: Ord + Debug,
    L: Iterator<Item = Result<(K, A), OutOfOrder<K>>>,
    R: Iterator<Item = Result<(K, B), OutOfOrder<K>>>,
{
    type Item = Result<DiffItem<K, A, B>, OutOfOrder<K>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Err(e) = self.fill() {
            self.failed = true;
            return Some(Err(e));
        }
        match (self.left_head.take(), self.right_head.take()) {
            (None, None) => None,
            (Some((key, a)), None) => Some(Ok((key, Some(a), None))),
            (None, Some((key, b))) => Some(Ok((key, None, Some(b)))),
            (Some((lk, a)), Some((rk, b))) => match lk.cmp(&rk) {
                Ordering::Less => {
                    self.right_head = Some((rk, b));
                    Some(Ok((lk, Some(a), None)))
                }
                Ordering::Greater => {
                    self.left_head = Some((lk, a));
                    Some(Ok((rk, None, Some(b))))
                }
                Ordering::Equal => Some(Ok((lk, Some(a), Some(b)))),
            },
        }
    }
}
