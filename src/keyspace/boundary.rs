//! Half-open key intervals over the byte-ordered key space.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A half-open key interval `[start, end)`.
///
/// A missing `start` means negative infinity and a missing `end` means
/// positive infinity. Boundaries order by `(start, end)` with the missing
/// keys sorting as the respective infinity, so the order of a
/// routing map is the left-to-right order of the key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Boundary {
    start: Option<Bytes>,
    end: Option<Bytes>,
}

impl Boundary {
    /// The whole key space.
    pub const FULL: Boundary = Boundary {
        start: None,
        end: None,
    };

    /// Create a boundary from optional start and end keys.
    pub fn new(start: Option<Bytes>, end: Option<Bytes>) -> Self {
        Self { start, end }
    }

    /// `[start, +inf)`
    pub fn from_start(start: impl Into<Bytes>) -> Self {
        Self::new(Some(start.into()), None)
    }

    /// `(-inf, end)`
    pub fn until(end: impl Into<Bytes>) -> Self {
        Self::new(None, Some(end.into()))
    }

    /// `[start, end)`
    pub fn range(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Some(start.into()), Some(end.into()))
    }

    /// Start key, `None` for negative infinity.
    pub fn start_key(&self) -> Option<&Bytes> {
        self.start.as_ref()
    }

    /// End key, `None` for positive infinity.
    pub fn end_key(&self) -> Option<&Bytes> {
        self.end.as_ref()
    }

    /// Whether `start < end` holds (trivially true when either side is open).
    pub fn is_valid(&self) -> bool {
        match (&self.start, &self.end) {
            (Some(s), Some(e)) => s < e,
            _ => true,
        }
    }

    /// Whether the interval contains no key at all.
    pub fn is_empty(&self) -> bool {
        !self.is_valid()
    }

    /// Whether `key` falls inside the boundary.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let after_start = self.start.as_ref().map_or(true, |s| key >= s.as_ref());
        let before_end = self.end.as_ref().map_or(true, |e| key < e.as_ref());
        after_start && before_end
    }

    /// Whether `other` lies entirely within this boundary.
    pub fn contains(&self, other: &Boundary) -> bool {
        compare_starts(self.start_key(), other.start_key()) != Ordering::Greater
            && compare_ends(other.end_key(), self.end_key()) != Ordering::Greater
    }

    /// Whether the two boundaries share at least one key.
    pub fn overlaps(&self, other: &Boundary) -> bool {
        !self.intersect(other).is_empty()
    }

    /// The common part of both boundaries; empty when they are disjoint.
    pub fn intersect(&self, other: &Boundary) -> Boundary {
        let start = match compare_starts(self.start_key(), other.start_key()) {
            Ordering::Less => other.start.clone(),
            _ => self.start.clone(),
        };
        let end = match compare_ends(self.end_key(), other.end_key()) {
            Ordering::Greater => other.end.clone(),
            _ => self.end.clone(),
        };
        Boundary { start, end }
    }

    /// Whether splitting at `key` yields two non-empty halves.
    pub fn is_splittable(&self, key: &[u8]) -> bool {
        let after_start = self.start.as_ref().map_or(true, |s| key > s.as_ref());
        after_start && self.contains_key(key)
    }

    /// Split into `[start, key)` and `[key, end)`.
    pub fn split_at(&self, key: &[u8]) -> Option<(Boundary, Boundary)> {
        if !self.is_splittable(key) {
            return None;
        }
        let key = Bytes::copy_from_slice(key);
        Some((
            Boundary::new(self.start.clone(), Some(key.clone())),
            Boundary::new(Some(key), self.end.clone()),
        ))
    }
}

/// Compare two start keys where `None` is negative infinity.
pub fn compare_starts(a: Option<&Bytes>, b: Option<&Bytes>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

/// Compare two end keys where `None` is positive infinity.
pub fn compare_ends(a: Option<&Bytes>, b: Option<&Bytes>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

impl Ord for Boundary {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_starts(self.start_key(), other.start_key())
            .then_with(|| compare_ends(self.end_key(), other.end_key()))
    }
}

impl PartialOrd for Boundary {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            Some(s) => write!(f, "[{}", String::from_utf8_lossy(s))?,
            None => f.write_str("(-inf")?,
        }
        match &self.end {
            Some(e) => write!(f, ", {})", String::from_utf8_lossy(e)),
            None => f.write_str(", +inf)"),
        }
    }
}
