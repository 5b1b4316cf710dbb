//! Immutable sets of machine resource IDs.
//!
//! [`CpuSet`] is the set-algebra currency of the corepin crates. It holds
//! logical CPU IDs most of the time, but socket, CCD and core IDs flow
//! through the same type; an ID is only meaningful within the namespace it
//! came from. Sets materialize once and are never mutated, so they can be
//! handed around freely during an allocation.
//!
//! The textual form is the kernel's range-list format (`"0-3,5,7-9"`), the
//! same syntax found in `/sys/devices/system/cpu/online`, in per-cache
//! `shared_cpu_list` files, and in cgroup `cpuset.cpus`. [`CpuSet`]
//! serializes to and from that string so assignments can be checkpointed or
//! published in status annotations verbatim.

use {
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    std::{collections::BTreeSet, fmt, str::FromStr},
    thiserror::Error,
};

/// Failed to parse a range-list string.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum CpuSetParseError {
    /// A standalone entry was not a non-negative integer.
    #[error("invalid CPU ID: {0:?}")]
    InvalidId(String),

    /// A `start-end` entry had a malformed or reversed bound.
    #[error("invalid CPU range: {0:?}")]
    InvalidRange(String),
}

/// An immutable set of non-negative integer IDs.
///
/// Enumeration order is ascending, which the allocator relies on for
/// deterministic output. Duplicates collapse at construction; all the usual
/// set operations return new sets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CpuSet(BTreeSet<usize>);

impl CpuSet {
    /// Returns the empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of IDs in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set holds no IDs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `id` is a member of the set.
    pub fn contains(&self, id: usize) -> bool {
        self.0.contains(&id)
    }

    /// Returns the union of `self` and `other`.
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Returns the members of `self` that are not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).copied().collect())
    }

    /// Returns the members common to `self` and `other`.
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    /// Returns true if every member of `self` is also in `other`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Returns the members satisfying `predicate`, as a new set.
    pub fn filter<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(usize) -> bool,
    {
        Self(self.0.iter().copied().filter(|&id| predicate(id)).collect())
    }

    /// Iterates the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Returns the members as an ascending vector.
    pub fn to_vec(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[usize; N]> for CpuSet {
    fn from(ids: [usize; N]) -> Self {
        ids.into_iter().collect()
    }
}

/// Formats the set as a minimal ascending range list, e.g. `"0-3,5,7-9"`.
/// The empty set formats as the empty string.
impl fmt::Display for CpuSet {
    #[allow(clippy::arithmetic_side_effects)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.0.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = iter.next() {
            let mut end = start;
            while let Some(&next) = iter.peek() {
                if next != end + 1 {
                    break;
                }
                end = next;
                iter.next();
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

/// Parses a range-list string (e.g. `"0-3,5,7-9"`).
///
/// Blank entries and surrounding whitespace are tolerated, matching what the
/// kernel emits and what hand-written values tend to look like. Reversed
/// ranges are rejected.
impl FromStr for CpuSet {
    type Err = CpuSetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ids = BTreeSet::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some((start_str, end_str)) = part.split_once('-') {
                let start = start_str
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| CpuSetParseError::InvalidRange(part.to_string()))?;
                let end = end_str
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| CpuSetParseError::InvalidRange(part.to_string()))?;
                if end < start {
                    return Err(CpuSetParseError::InvalidRange(part.to_string()));
                }
                ids.extend(start..=end);
            } else {
                let id = part
                    .parse::<usize>()
                    .map_err(|_| CpuSetParseError::InvalidId(part.to_string()))?;
                ids.insert(id);
            }
        }

        Ok(Self(ids))
    }
}

impl Serialize for CpuSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CpuSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
