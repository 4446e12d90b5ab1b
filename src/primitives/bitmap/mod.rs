//! Sparse sets of 64-bit identifiers.
//!
//! [`ReachabilitySet`] splits every identifier into a 48-bit high key and a 16-bit
//! low half. High keys are kept in an ordered map so iteration is always
//! ascending; low halves live in array or bitmap containers depending on density.
//! [`SharedReachabilitySet`] serializes mutation behind one lock per set.

mod container;
mod shared;

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use container::{Container, ContainerIter};

pub use shared::SharedReachabilitySet;

#[inline]
fn split(value: u64) -> (u64, u16) {
    (value >> 16, value as u16)
}

#[inline]
fn join(high: u64, low: u16) -> u64 {
    (high << 16) | low as u64
}

/// Mutable set of `u64` identifiers with bulk set algebra and ordered iteration.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct ReachabilitySet {
    containers: BTreeMap<u64, Container>,
}

impl ReachabilitySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding `values`.
    pub fn of(values: &[u64]) -> Self {
        values.iter().copied().collect()
    }

    /// Adds `value` to the set.
    pub fn add(&mut self, value: u64) {
        self.checked_add(value);
    }

    /// Adds `value`, returning true if it was not already a member.
    pub fn checked_add(&mut self, value: u64) -> bool {
        let (high, low) = split(value);
        match self.containers.entry(high) {
            btree_map::Entry::Occupied(mut entry) => entry.get_mut().insert(low),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(Container::single(low));
                true
            }
        }
    }

    /// Removes `value` if present.
    pub fn remove(&mut self, value: u64) {
        let (high, low) = split(value);
        if let btree_map::Entry::Occupied(mut entry) = self.containers.entry(high) {
            if entry.get_mut().remove(low) && entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Returns true if `value` is a member.
    pub fn contains(&self, value: u64) -> bool {
        let (high, low) = split(value);
        self.containers
            .get(&high)
            .is_some_and(|container| container.contains(low))
    }

    /// Unions `other` into this set.
    pub fn or(&mut self, other: &ReachabilitySet) {
        for (high, theirs) in &other.containers {
            match self.containers.entry(*high) {
                btree_map::Entry::Occupied(mut entry) => {
                    let merged = entry.get().union(theirs);
                    entry.insert(merged);
                }
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(theirs.clone());
                }
            }
        }
    }

    /// Keeps only the members also present in `other`.
    pub fn and(&mut self, other: &ReachabilitySet) {
        self.containers.retain(|high, ours| match other.containers.get(high) {
            Some(theirs) => {
                *ours = ours.intersect(theirs);
                !ours.is_empty()
            }
            None => false,
        });
    }

    /// Replaces this set with the symmetric difference against `other`.
    pub fn xor(&mut self, other: &ReachabilitySet) {
        for (high, theirs) in &other.containers {
            match self.containers.entry(*high) {
                btree_map::Entry::Occupied(mut entry) => {
                    let diff = entry.get().symmetric_difference(theirs);
                    if diff.is_empty() {
                        entry.remove();
                    } else {
                        entry.insert(diff);
                    }
                }
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(theirs.clone());
                }
            }
        }
    }

    /// Visits members in ascending order until `visit` returns false.
    pub fn each(&self, mut visit: impl FnMut(u64) -> bool) {
        for value in self.iter() {
            if !visit(value) {
                break;
            }
        }
    }

    /// Number of members.
    pub fn cardinality(&self) -> u64 {
        self.containers
            .values()
            .map(|container| container.len() as u64)
            .sum()
    }

    /// Returns true when the set has no members.
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.containers.clear();
    }

    /// Members in ascending order.
    pub fn slice(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.cardinality() as usize);
        out.extend(self.iter());
        out
    }

    /// Ascending iterator over members.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            outer: self.containers.iter(),
            current: None,
        }
    }
}

impl fmt::Debug for ReachabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<u64> for ReachabilitySet {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        let mut set = ReachabilitySet::new();
        set.extend(iter);
        set
    }
}

impl Extend<u64> for ReachabilitySet {
    fn extend<T: IntoIterator<Item = u64>>(&mut self, iter: T) {
        for value in iter {
            self.add(value);
        }
    }
}

impl<'a> IntoIterator for &'a ReachabilitySet {
    type Item = u64;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iterator returned by [`ReachabilitySet::iter`].
pub struct Iter<'a> {
    outer: btree_map::Iter<'a, u64, Container>,
    current: Option<(u64, ContainerIter<'a>)>,
}

impl Iterator for Iter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if let Some((high, inner)) = self.current.as_mut() {
                if let Some(low) = inner.next() {
                    return Some(join(*high, low));
                }
            }
            let (high, container) = self.outer.next()?;
            self.current = Some((*high, container.iter()));
        }
    }
}
