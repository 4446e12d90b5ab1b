use std::sync::Arc;

use parking_lot::RwLock;

use super::ReachabilitySet;

/// Thread-safe handle around a [`ReachabilitySet`].
///
/// Clones share the same underlying set. Every mutation takes the write lock, so
/// concurrent writers are serialized; iteration works on a snapshot taken under
/// the read lock.
#[derive(Clone, Default, Debug)]
pub struct SharedReachabilitySet {
    inner: Arc<RwLock<ReachabilitySet>>,
}

impl SharedReachabilitySet {
    /// Creates an empty shared set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value`.
    pub fn add(&self, value: u64) {
        self.inner.write().add(value);
    }

    /// Adds `value`, returning true if this call inserted it.
    pub fn checked_add(&self, value: u64) -> bool {
        self.inner.write().checked_add(value)
    }

    /// Removes `value` if present.
    pub fn remove(&self, value: u64) {
        self.inner.write().remove(value);
    }

    /// Returns true if `value` is a member.
    pub fn contains(&self, value: u64) -> bool {
        self.inner.read().contains(value)
    }

    /// Unions `other` into the shared set.
    pub fn or(&self, other: &ReachabilitySet) {
        self.inner.write().or(other);
    }

    /// Intersects the shared set with `other`.
    pub fn and(&self, other: &ReachabilitySet) {
        self.inner.write().and(other);
    }

    /// Replaces the shared set with its symmetric difference against `other`.
    pub fn xor(&self, other: &ReachabilitySet) {
        self.inner.write().xor(other);
    }

    /// Number of members.
    pub fn cardinality(&self) -> u64 {
        self.inner.read().cardinality()
    }

    /// Copies the current contents out of the lock.
    pub fn snapshot(&self) -> ReachabilitySet {
        self.inner.read().clone()
    }

    /// Visits a snapshot of the members until `visit` returns false.
    pub fn each(&self, visit: impl FnMut(u64) -> bool) {
        self.snapshot().each(visit);
    }
}

impl From<ReachabilitySet> for SharedReachabilitySet {
    fn from(set: ReachabilitySet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(set)),
        }
    }
}
