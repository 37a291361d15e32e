//! Process-lifetime quarantine for records that failed enrichment.
//!
//! Ids in the set are excluded from backlog fetches for the rest of the run;
//! a restart clears the set and retries everything. Ids are never pruned,
//! even if the underlying failure was transient.

use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct IgnoreSet {
    inner: Mutex<HashSet<Uuid>>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Uuid) {
        self.inner.lock().expect("ignore set poisoned").insert(id);
    }

    pub fn extend(&self, ids: impl IntoIterator<Item = Uuid>) {
        self.inner.lock().expect("ignore set poisoned").extend(ids);
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.lock().expect("ignore set poisoned").contains(id)
    }

    /// Copy of the current contents, for query-side exclusion.
    pub fn snapshot(&self) -> Vec<Uuid> {
        self.inner
            .lock()
            .expect("ignore set poisoned")
            .iter()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ignore set poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_contains() {
        let set = IgnoreSet::new();
        let id = Uuid::new_v4();
        assert!(!set.contains(&id));
        set.insert(id);
        assert!(set.contains(&id));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn extend_deduplicates() {
        let set = IgnoreSet::new();
        let id = Uuid::new_v4();
        set.extend([id, id, Uuid::new_v4()]);
        assert_eq!(set.len(), 2);
    }
}
