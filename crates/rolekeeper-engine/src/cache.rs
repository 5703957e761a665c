//! Fixed-capacity insertion-ordered de-duplication set.

use std::collections::{HashSet, VecDeque};

/// Remembers the most recently inserted keys, evicting the oldest once the
/// fixed capacity is exceeded.
///
/// Not synchronized: the set must be owned and mutated by exactly one task.
/// Sharing it across tasks is a misuse, not a supported mode.
#[derive(Debug)]
pub struct BoundedRecencySet {
    capacity: usize,
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl BoundedRecencySet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.set.contains(key)
    }

    /// Insert `key`, returning whether it was already present. An already
    /// present key is not refreshed: eviction order is insertion order.
    pub fn add(&mut self, key: &str) -> bool {
        if self.set.contains(key) {
            return true;
        }
        self.set.insert(key.to_string());
        self.order.push_back(key.to_string());
        self.evict_overflow();
        false
    }

    /// Bulk-load keys, oldest first.
    pub fn init<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if self.set.insert(key.clone()) {
                self.order.push_back(key);
            }
        }
        self.evict_overflow();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_reports_presence() {
        let mut cache = BoundedRecencySet::new(4);
        assert!(!cache.add("a"));
        assert!(cache.add("a"));
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let mut cache = BoundedRecencySet::new(3);
        for key in ["a", "b", "c", "d", "e"] {
            cache.add(key);
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert!(cache.contains("e"));
    }

    #[test]
    fn test_init_loads_oldest_first() {
        let mut cache = BoundedRecencySet::new(2);
        cache.init(["old", "mid", "new"]);
        assert!(!cache.contains("old"));
        assert!(cache.contains("mid"));
        assert!(cache.contains("new"));
    }

    #[test]
    fn test_duplicate_add_does_not_refresh() {
        let mut cache = BoundedRecencySet::new(2);
        cache.add("a");
        cache.add("b");
        cache.add("a");
        cache.add("c");
        // "a" stayed oldest despite the duplicate insert
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }
}
