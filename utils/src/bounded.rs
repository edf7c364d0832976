//! A set that remembers at most a fixed number of items, evicting the oldest first.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// A set that holds at most `capacity` items, evicting in insertion order.
pub struct BoundedSet<T: Eq + Hash + Clone> {
    capacity: usize,
    order: VecDeque<T>,
    items: HashSet<T>,
}

impl<T: Eq + Hash + Clone> BoundedSet<T> {
    /// Create a new set that remembers up to `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            items: HashSet::with_capacity(capacity),
        }
    }

    /// Insert an item, returning `false` if it was already present.
    ///
    /// If the set is full, the oldest item is evicted.
    pub fn insert(&mut self, item: T) -> bool {
        if !self.items.insert(item.clone()) {
            return false;
        }
        self.order.push_back(item);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.items.remove(&evicted);
            }
        }
        true
    }

    /// Remove an item, returning `true` if it was present.
    pub fn remove(&mut self, item: &T) -> bool {
        if !self.items.remove(item) {
            return false;
        }
        self.order.retain(|existing| existing != item);
        true
    }

    /// Returns `true` if the item is present.
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Returns the number of items held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no items are held.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut set = BoundedSet::new(2);
        assert!(set.insert(1));
        assert!(set.insert(2));
        assert!(!set.insert(1));
        assert!(set.insert(3));
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert!(set.contains(&3));
    }

    #[test]
    fn test_remove() {
        let mut set = BoundedSet::new(4);
        set.insert("a");
        assert!(set.remove(&"a"));
        assert!(!set.remove(&"a"));
        assert!(set.is_empty());

        // A removed item can be inserted again
        assert!(set.insert("a"));
    }
}
