//! Bounded most-recently-used ordering of tab ids.

use crate::TabId;

/// Ordered tab ids, most recent first, never longer than `capacity` and never
/// holding duplicates. All mutation goes through `promote`, `evict`, and
/// `set_capacity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MruStack {
    entries: Vec<TabId>,
    capacity: usize,
}

impl MruStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuilds from persisted entries: order preserved, duplicates dropped,
    /// truncated to capacity.
    pub fn from_entries(entries: Vec<TabId>, capacity: usize) -> Self {
        let mut stack = Self::new(capacity);
        for tab in entries {
            if stack.entries.len() == stack.capacity {
                break;
            }
            if !stack.entries.contains(&tab) {
                stack.entries.push(tab);
            }
        }
        stack
    }

    pub fn entries(&self) -> &[TabId] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, tab: TabId) -> bool {
        self.entries.contains(&tab)
    }

    /// 1-based position of a tab, 0 when absent.
    pub fn position(&self, tab: TabId) -> usize {
        self.entries
            .iter()
            .position(|t| *t == tab)
            .map_or(0, |idx| idx + 1)
    }

    /// Move-to-front insert. Returns the tabs evicted over capacity.
    pub fn promote(&mut self, tab: TabId) -> Vec<TabId> {
        self.entries.retain(|t| *t != tab);
        self.entries.insert(0, tab);
        let keep = self.capacity.min(self.entries.len());
        self.entries.split_off(keep)
    }

    /// Removes a tab if present. Returns whether the stack changed.
    pub fn evict(&mut self, tab: TabId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|t| *t != tab);
        self.entries.len() != before
    }

    /// Changes capacity, returning the entries truncated off the tail.
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<TabId> {
        self.capacity = capacity.max(1);
        let keep = self.capacity.min(self.entries.len());
        self.entries.split_off(keep)
    }
}
