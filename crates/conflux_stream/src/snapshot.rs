//! # Snapshot
//!
//! Flat, randomly indexable view rebuilt from scratch on every
//! consolidation. Between two consolidations it never changes; readers only
//! index into it.

use std::ops::Index;

use bytemuck::Pod;

/// Consolidated contents of a stream for the current cycle.
#[derive(Debug)]
pub struct Snapshot<T> {
    items: Vec<T>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Snapshot<T> {
    /// Number of items.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the snapshot is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item at `index`, if any.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Iterates the items.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// The items as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Clears and pre-sizes for the next rebuild.
    pub(crate) fn begin_rebuild(&mut self, capacity: usize) {
        self.items.clear();
        self.items.reserve(capacity);
    }

    #[inline]
    pub(crate) fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub(crate) fn release_memory(&mut self) {
        self.items.clear();
        self.items.shrink_to_fit();
    }
}

impl<T: Pod> Snapshot<T> {
    /// Raw bytes of the snapshot, for handing to external collaborators
    /// without a copy.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.items)
    }
}

impl<T> Index<usize> for Snapshot<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut snapshot = Snapshot::default();
        snapshot.begin_rebuild(2);
        snapshot.push(1u32);
        snapshot.push(2);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1], 2);

        snapshot.begin_rebuild(1);
        snapshot.push(9);
        assert_eq!(snapshot.as_slice(), &[9]);
        assert_eq!(snapshot.get(1), None);
    }

    #[test]
    fn test_as_bytes() {
        let mut snapshot = Snapshot::default();
        snapshot.begin_rebuild(2);
        snapshot.push(1u32);
        snapshot.push(2u32);
        assert_eq!(snapshot.as_bytes().len(), 8);
    }
}
