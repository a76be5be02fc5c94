//! # Lookup
//!
//! `InstanceId -> V` map used by the cancellation pipeline. Inserting a key
//! twice with [`Lookup::insert`] is a logic bug in request generation and is
//! fatal under invariant checks; [`Lookup::try_insert`] is the deduplicating
//! form.

use std::collections::hash_map::{Entry, HashMap};

use conflux_core::{invariant, ConfluxError, Dispose, InstanceId};

/// Map keyed on instance identity.
#[derive(Debug)]
pub struct Lookup<V> {
    entries: HashMap<InstanceId, V>,
}

impl<V> Default for Lookup<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> Lookup<V> {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key that must not be present.
    ///
    /// # Panics
    ///
    /// With invariant checks compiled in: if `id` is already present.
    pub fn insert(&mut self, id: InstanceId, value: V) {
        let inserted = self.try_insert(id, value);
        invariant!(inserted, ConfluxError::DuplicateKey { id });
    }

    /// Inserts unless already present. Returns true if inserted.
    pub fn try_insert(&mut self, id: InstanceId, value: V) -> bool {
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Value for `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: &InstanceId) -> Option<&V> {
        self.entries.get(id)
    }

    /// Whether `id` is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Removes `id`, returning its value.
    pub fn remove(&mut self, id: &InstanceId) -> Option<V> {
        self.entries.remove(id)
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&InstanceId, &mut V) -> bool) {
        self.entries.retain(keep);
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the lookup is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates the keys.
    pub fn keys(&self) -> impl Iterator<Item = &InstanceId> {
        self.entries.keys()
    }

    /// Iterates the entries.
    pub fn iter(&self) -> impl Iterator<Item = (&InstanceId, &V)> {
        self.entries.iter()
    }
}

impl<V> Dispose for Lookup<V> {
    fn dispose(&mut self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }
}
