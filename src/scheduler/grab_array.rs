//! Unordered container with O(1) random pick and O(1) removal.

use std::collections::HashMap;
use std::hash::Hash;

use rand::Rng;

/// Weighted-uniform bag of handles.
///
/// Backed by a dense vector plus a position index; removal swaps the last
/// element into the hole so the vector never has gaps.
#[derive(Debug, Clone)]
pub struct GrabArray<T> {
    items: Vec<T>,
    positions: HashMap<T, usize>,
}

impl<T: Copy + Eq + Hash> GrabArray<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Add a handle. Returns false if it was already present.
    pub fn add(&mut self, item: T) -> bool {
        if self.positions.contains_key(&item) {
            return false;
        }
        self.positions.insert(item, self.items.len());
        self.items.push(item);
        true
    }

    /// Remove a handle. Returns false if it was not present.
    pub fn remove(&mut self, item: &T) -> bool {
        let Some(pos) = self.positions.remove(item) else {
            return false;
        };
        self.items.swap_remove(pos);
        if let Some(moved) = self.items.get(pos) {
            self.positions.insert(*moved, pos);
        }
        true
    }

    pub fn contains(&self, item: &T) -> bool {
        self.positions.contains_key(item)
    }

    /// Pick a handle uniformly at random without removing it.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items[rng.gen_range(0..self.items.len())])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Copy + Eq + Hash> Default for GrabArray<T> {
    fn default() -> Self {
        Self::new()
    }
}
