//! Two-key sharded container.
//!
//! Maps a discriminator (client, owning group, retry tier) to a nested
//! container. Selection is uniform over sectors, not over the items inside
//! them, which is what makes fairness structural.

use std::collections::HashMap;
use std::hash::Hash;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct SectoredGrabArray<K, C> {
    sectors: Vec<(K, C)>,
    positions: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash, C> SectoredGrabArray<K, C> {
    pub fn new() -> Self {
        Self {
            sectors: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&C> {
        self.positions.get(key).map(|&pos| &self.sectors[pos].1)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut C> {
        let pos = *self.positions.get(key)?;
        Some(&mut self.sectors[pos].1)
    }

    /// Get the sector for `key`, creating it with `create` if absent.
    ///
    /// The boolean is true when the sector was created by this call.
    pub fn get_or_insert_with<F>(&mut self, key: K, create: F) -> (&mut C, bool)
    where
        F: FnOnce() -> C,
    {
        if let Some(&pos) = self.positions.get(&key) {
            return (&mut self.sectors[pos].1, false);
        }
        let pos = self.sectors.len();
        self.sectors.push((key, create()));
        self.positions.insert(key, pos);
        (&mut self.sectors[pos].1, true)
    }

    /// Drop a sector, returning its contents.
    pub fn remove(&mut self, key: &K) -> Option<C> {
        let pos = self.positions.remove(key)?;
        let (_, sector) = self.sectors.swap_remove(pos);
        if let Some((moved, _)) = self.sectors.get(pos) {
            self.positions.insert(*moved, pos);
        }
        Some(sector)
    }

    /// Pick a sector uniformly at random.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(&K, &C)> {
        if self.sectors.is_empty() {
            return None;
        }
        let (key, sector) = &self.sectors[rng.gen_range(0..self.sectors.len())];
        Some((key, sector))
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &C)> {
        self.sectors.iter().map(|(k, c)| (k, c))
    }
}

impl<K: Copy + Eq + Hash, C> Default for SectoredGrabArray<K, C> {
    fn default() -> Self {
        Self::new()
    }
}
