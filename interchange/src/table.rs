//! Index tables used to break object graphs into flat, integer-linked
//! records.
//!
//! Every encode or decode pass owns its tables; nothing here is global.
//! Insertion never fails and an index is stable once assigned.

use std::collections::HashMap;
use std::sync::RwLock;

use unnamed_entity::{EntityId, EntitySet, EntityVec, entity_id};

use crate::error::{InterchangeError, Result};

entity_id! {
    pub id StrId u32;
}

/// Order-preserving string-to-index table.
///
/// `index_of` inserts if absent; `object_at` is a pure lookup returning
/// `None` past the current size, which decode uses to detect dangling
/// references without panicking.
#[derive(Clone, Debug, Default)]
pub struct StringTable {
    strings: EntityVec<StrId, String>,
    lookup: HashMap<String, StrId>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from a decoded string list, preserving positions.
    pub fn from_vec(strings: Vec<String>) -> Self {
        let strings: EntityVec<StrId, String> = strings.into_iter().collect();
        let mut lookup = HashMap::with_capacity(strings.len());
        for (id, s) in &strings {
            lookup.entry(s.clone()).or_insert(id);
        }
        StringTable { strings, lookup }
    }

    pub fn index_of(&mut self, s: &str) -> StrId {
        match self.lookup.get(s) {
            Some(&id) => id,
            None => {
                let id = self.strings.push(s.to_string());
                self.lookup.insert(s.to_string(), id);
                id
            }
        }
    }

    pub fn object_at(&self, id: StrId) -> Option<&str> {
        self.strings.get(id).map(String::as_str)
    }

    /// Lookup for decode: a reference past the table is a structural error.
    pub fn get(&self, index: u32) -> Result<&str> {
        self.object_at(StrId::from_idx(index as usize))
            .ok_or(InterchangeError::DanglingIndex {
                kind: "string",
                index,
                len: self.strings.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn clear(&mut self) {
        self.strings.clear();
        self.lookup.clear();
    }

    pub fn into_vec(self) -> Vec<String> {
        self.strings.into_values().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrId, &str)> {
        self.strings.iter().map(|(id, s)| (id, s.as_str()))
    }
}

/// Concurrent variant of [`StringTable`] for parallel enumeration shards.
///
/// Concurrent `index_of` calls for the same key never observe two different
/// indices: the insert re-checks under the write lock.
#[derive(Debug, Default)]
pub struct SyncStringTable {
    inner: RwLock<StringTable>,
}

impl SyncStringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_of(&self, s: &str) -> StrId {
        if let Some(&id) = self.inner.read().unwrap().lookup.get(s) {
            return id;
        }
        let mut inner = self.inner.write().unwrap();
        inner.index_of(s)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn into_inner(self) -> StringTable {
        self.inner.into_inner().unwrap()
    }
}

impl From<StringTable> for SyncStringTable {
    fn from(table: StringTable) -> Self {
        SyncStringTable {
            inner: RwLock::new(table),
        }
    }
}

/// Packs a paired coordinate (tile index, wire index) into one 64-bit key.
pub fn pair_key(a: u32, b: u32) -> u64 {
    ((a as u64) << 32) | (b as u64)
}

/// Index table over packed 64-bit pair keys, for enumerating node and wire
/// identities without allocating per key.
#[derive(Clone, Debug, Default)]
pub struct PairTable<I: EntityId> {
    set: EntitySet<I, u64>,
}

impl<I: EntityId> PairTable<I> {
    pub fn new() -> Self {
        PairTable {
            set: EntitySet::new(),
        }
    }

    /// Inserts the pair if absent; the flag is true on first insertion.
    pub fn insert(&mut self, a: u32, b: u32) -> (I, bool) {
        self.set.insert(pair_key(a, b))
    }

    pub fn get(&self, a: u32, b: u32) -> Option<I> {
        self.set.get(&pair_key(a, b))
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn clear(&mut self) {
        self.set.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_stability() {
        let mut t = StringTable::new();
        let a = t.index_of("alpha");
        let b = t.index_of("beta");
        assert_ne!(a, b);
        assert_eq!(t.index_of("alpha"), a);
        assert_eq!(t.object_at(a), Some("alpha"));
        assert_eq!(t.object_at(StrId::from_idx(2)), None);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn clear_resets_both_directions() {
        let mut t = StringTable::new();
        t.index_of("alpha");
        t.clear();
        assert!(t.is_empty());
        let b = t.index_of("beta");
        assert_eq!(b, StrId::from_idx(0));
        assert_eq!(t.object_at(b), Some("beta"));
    }

    #[test]
    fn decode_roundtrip_preserves_positions() {
        let mut t = StringTable::new();
        t.index_of("x");
        t.index_of("y");
        let v = t.into_vec();
        let t2 = StringTable::from_vec(v);
        assert_eq!(t2.get(0).unwrap(), "x");
        assert_eq!(t2.get(1).unwrap(), "y");
        assert!(t2.get(2).is_err());
    }

    #[test]
    fn concurrent_index_of_is_race_free() {
        const THREADS: usize = 8;
        const KEYS: usize = 64;
        let table = SyncStringTable::new();
        std::thread::scope(|scope| {
            for t in 0..THREADS {
                let table = &table;
                scope.spawn(move || {
                    // each thread hits the keys in a different order
                    for i in 0..KEYS {
                        let k = (i * (t + 3)) % KEYS;
                        table.index_of(&format!("key{k}"));
                    }
                });
            }
        });
        let table = table.into_inner();
        assert_eq!(table.len(), KEYS);
        let mut indices: Vec<usize> = (0..KEYS)
            .map(|k| table.lookup[&format!("key{k}")].to_idx())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..KEYS).collect::<Vec<_>>());
    }

    #[test]
    fn pair_table_distinguishes_order() {
        let mut t: PairTable<StrId> = PairTable::new();
        let (a, fresh) = t.insert(1, 2);
        assert!(fresh);
        let (b, fresh) = t.insert(2, 1);
        assert!(fresh);
        assert_ne!(a, b);
        let (a2, fresh) = t.insert(1, 2);
        assert!(!fresh);
        assert_eq!(a, a2);
        assert_eq!(t.get(1, 2), Some(a));
        assert_eq!(t.get(3, 4), None);
    }
}
