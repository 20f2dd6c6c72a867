//! Mapping from the object names recorded in a trace to live driver names.
//!
//! GL object names are small integers handed out densely by the driver, so
//! nearly every lookup lands in a flat vector indexed by the recorded name.
//! Names at or above `KEY_LIMIT` are rare, and go to a hash table instead.
//!
//! There is no removal: deleting an object overwrites its entry with the
//! sentinel. A recorded name that was never set reads back as the sentinel
//! too, which is what the replay wants when the trace refers to an object
//! that failed to be created on the capture device.

use std::collections::HashMap;

/// Recorded names below this are stored in the flat vector.
pub const KEY_LIMIT: u32 = 10 * 1024;

const INITIAL_LEN: usize = 128;

#[derive(Clone, Debug)]
pub struct HandleMap<T> {
    dense: Vec<T>,
    sparse: HashMap<u32, T>,
    sentinel: T,
}

impl<T: Copy + PartialEq> HandleMap<T> {
    /// Return an empty map whose absent entries read as `sentinel`.
    pub fn with_sentinel(sentinel: T) -> HandleMap<T> {
        HandleMap {
            dense: Vec::new(),
            sparse: HashMap::new(),
            sentinel,
        }
    }

    pub fn sentinel(&self) -> T {
        self.sentinel
    }

    /// Return the live value for `key`, or the sentinel.
    #[inline]
    pub fn get(&self, key: u32) -> T {
        if key < KEY_LIMIT {
            match self.dense.get(key as usize) {
                Some(value) => *value,
                None => self.sentinel,
            }
        } else {
            self.sparse.get(&key).copied().unwrap_or(self.sentinel)
        }
    }

    pub fn set(&mut self, key: u32, value: T) {
        *self.lvalue(key) = value;
    }

    /// Return a mutable reference to the entry for `key`, creating it (as the
    /// sentinel) if needed.
    pub fn lvalue(&mut self, key: u32) -> &mut T {
        if key < KEY_LIMIT {
            let index = key as usize;
            if index >= self.dense.len() {
                self.grow(index);
            }
            &mut self.dense[index]
        } else {
            let sentinel = self.sentinel;
            self.sparse.entry(key).or_insert(sentinel)
        }
    }

    /// True if `key` maps to something other than the sentinel.
    pub fn is_live(&self, key: u32) -> bool {
        self.get(key) != self.sentinel
    }

    /// Overwrite the entry for `key` with the sentinel, returning the old value.
    pub fn forget(&mut self, key: u32) -> T {
        let sentinel = self.sentinel;
        std::mem::replace(self.lvalue(key), sentinel)
    }

    /// Return every live `(recorded, live)` pair, in no particular order.
    pub fn live_entries(&self) -> Vec<(u32, T)> {
        let dense = self
            .dense
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != self.sentinel)
            .map(|(key, value)| (key as u32, *value));
        let sparse = self
            .sparse
            .iter()
            .filter(|(_, value)| **value != self.sentinel)
            .map(|(key, value)| (*key, *value));
        dense.chain(sparse).collect()
    }

    /// Find the recorded name currently mapped to `value`.
    pub fn reverse_lookup(&self, value: T) -> Option<u32> {
        if value == self.sentinel {
            return None;
        }
        if let Some(key) = self.dense.iter().position(|v| *v == value) {
            return Some(key as u32);
        }
        self.sparse
            .iter()
            .find(|(_, v)| **v == value)
            .map(|(key, _)| *key)
    }

    pub fn clear(&mut self) {
        self.dense.clear();
        self.sparse.clear();
    }

    fn grow(&mut self, index: usize) {
        // Round up to the next power of two past `index`, then leave a
        // generous margin so a run of fresh names doesn't resize every time.
        let mut len = INITIAL_LEN.max(self.dense.len());
        while len <= index {
            len <<= 1;
        }
        let len = (len << 2).min(KEY_LIMIT as usize);
        self.dense.resize(len, self.sentinel);
    }
}

impl<T: Copy + PartialEq + Default> Default for HandleMap<T> {
    fn default() -> HandleMap<T> {
        HandleMap::with_sentinel(T::default())
    }
}

#[test]
fn test_round_trip() {
    let mut map: HandleMap<u32> = HandleMap::default();
    for key in (0..1_000_000).step_by(7) {
        map.set(key, key ^ 0x5a5a_5a5a);
    }
    for key in 0..1_000_000 {
        let expected = if key % 7 == 0 { key ^ 0x5a5a_5a5a } else { 0 };
        assert_eq!(map.get(key), expected, "key {}", key);
    }
}

#[test]
fn test_dense_and_sparse() {
    let mut map: HandleMap<u32> = HandleMap::default();
    assert_eq!(map.get(5), 0);
    assert_eq!(map.get(KEY_LIMIT + 5), 0);

    map.set(5, 50);
    map.set(KEY_LIMIT - 1, 60);
    map.set(KEY_LIMIT, 70);
    map.set(u32::max_value(), 80);

    assert_eq!(map.get(5), 50);
    assert_eq!(map.get(KEY_LIMIT - 1), 60);
    assert_eq!(map.get(KEY_LIMIT), 70);
    assert_eq!(map.get(u32::max_value()), 80);
    assert!(map.dense.len() <= KEY_LIMIT as usize);
    assert_eq!(map.sparse.len(), 2);

    let mut live = map.live_entries();
    live.sort();
    assert_eq!(
        live,
        vec![(5, 50), (KEY_LIMIT - 1, 60), (KEY_LIMIT, 70), (u32::max_value(), 80)]
    );
}

#[test]
fn test_forget_and_sentinel() {
    let mut map = HandleMap::with_sentinel(1_u32);
    assert_eq!(map.get(0), 1);
    map.set(3, 9);
    assert!(map.is_live(3));
    assert_eq!(map.reverse_lookup(9), Some(3));
    assert_eq!(map.forget(3), 9);
    assert!(!map.is_live(3));
    assert_eq!(map.get(3), 1);
    assert_eq!(map.reverse_lookup(9), None);
}
