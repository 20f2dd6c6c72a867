//! Reference-counted storage for contexts, drawables and share groups.
//!
//! Objects live in slots owned by the `Arena`; everyone else holds a
//! `Handle`, which is just a slot index plus the generation the slot had when
//! the object was inserted. Each holder is expected to `retain` once and
//! `release` once. The final release removes the object from the arena and
//! hands it back to the caller for teardown, and bumps the slot's generation
//! so stale handles resolve to nothing instead of to whatever reuses the slot.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

// Derives would require `T: Clone` etc.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    refs: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    pub fn new() -> Arena<T> {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store `value` with a reference count of zero. The caller should
    /// `retain` the handle as soon as it stores it anywhere.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.refs = 0;
                slot.value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    refs: 0,
                    value: Some(value),
                });
                (self.slots.len() - 1) as u32
            }
        };
        Handle {
            index,
            generation: self.slots[index as usize].generation,
            _marker: PhantomData,
        }
    }

    fn slot(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    fn slot_mut(&mut self, handle: Handle<T>) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slot_mut(handle).and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.slot(handle).is_some()
    }

    pub fn refs(&self, handle: Handle<T>) -> u32 {
        self.slot(handle).map_or(0, |slot| slot.refs)
    }

    /// Add a reference to `handle`. Return false if it is stale.
    pub fn retain(&mut self, handle: Handle<T>) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => {
                slot.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop a reference to `handle`. When that was the last one, remove the
    /// object and return it.
    ///
    /// Releasing a stale handle, or one nobody retained, is a bookkeeping bug
    /// in the caller; it trips a debug assertion and otherwise does nothing.
    pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = match self.slot_mut(handle) {
            Some(slot) => slot,
            None => {
                debug_assert!(false, "released stale handle {:?}", handle);
                return None;
            }
        };
        if slot.refs == 0 {
            debug_assert!(false, "released unretained handle {:?}", handle);
            return None;
        }
        slot.refs -= 1;
        if slot.refs > 0 {
            return None;
        }
        self.take(handle)
    }

    /// Remove the object at `handle` no matter how many references remain.
    pub fn take(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slot_mut(handle)?;
        let value = slot.value.take();
        slot.refs = 0;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        value
    }

    pub fn handles(&self) -> Vec<Handle<T>> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| Handle {
                index: index as u32,
                generation: slot.generation,
                _marker: PhantomData,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena::new()
    }
}

#[test]
fn test_refcounts() {
    let mut arena = Arena::new();
    let a = arena.insert("a");
    assert!(arena.retain(a));
    assert!(arena.retain(a));
    assert_eq!(arena.refs(a), 2);
    assert_eq!(arena.release(a), None);
    assert_eq!(arena.get(a), Some(&"a"));
    assert_eq!(arena.release(a), Some("a"));
    assert!(!arena.contains(a));

    // The slot is reused, but the old handle stays dead.
    let b = arena.insert("b");
    assert_ne!(a, b);
    assert_eq!(arena.get(a), None);
    assert_eq!(arena.get(b), Some(&"b"));
    assert!(!arena.retain(a));
    assert_eq!(arena.len(), 1);
}
