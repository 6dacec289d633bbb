//! Generational Arena
//!
//! Nodes, edge logs, and clocks reference each other by index rather than by
//! pointer. Each index carries a generation so a handle to a removed entry
//! becomes stale instead of silently aliasing whatever later reuses the slot.
//! Vacated slots go on a free list and are handed out again by `insert`.

use std::fmt;
use std::marker::PhantomData;

/// A typed handle into an [`Arena`].
pub trait ArenaKey: Copy + Eq {
    /// Build a key from a slot index and generation.
    fn from_parts(index: u32, generation: u32) -> Self;
    /// The slot index.
    fn index(self) -> u32;
    /// The generation the slot had when this key was issued.
    fn generation(self) -> u32;
}

macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl ArenaKey for $name {
            #[inline]
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            #[inline]
            fn index(self) -> u32 {
                self.index
            }

            #[inline]
            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}@gen{})", stringify!($name), self.index, self.generation)
            }
        }
    };
}

arena_key!(
    /// Handle to a computation node.
    NodeId
);
arena_key!(
    /// Handle to an edge log (the reader fan-out of one source).
    LogId
);
arena_key!(
    /// Handle to a batching clock.
    ClockId
);

struct Entry<V> {
    generation: u32,
    value: Option<V>,
}

/// Slot storage with free-list reuse and generation-checked access.
pub struct Arena<K, V> {
    entries: Vec<Entry<V>>,
    free: Vec<u32>,
    len: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K: ArenaKey, V> Arena<K, V> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    /// Store `value`, reusing a vacated slot when one is available.
    pub fn insert(&mut self, value: V) -> K {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            return K::from_parts(index, entry.generation);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        K::from_parts(index, 0)
    }

    /// Remove the entry behind `key`. Returns `None` if the key is stale.
    pub fn remove(&mut self, key: K) -> Option<V> {
        let entry = self.entries.get_mut(key.index() as usize)?;
        if entry.generation != key.generation() {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(key.index());
        self.len -= 1;
        Some(value)
    }

    /// Borrow the entry behind `key`, if it is still live.
    #[inline]
    pub fn get(&self, key: K) -> Option<&V> {
        let entry = self.entries.get(key.index() as usize)?;
        if entry.generation != key.generation() {
            return None;
        }
        entry.value.as_ref()
    }

    /// Mutably borrow the entry behind `key`, if it is still live.
    #[inline]
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let entry = self.entries.get_mut(key.index() as usize)?;
        if entry.generation != key.generation() {
            return None;
        }
        entry.value.as_mut()
    }

    /// Whether `key` still refers to a live entry.
    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live entries.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry
                .value
                .as_ref()
                .map(|value| (K::from_parts(index as u32, entry.generation), value))
        })
    }

    /// Iterate over live entries mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> {
        self.entries.iter_mut().enumerate().filter_map(|(index, entry)| {
            let generation = entry.generation;
            entry
                .value
                .as_mut()
                .map(|value| (K::from_parts(index as u32, generation), value))
        })
    }
}

impl<K: ArenaKey, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
