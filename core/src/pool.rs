//! Fixed-capacity, index-addressed pools.
//!
//! [`FixedPool<T>`] is a bounded arena sized once at construction. Entries are
//! addressed by a caller-chosen index, writes to an index overwrite the slot in
//! place, and any index at or beyond the capacity is rejected with
//! [`PoolOverflow`] without touching the pool.
//!
//! The pool mirrors GPU descriptor arrays whose length is fixed when the
//! descriptor layout is created, so it never grows. It tracks the range of
//! slots written since the last upload so that only that range has to be
//! copied to the device. Raising the high-water mark also dirties the
//! default-initialized slots below the new index: a reader sees every slot up
//! to the high-water mark, so none of them may hold stale device contents.
//!
//! # Example
//!
//! ```
//! use vista_core::pool::{FixedPool, PoolLifetime};
//!
//! let mut pool = FixedPool::<u32>::new("lights", 4, PoolLifetime::PerFrame);
//! pool.insert(2, 7).unwrap();
//! assert_eq!(pool.get(2), Some(&7));
//! assert_eq!(pool.high_water(), 3);
//! assert!(pool.insert(4, 1).is_err());
//! assert_eq!(pool.take_dirty(), Some(0..3));
//! pool.insert(1, 9).unwrap();
//! assert_eq!(pool.take_dirty(), Some(1..2));
//! ```

use std::fmt;
use std::ops::Range;

/// How long pool contents stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolLifetime {
    /// Contents survive across frames until overwritten.
    Persistent,
    /// Contents are cleared at the start of every frame.
    PerFrame,
}

/// An index was outside the pool's fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolOverflow {
    /// Rejected index.
    pub index: u32,
    /// Pool capacity.
    pub capacity: u32,
}

impl fmt::Display for PoolOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "index {} exceeds pool capacity {}",
            self.index, self.capacity
        )
    }
}

impl std::error::Error for PoolOverflow {}

/// A bounded, index-addressed arena.
#[derive(Clone)]
pub struct FixedPool<T> {
    label: &'static str,
    lifetime: PoolLifetime,
    slots: Box<[T]>,
    occupied: Box<[bool]>,
    len: u32,
    high_water: u32,
    dirty: Option<Range<u32>>,
}

impl<T: Copy + Default> FixedPool<T> {
    /// Create a pool with `capacity` default-initialized slots.
    pub fn new(label: &'static str, capacity: u32, lifetime: PoolLifetime) -> Self {
        Self {
            label,
            lifetime,
            slots: vec![T::default(); capacity as usize].into_boxed_slice(),
            occupied: vec![false; capacity as usize].into_boxed_slice(),
            len: 0,
            high_water: 0,
            dirty: None,
        }
    }

    /// Debug label of the pool.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Lifetime policy of the pool.
    pub fn lifetime(&self) -> PoolLifetime {
        self.lifetime
    }

    /// Fixed capacity of the pool.
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of occupied slots.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the highest occupied index.
    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    /// Write `value` at `index`, returning the previous value if the slot was occupied.
    pub fn insert(&mut self, index: u32, value: T) -> Result<Option<T>, PoolOverflow> {
        self.check(index)?;

        let i = index as usize;
        let previous = if self.occupied[i] {
            Some(self.slots[i])
        } else {
            self.occupied[i] = true;
            self.len += 1;
            None
        };

        self.slots[i] = value;
        let start = index.min(self.high_water);
        self.high_water = self.high_water.max(index + 1);
        self.mark_dirty(start..index + 1);
        Ok(previous)
    }

    /// Write `value` at the next index after the highest occupied one.
    pub fn push(&mut self, value: T) -> Result<u32, PoolOverflow> {
        let index = self.high_water;
        self.insert(index, value)?;
        Ok(index)
    }

    /// Get the value at `index` if the slot is occupied.
    pub fn get(&self, index: u32) -> Option<&T> {
        let i = index as usize;
        if i < self.slots.len() && self.occupied[i] {
            Some(&self.slots[i])
        } else {
            None
        }
    }

    /// Whether `index` holds a value.
    pub fn contains(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    /// Slots `0..high_water`, with unoccupied slots default-initialized.
    pub fn active_slice(&self) -> &[T] {
        &self.slots[..self.high_water as usize]
    }

    /// Slots in `range`, default-initialized where unoccupied.
    ///
    /// # Panics
    ///
    /// Panics if `range` reaches beyond the capacity.
    pub fn slice(&self, range: Range<u32>) -> &[T] {
        &self.slots[range.start as usize..range.end as usize]
    }

    /// Iterate over occupied slots as `(index, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots[..self.high_water as usize]
            .iter()
            .zip(self.occupied.iter())
            .enumerate()
            .filter(|(_, (_, occupied))| **occupied)
            .map(|(i, (value, _))| (i as u32, value))
    }

    /// Remove every entry. Capacity is kept and nothing is marked dirty; the
    /// cleared slots are dirtied again once a later write reaches past them.
    pub fn clear(&mut self) {
        self.slots[..self.high_water as usize].fill(T::default());
        self.occupied[..self.high_water as usize].fill(false);
        self.len = 0;
        self.high_water = 0;
        self.dirty = None;
    }

    /// Take the range of slots written since the last call.
    pub fn take_dirty(&mut self) -> Option<Range<u32>> {
        self.dirty.take()
    }

    /// Peek at the pending dirty range.
    pub fn dirty(&self) -> Option<Range<u32>> {
        self.dirty.clone()
    }

    /// Mark every slot up to the high-water mark as needing upload.
    pub fn mark_all_dirty(&mut self) {
        if self.high_water > 0 {
            self.mark_dirty(0..self.high_water);
        }
    }

    fn check(&self, index: u32) -> Result<(), PoolOverflow> {
        if index >= self.capacity() {
            return Err(PoolOverflow {
                index,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn mark_dirty(&mut self, range: Range<u32>) {
        self.dirty = Some(match self.dirty.take() {
            Some(d) => d.start.min(range.start)..d.end.max(range.end),
            None => range,
        });
    }
}

impl<T> fmt::Debug for FixedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("label", &self.label)
            .field("lifetime", &self.lifetime)
            .field("capacity", &self.slots.len())
            .field("len", &self.len)
            .field("high_water", &self.high_water)
            .field("dirty", &self.dirty)
            .finish()
    }
}
