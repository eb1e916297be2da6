//! Owned per-channel buffers keyed by a dense index type.

use crate::index::{DenseIndex, TwrNum, XtalScoped};
use crate::{Error, Result};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A contiguous buffer with exactly one slot per index of `I`.
///
/// Only `I` can index the buffer, so a per-face array can never be read with
/// a range index by mistake.
#[derive(Debug, Clone, PartialEq)]
pub struct IdxArray<I, T> {
    data: Vec<T>,
    _idx: PhantomData<fn() -> I>,
}

impl<I: DenseIndex, T: Clone> IdxArray<I, T> {
    /// Creates an array with every slot set to `value`.
    #[must_use]
    pub fn filled(value: T) -> Self {
        Self {
            data: vec![value; I::COUNT],
            _idx: PhantomData,
        }
    }

    /// Resets every slot to `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<I: DenseIndex, T> IdxArray<I, T> {
    /// Creates an array by evaluating `f` for every index.
    pub fn from_fn(mut f: impl FnMut(I) -> T) -> Self {
        Self {
            data: I::all().map(&mut f).collect(),
            _idx: PhantomData,
        }
    }

    /// Number of slots (always `I::COUNT`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates `(index, value)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        I::all().zip(self.data.iter())
    }

    /// Raw slot storage.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<I: DenseIndex, T> IdxArray<I, Option<T>> {
    /// Creates an array with every slot empty.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_fn(|_| None)
    }

    /// Returns the populated slots.
    pub fn populated(&self) -> impl Iterator<Item = (I, &T)> {
        self.iter().filter_map(|(i, v)| v.as_ref().map(|v| (i, v)))
    }

    /// Returns the slot for `idx`, creating it with `init` if empty.
    pub fn get_or_insert_with(&mut self, idx: I, init: impl FnOnce() -> T) -> &mut T {
        self.data[idx.val()].get_or_insert_with(init)
    }
}

impl<I: XtalScoped, T> IdxArray<I, Option<T>> {
    /// Empty slots belonging to the given towers, in index order.
    pub fn missing<'a>(&'a self, towers: &'a [TwrNum]) -> impl Iterator<Item = I> + 'a {
        self.iter()
            .filter(move |(i, v)| v.is_none() && towers.contains(&i.owning_xtal().twr()))
            .map(|(i, _)| i)
    }

    /// Checks every slot of the given towers is populated.
    ///
    /// # Errors
    /// Returns [`Error::UnpopulatedChannel`] naming the first empty slot.
    pub fn check_complete(&self, table: &'static str, towers: &[TwrNum]) -> Result<()> {
        match self.missing(towers).next() {
            Some(idx) => Err(Error::UnpopulatedChannel {
                table,
                channel: idx.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Returns the populated slot for `idx`.
    ///
    /// # Errors
    /// Returns [`Error::UnpopulatedChannel`] if the slot is empty.
    pub fn require(&self, table: &'static str, idx: I) -> Result<&T> {
        self[idx].as_ref().ok_or_else(|| Error::UnpopulatedChannel {
            table,
            channel: idx.to_string(),
        })
    }
}

impl<I: DenseIndex, T> Index<I> for IdxArray<I, T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: I) -> &T {
        &self.data[idx.val()]
    }
}

impl<I: DenseIndex, T> IndexMut<I> for IdxArray<I, T> {
    #[inline]
    fn index_mut(&mut self, idx: I) -> &mut T {
        &mut self.data[idx.val()]
    }
}
