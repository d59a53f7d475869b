// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Growable bit-vector over target indices with O(1) set-count tracking.
//!
//! A [`Mask`] is kept parallel to an ordered target list. It is used both to
//! select which targets of a request participate in an operation and to
//! record which targets currently carry a non-good status.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Mask
// =============================================================================

/// A bit-vector parallel to a target list.
///
/// `set`/`unset` auto-grow the vector when the index is out of range, filling
/// new slots with `false`. The number of set bits is maintained
/// incrementally, so `set_count` is O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    bits: Vec<bool>,
    set_count: usize,
}

impl Mask {
    /// Creates an empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mask of `size` bits, all unset.
    pub fn with_size(size: usize) -> Self {
        Self {
            bits: vec![false; size],
            set_count: 0,
        }
    }

    /// Creates a mask of `size` bits, all set.
    pub fn all_set(size: usize) -> Self {
        Self {
            bits: vec![true; size],
            set_count: size,
        }
    }

    /// Returns the number of bits the mask describes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Returns `true` if the mask describes zero bits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns `true` if the bit at `index` is set.
    ///
    /// Out-of-range indices read as unset.
    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    /// Returns the number of set bits.
    #[inline]
    pub fn set_count(&self) -> usize {
        self.set_count
    }

    /// Returns the number of unset bits.
    #[inline]
    pub fn unset_count(&self) -> usize {
        self.bits.len() - self.set_count
    }

    /// Returns `true` if at least one bit is set.
    #[inline]
    pub fn any_set(&self) -> bool {
        self.set_count > 0
    }

    /// Sets the bit at `index`, growing the mask if necessary.
    pub fn set(&mut self, index: usize) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        if !self.bits[index] {
            self.bits[index] = true;
            self.set_count += 1;
        }
    }

    /// Unsets the bit at `index`, growing the mask if necessary.
    pub fn unset(&mut self, index: usize) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
            return;
        }
        if self.bits[index] {
            self.bits[index] = false;
            self.set_count -= 1;
        }
    }

    /// Assigns the bit at `index`, growing the mask if necessary.
    pub fn assign(&mut self, index: usize, value: bool) {
        if value {
            self.set(index);
        } else {
            self.unset(index);
        }
    }

    /// Resizes the mask to `size` bits.
    ///
    /// Growing fills with `false`. Shrinking recounts the set bits, the only
    /// operation that rescans the vector.
    pub fn resize(&mut self, size: usize) {
        if size < self.bits.len() {
            self.bits.truncate(size);
            self.set_count = self.bits.iter().filter(|b| **b).count();
        } else {
            self.bits.resize(size, false);
        }
    }

    /// Logical AND with another mask, over the shorter of the two lengths.
    pub fn and(&self, other: &Mask) -> Mask {
        let len = self.bits.len().min(other.bits.len());
        let mut out = Mask::with_size(len);
        for i in 0..len {
            if self.bits[i] && other.bits[i] {
                out.bits[i] = true;
                out.set_count += 1;
            }
        }
        out
    }

    /// Iterates over the indices of set bits, in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in &self.bits {
            f.write_str(if *bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromIterator<bool> for Mask {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let bits: Vec<bool> = iter.into_iter().collect();
        let set_count = bits.iter().filter(|b| **b).count();
        Self { bits, set_count }
    }
}

// =============================================================================
// Tests
// =============================================================================
