// Copyright 2025 the archetype_query authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-width component signatures.
//!
//! A signature is the bitset identity of a component-type set, keyed by the
//! dense indices handed out by the component registry. Subset and superset
//! checks are word-wise AND comparisons, which is what keeps archetype
//! matching cheap on the query hot path.

use crate::component::ComponentId;

/// Upper bound on distinct component types per process.
pub const MAX_COMPONENT_TYPES: usize = 256;

const WORDS: usize = MAX_COMPONENT_TYPES / 64;

/// Component-type set as a fixed-width bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    words: [u64; WORDS],
}

impl Signature {
    /// Empty signature
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Signature containing exactly the given ids
    pub fn from_ids(ids: &[ComponentId]) -> Self {
        let mut sig = Self::new();
        for &id in ids {
            sig.insert(id);
        }
        sig
    }

    #[inline]
    fn split(id: ComponentId) -> (usize, u64) {
        let index = id.index();
        debug_assert!(index < MAX_COMPONENT_TYPES, "component id out of signature range");
        (index / 64, 1u64 << (index % 64))
    }

    /// Set the bit for `id`.
    #[inline]
    pub fn insert(&mut self, id: ComponentId) {
        let (word, bit) = Self::split(id);
        self.words[word] |= bit;
    }

    /// Clear the bit for `id`.
    #[inline]
    pub fn remove(&mut self, id: ComponentId) {
        let (word, bit) = Self::split(id);
        self.words[word] &= !bit;
    }

    /// Membership test.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        let (word, bit) = Self::split(id);
        self.words[word] & bit != 0
    }

    /// True if every bit of `self` is also set in `other`.
    #[inline]
    pub fn is_subset_of(&self, other: &Signature) -> bool {
        for i in 0..WORDS {
            if self.words[i] & other.words[i] != self.words[i] {
                return false;
            }
        }
        true
    }

    /// True if every bit of `other` is also set in `self`.
    #[inline]
    pub fn is_superset_of(&self, other: &Signature) -> bool {
        other.is_subset_of(self)
    }

    /// Union of two signatures.
    #[inline]
    pub fn union(&self, other: &Signature) -> Signature {
        let mut words = [0u64; WORDS];
        for i in 0..WORDS {
            words[i] = self.words[i] | other.words[i];
        }
        Signature { words }
    }

    /// Copy of `self` with `id` set.
    pub fn with(&self, id: ComponentId) -> Signature {
        let mut sig = *self;
        sig.insert(id);
        sig
    }

    /// Copy of `self` with `id` cleared.
    pub fn without(&self, id: ComponentId) -> Signature {
        let mut sig = *self;
        sig.remove(id);
        sig
    }

    /// Number of set bits.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterate set bits as component ids, ascending.
    pub fn iter(&self) -> SignatureIter<'_> {
        SignatureIter {
            words: &self.words,
            word_idx: 0,
            current_word: self.words[0],
        }
    }
}

pub struct SignatureIter<'a> {
    words: &'a [u64; WORDS],
    word_idx: usize,
    current_word: u64,
}

impl Iterator for SignatureIter<'_> {
    type Item = ComponentId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let trailing = self.current_word.trailing_zeros();
                self.current_word &= !(1 << trailing); // Clear the bit we just found
                return Some(ComponentId((self.word_idx * 64 + trailing as usize) as u16));
            }

            self.word_idx += 1;
            if self.word_idx >= WORDS {
                return None;
            }
            self.current_word = self.words[self.word_idx];
        }
    }
}
