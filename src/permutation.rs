//! Output permutations.
//!
//! Instead of the sorted strings themselves, the permutation-producing
//! sorters emit for every output position the original home of that string:
//! its rank (`pe`) and local string index. Three variants exist: the simple
//! single-level form, a multi-level form holding one layer per grid level,
//! and a non-unique form where byte-equal strings may share a global rank.

use crate::container::{IndexedStr, StringContainer};

/// Parallel `(ranks, string_indices)` arrays: entry `i` identifies the
/// origin of the `i`-th output string of this rank.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Permutation {
    ranks: Vec<usize>,
    strings: Vec<usize>,
}

impl Permutation {
    pub fn new(ranks: Vec<usize>, strings: Vec<usize>) -> Self {
        assert_eq!(ranks.len(), strings.len());
        Permutation { ranks, strings }
    }

    /// Reads the origin members out of an indexed container.
    pub fn from_container(container: &StringContainer<IndexedStr>) -> Self {
        Permutation {
            ranks: container.descs().iter().map(|d| d.pe).collect(),
            strings: container.descs().iter().map(|d| d.index).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn rank(&self, i: usize) -> usize {
        self.ranks[i]
    }

    pub fn string(&self, i: usize) -> usize {
        self.strings[i]
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn strings(&self) -> &[usize] {
        &self.strings
    }

    pub fn append(&mut self, other: &Permutation) {
        self.ranks.extend_from_slice(&other.ranks);
        self.strings.extend_from_slice(&other.strings);
    }
}

/// One permutation layer per grid level. Level `k + 1` entries index into
/// the output of level `k`; `flatten` resolves the chain back to level 0.
#[derive(Debug, Default, Clone)]
pub struct MultiLevelPermutation {
    levels: Vec<Permutation>,
}

impl MultiLevelPermutation {
    pub fn push_level(&mut self, level: Permutation) {
        self.levels.push(level);
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, k: usize) -> &Permutation {
        &self.levels[k]
    }

    /// Composes the layers into a simple permutation. Only valid when the
    /// referenced entries of every level live on this rank (used in tests
    /// and by the single-rank fallbacks; the distributed sorters keep the
    /// origin members attached to the descriptors instead).
    pub fn flatten(&self) -> Permutation {
        let Some((first, rest)) = self.levels.split_first() else {
            return Permutation::default();
        };
        let mut current = first.clone();
        for level in rest {
            let ranks = level.strings().iter().map(|&i| current.rank(i)).collect();
            let strings = level.strings().iter().map(|&i| current.string(i)).collect();
            current = Permutation::new(ranks, strings);
        }
        current
    }
}

/// A permutation over inputs that may contain byte-equal strings: entries
/// carry a global rank that equal strings share.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NonUniquePermutation {
    origin: Permutation,
    global_ranks: Vec<usize>,
}

impl NonUniquePermutation {
    pub fn new(origin: Permutation, global_ranks: Vec<usize>) -> Self {
        assert_eq!(origin.len(), global_ranks.len());
        NonUniquePermutation {
            origin,
            global_ranks,
        }
    }

    pub fn len(&self) -> usize {
        self.origin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origin.is_empty()
    }

    pub fn origin(&self) -> &Permutation {
        &self.origin
    }

    pub fn global_ranks(&self) -> &[usize] {
        &self.global_ranks
    }
}
