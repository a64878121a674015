//! Runtime sort configuration.
//!
//! The original design selected the combination of sampler, alltoall routine,
//! Golomb mode and compression flags through deep compile-time policy
//! nesting. Here a single configuration record is validated once at startup
//! and dispatched through runtime enums at the sort-call entry points.

use crate::error::{Error, Result};

/// Splitter sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplePolicy {
    /// Every k-th string.
    #[default]
    Strings,
    /// Every k-th character boundary.
    Chars,
    /// Every k-th string, tie-broken by global string index.
    IndexedStrings,
    /// Every k-th character boundary, tie-broken by global string index.
    IndexedChars,
}

impl SamplePolicy {
    pub fn is_indexed(self) -> bool {
        matches!(self, SamplePolicy::IndexedStrings | SamplePolicy::IndexedChars)
    }

    pub fn name(self) -> &'static str {
        match self {
            SamplePolicy::Strings => "strings",
            SamplePolicy::Chars => "chars",
            SamplePolicy::IndexedStrings => "indexed-strings",
            SamplePolicy::IndexedChars => "indexed-chars",
        }
    }
}

/// Golomb coding of the hash exchanges during duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GolombMode {
    #[default]
    None,
    Sequential,
    /// Reserved; rejected by [`SortConfig::validate`].
    Pipelined,
}

impl GolombMode {
    pub fn name(self) -> &'static str {
        match self {
            GolombMode::None => "none",
            GolombMode::Sequential => "sequential",
            GolombMode::Pipelined => "pipelined",
        }
    }
}

/// Which alltoallv flavor moves the string payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllToAllRoutine {
    /// One plain alltoallv.
    Small,
    /// Pairwise point-to-point exchange.
    Direct,
    /// Alltoallv, chunked when the payload exceeds the per-call limit.
    #[default]
    Combined,
}

impl AllToAllRoutine {
    pub fn name(self) -> &'static str {
        match self {
            AllToAllRoutine::Small => "small",
            AllToAllRoutine::Direct => "direct",
            AllToAllRoutine::Combined => "combined",
        }
    }
}

/// Output permutation flavor of the space-efficient sorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermutationKind {
    /// One unique global rank per string.
    Simple,
    /// Tracked per grid level; ranks are materialized like `Simple`.
    #[default]
    MultiLevel,
    /// Byte-equal strings share the rank of their first occurrence.
    NonUnique,
}

impl PermutationKind {
    pub fn name(self) -> &'static str {
        match self {
            PermutationKind::Simple => "simple",
            PermutationKind::MultiLevel => "multi-level",
            PermutationKind::NonUnique => "non-unique",
        }
    }
}

/// All knobs of one sort invocation.
#[derive(Debug, Clone)]
pub struct SortConfig {
    pub lcp_compression: bool,
    pub prefix_compression: bool,
    pub prefix_doubling: bool,
    pub golomb: GolombMode,
    pub alltoall: AllToAllRoutine,
    pub sample: SamplePolicy,
    /// Oversampling factor: `factor * num_partitions` candidates per rank.
    pub sampling_factor: usize,
    /// First probe depth of the prefix-doubling filter.
    pub init_depth: usize,
    /// Strictly decreasing group sizes for the multi-level grid.
    pub levels: Vec<usize>,
    /// Byte budget per quantile in the space-efficient sorter.
    pub quantile_size: usize,
    /// Permutation flavor emitted by the space-efficient sorter.
    pub permutation: PermutationKind,
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            lcp_compression: false,
            prefix_compression: false,
            prefix_doubling: false,
            golomb: GolombMode::None,
            alltoall: AllToAllRoutine::Combined,
            sample: SamplePolicy::Strings,
            sampling_factor: 2,
            init_depth: 8,
            levels: Vec::new(),
            quantile_size: 100 * 1024 * 1024,
            permutation: PermutationKind::default(),
        }
    }
}

impl SortConfig {
    /// Checks flag combinations that cannot be expressed as types anymore.
    pub fn validate(&self) -> Result<()> {
        if self.prefix_compression && !self.lcp_compression {
            return Err(Error::config(
                "prefix compression requires LCP compression",
            ));
        }
        if self.golomb == GolombMode::Pipelined {
            return Err(Error::config("pipelined golomb coding is reserved"));
        }
        if self.sampling_factor == 0 {
            return Err(Error::config("sampling factor must be positive"));
        }
        if self.init_depth == 0 {
            return Err(Error::config("initial probe depth must be positive"));
        }
        if self.quantile_size == 0 {
            return Err(Error::config("quantile size must be positive"));
        }
        if !self.levels.windows(2).all(|w| w[0] > w[1]) {
            return Err(Error::config("group sizes must be strictly decreasing"));
        }
        if self.levels.iter().any(|&l| l < 2) {
            return Err(Error::config("group sizes must be at least 2"));
        }
        Ok(())
    }

    /// Drops schedule entries that do not split `num_ranks` and checks the
    /// divisibility chain (every level must partition its predecessor into
    /// equal-size groups).
    pub fn effective_levels(&self, num_ranks: usize) -> Result<Vec<usize>> {
        let levels: Vec<usize> = self
            .levels
            .iter()
            .copied()
            .filter(|&l| l < num_ranks)
            .collect();
        let mut prev = num_ranks;
        for &level in &levels {
            if prev % level != 0 {
                return Err(Error::config(format!(
                    "group size {level} does not divide {prev}"
                )));
            }
            prev = level;
        }
        Ok(levels)
    }
}
