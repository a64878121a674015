//! Shared-memory string sorting for one rank.
//!
//! The distributed sorter treats this as a building block: sort the local
//! strings and fill the LCP array. Descriptors are sorted against the arena
//! with rayon's parallel pdqsort; the thread parallelism stays invisible to
//! the rest of the crate, which only ever sees a sorted container.

use rayon::prelude::*;

use crate::container::{lcp, StringDesc, StringLcpContainer};

/// Sorts the container lexicographically and recomputes its LCP array.
pub fn sort_with_lcps<D: StringDesc>(container: &mut StringLcpContainer<D>) {
    {
        let (arena, descs) = container.container_mut().arena_and_descs_mut();
        descs.par_sort_unstable_by(|a, b| {
            let left = &arena[a.offset()..a.offset() + a.len()];
            let right = &arena[b.offset()..b.offset() + b.len()];
            left.cmp(right)
        });
    }
    let lcps = compute_lcps(container);
    container.set_lcps(lcps);
}

/// LCPs of adjacent strings in descriptor order (`lcps[0] == 0`).
pub fn compute_lcps<D: StringDesc>(container: &StringLcpContainer<D>) -> Vec<usize> {
    let inner = container.container();
    (0..inner.len())
        .map(|i| {
            if i == 0 {
                0
            } else {
                lcp(inner.bytes(i - 1), inner.bytes(i))
            }
        })
        .collect()
}
