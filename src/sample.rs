//! Splitter sampling and partition computation.
//!
//! Every rank draws `factor * num_partitions` splitter candidates from its
//! sorted container using one of four policies, the candidates are gathered
//! into a distributed splitter array and sorted identically on every rank,
//! and `num_partitions - 1` evenly spaced splitters are chosen. Local
//! strings are then mapped to their bucket by binary search; a string goes
//! into the bucket of the first splitter it compares less-or-equal to, so
//! `sum(send_counts)` always equals the local string count.

use crate::comm::Communicator;
use crate::config::SamplePolicy;
use crate::container::{IndexedStr, StringContainer, StringDesc, StringLcpContainer};
use crate::measure::Measurements;

/// Positions of the local sample for the given policy.
fn sample_positions<D: StringDesc>(
    container: &StringLcpContainer<D>,
    policy: SamplePolicy,
    nr_samples: usize,
) -> Vec<usize> {
    let n = container.len();
    if n == 0 || nr_samples == 0 {
        return Vec::new();
    }
    match policy {
        SamplePolicy::Strings | SamplePolicy::IndexedStrings => (1..=nr_samples)
            .map(|j| (j * n / (nr_samples + 1)).min(n - 1))
            .collect(),
        SamplePolicy::Chars | SamplePolicy::IndexedChars => {
            let total: usize = container.container().sum_len();
            let spacing = (total / (nr_samples + 1)).max(1);
            let mut positions = Vec::with_capacity(nr_samples);
            let mut accumulated = 0;
            let mut next = spacing;
            for i in 0..n {
                accumulated += container.bytes(i).len();
                while accumulated >= next && positions.len() < nr_samples {
                    positions.push(i);
                    next += spacing;
                }
            }
            positions
        }
    }
}

/// The gathered and locally re-sorted splitter array: plain bytes, plus the
/// sampled global string indices for the indexed policies.
struct SplitterArray {
    container: StringContainer<IndexedStr>,
}

impl SplitterArray {
    fn gather_and_sort<D: StringDesc, C: Communicator>(
        container: &StringLcpContainer<D>,
        positions: &[usize],
        policy: SamplePolicy,
        global_offset: usize,
        comm: &C,
    ) -> Self {
        let mut sample_arena = Vec::new();
        let mut sample_indices = Vec::with_capacity(positions.len());
        for &pos in positions {
            sample_arena.extend_from_slice(container.bytes(pos));
            sample_arena.push(0);
            sample_indices.push((global_offset + pos) as u64);
        }

        let gathered = comm.allgatherv(&sample_arena);
        let mut splitters: StringContainer<IndexedStr> = StringContainer::from_arena(gathered);
        if policy.is_indexed() {
            let indices = comm.allgatherv(&sample_indices);
            assert_eq!(indices.len(), splitters.len());
            for (desc, &index) in splitters.descs_mut().iter_mut().zip(&indices) {
                desc.index = index as usize;
            }
        }

        // Identical input on every rank, so an identical local sort replaces
        // the distributed splitter sort of the gathered array.
        let (arena, descs) = splitters.arena_and_descs_mut();
        descs.sort_unstable_by(|a, b| {
            let left = &arena[a.offset..a.offset + a.len];
            let right = &arena[b.offset..b.offset + b.len];
            left.cmp(right).then(a.index.cmp(&b.index))
        });
        SplitterArray {
            container: splitters,
        }
    }

    /// Chooses `num_partitions - 1` evenly spaced splitters. Strings equal
    /// to a splitter go into the bucket left of it, so the pick is biased
    /// one position low.
    fn choose(&self, num_partitions: usize) -> Vec<IndexedStr> {
        let size = self.container.len();
        if size == 0 {
            return Vec::new();
        }
        (1..num_partitions)
            .map(|i| {
                let pos = (i * size / num_partitions).saturating_sub(1).min(size - 1);
                self.container.descs()[pos]
            })
            .collect()
    }
}

/// First position in `container` whose string (with its global index, when
/// `indexed`) compares greater than the splitter.
fn upper_bound<D: StringDesc>(
    container: &StringLcpContainer<D>,
    range: std::ops::Range<usize>,
    splitter_bytes: &[u8],
    splitter_index: usize,
    global_offset: usize,
    indexed: bool,
) -> usize {
    let mut low = range.start;
    let mut high = range.end;
    while low < high {
        let mid = low + (high - low) / 2;
        let le = match container.bytes(mid).cmp(splitter_bytes) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => !indexed || global_offset + mid <= splitter_index,
        };
        if le {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

/// Computes `send_counts[num_partitions]` for the locally sorted container.
pub fn compute_partition<D: StringDesc, C: Communicator>(
    container: &StringLcpContainer<D>,
    policy: SamplePolicy,
    sampling_factor: usize,
    num_partitions: usize,
    comm: &C,
    measure: &mut Measurements,
) -> Vec<usize> {
    assert!(num_partitions >= 1);
    if num_partitions == 1 {
        return vec![container.len()];
    }

    // Global string indices for tie-breaking in the indexed policies.
    let local_counts = comm.allgather_u64(container.len() as u64);
    let global_offset: usize = local_counts[..comm.rank()].iter().sum::<u64>() as usize;

    measure.start("sample_splitters");
    let nr_samples = sampling_factor * num_partitions;
    let positions = sample_positions(container, policy, nr_samples);
    measure.stop("sample_splitters");

    measure.start("sort_splitters");
    let splitter_array =
        SplitterArray::gather_and_sort(container, &positions, policy, global_offset, comm);
    measure.add("splitter_sample_size", splitter_array.container.len() as u64);
    measure.stop("sort_splitters");

    measure.start("compute_interval_sizes");
    let chosen = splitter_array.choose(num_partitions);
    let mut counts = Vec::with_capacity(num_partitions);
    let mut start = 0;
    for splitter in &chosen {
        let bytes = splitter_array.container.bytes_of(splitter);
        let pos = upper_bound(
            container,
            start..container.len(),
            bytes,
            splitter.index,
            global_offset,
            policy.is_indexed(),
        );
        counts.push(pos - start);
        start = pos;
    }
    counts.push(container.len() - start);
    counts.resize(num_partitions, 0);
    measure.stop("compute_interval_sizes");

    assert_eq!(counts.iter().sum::<usize>(), container.len());
    counts
}

/// Spreads each bucket evenly over the `group_size` consecutive ranks that
/// form its receiver group, turning bucket counts into per-rank send counts.
pub fn stripe_over_groups(bucket_counts: &[usize], group_size: usize) -> Vec<usize> {
    let mut send_counts = Vec::with_capacity(bucket_counts.len() * group_size);
    for &count in bucket_counts {
        for j in 0..group_size {
            send_counts.push(count * (j + 1) / group_size - count * j / group_size);
        }
    }
    send_counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::exclusive_prefix_sum;
    use crate::container::{ContainerBuilder, Str};
    use crate::local_comm::run_cluster;
    use crate::sort_local::sort_with_lcps;

    fn sorted_container(strings: &[&[u8]]) -> StringLcpContainer<Str> {
        let mut builder = ContainerBuilder::new();
        for s in strings {
            builder.push(s);
        }
        let mut c = StringLcpContainer::new(builder.finish());
        sort_with_lcps(&mut c);
        c
    }

    #[test]
    fn test_sample_positions_strings() {
        let c = sorted_container(&[b"a", b"b", b"c", b"d", b"e", b"f"]);
        let positions = sample_positions(&c, SamplePolicy::Strings, 2);
        assert_eq!(positions, vec![2, 4]);
        assert!(sample_positions(&c, SamplePolicy::Strings, 0).is_empty());
    }

    #[test]
    fn test_sample_positions_chars_prefers_long_strings() {
        let c = sorted_container(&[b"a", b"bbbbbbbbbb", b"c"]);
        let positions = sample_positions(&c, SamplePolicy::Chars, 2);
        assert!(positions.iter().all(|&p| p == 1), "{positions:?}");
    }

    #[test]
    fn test_stripe_over_groups() {
        assert_eq!(stripe_over_groups(&[5, 2], 2), vec![2, 3, 1, 1]);
        assert_eq!(stripe_over_groups(&[4], 4), vec![1, 1, 1, 1]);
        assert_eq!(stripe_over_groups(&[3, 1], 1), vec![3, 1]);
    }

    #[test]
    fn test_partition_two_ranks_exact() {
        // With an exhaustive sample the splitter array is the full input
        // [a, b, c, d]; the chosen splitter is "b", so rank 0 keeps "a" and
        // receives "b" while "c" and "d" end up on rank 1.
        let results = run_cluster(2, |comm| {
            let c = if comm.rank() == 0 {
                sorted_container(&[b"a", b"c"])
            } else {
                sorted_container(&[b"b", b"d"])
            };
            compute_partition(
                &c,
                SamplePolicy::Strings,
                8,
                2,
                &comm,
                &mut Measurements::disabled(),
            )
        });
        assert_eq!(results[0], vec![1, 1]);
        assert_eq!(results[1], vec![1, 1]);
    }

    #[test]
    fn test_partition_counts_sum_and_align() {
        let inputs: [&[&[u8]]; 4] = [
            &[b"pear", b"apple", b"plum"],
            &[b"apple", b"fig", b"grape", b"lime"],
            &[b"kiwi"],
            &[],
        ];
        for policy in [
            SamplePolicy::Strings,
            SamplePolicy::Chars,
            SamplePolicy::IndexedStrings,
            SamplePolicy::IndexedChars,
        ] {
            let results = run_cluster(4, |comm| {
                let c = sorted_container(inputs[comm.rank()]);
                let counts = compute_partition(
                    &c,
                    policy,
                    2,
                    4,
                    &comm,
                    &mut Measurements::disabled(),
                );
                (c, counts)
            });
            for (rank, (container, counts)) in results.iter().enumerate() {
                assert_eq!(counts.len(), 4);
                assert_eq!(
                    counts.iter().sum::<usize>(),
                    container.len(),
                    "rank {rank} {policy:?}"
                );
                // Bucket boundaries respect the sort order.
                let offsets = exclusive_prefix_sum(counts);
                for b in 1..counts.len() {
                    if counts[b] > 0 && offsets[b] > 0 {
                        assert!(
                            container.bytes(offsets[b] - 1) <= container.bytes(offsets[b]),
                            "rank {rank} bucket {b} {policy:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_indexed_policy_splits_equal_strings() {
        // 8 equal strings per rank can only be balanced by index tie-breaks:
        // the plain policy dumps everything into the first bucket, the
        // indexed one splits the global run.
        let run = |policy: SamplePolicy| {
            run_cluster(2, move |comm| {
                let c = sorted_container(&[b"same".as_slice(); 8]);
                compute_partition(&c, policy, 4, 2, &comm, &mut Measurements::disabled())
            })
        };

        let plain = run(SamplePolicy::Strings);
        let plain_buckets = [plain[0][0] + plain[1][0], plain[0][1] + plain[1][1]];
        assert_eq!(plain_buckets, [16, 0]);

        let indexed = run(SamplePolicy::IndexedStrings);
        let buckets = [
            indexed[0][0] + indexed[1][0],
            indexed[0][1] + indexed[1][1],
        ];
        assert_eq!(buckets[0] + buckets[1], 16);
        assert!(buckets[0] > 0 && buckets[1] > 0, "{indexed:?}");
    }
}
