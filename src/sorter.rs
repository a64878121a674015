//! The distributed sort drivers.
//!
//! [`DistributedMergeSort`] is the workhorse: local sort, then per grid
//! level splitter sampling, partition computation, compressed string
//! exchange and multiway merge. [`PrefixDoublingMergeSort`] runs the
//! duplicate filter first and sorts only distinguishing prefixes, emitting
//! the origin permutation instead of full strings.
//! [`SpaceEfficientSort`] streams the data in quantiles of a configurable
//! byte budget and returns the global rank of every input string.

use crate::bloomfilter::BloomFilter;
use crate::comm::{exclusive_prefix_sum, Communicator, ReduceOp};
use crate::config::{PermutationKind, SortConfig};
use crate::container::{
    ContainerBuilder, IndexedStr, Str, StringContainer, StringDesc, StringLcpContainer,
};
use crate::exchange::alltoall_strings;
use crate::grid::CommGrid;
use crate::hash::HashAlgo;
use crate::measure::Measurements;
use crate::merge::multiway_merge;
use crate::permutation::Permutation;
use crate::sample::{compute_partition, stripe_over_groups};
use crate::sort_local::{compute_lcps, sort_with_lcps};

/// Merges per-sender sorted runs into one sorted container with a fresh,
/// contiguous arena and a consistent LCP array.
fn merge_sorted_runs<D: StringDesc>(
    container: StringLcpContainer<D>,
    runs: &[usize],
) -> StringLcpContainer<D> {
    let (inner, _) = container.into_inner();
    let (arena, descs) = inner.into_parts();
    let merged = multiway_merge(&descs, runs, |d| -> &[u8] {
        &arena[d.offset()..d.offset() + d.len()]
    });

    let mut merged_container = StringContainer::from_parts(arena, merged);
    merged_container.make_contiguous();
    let mut result = StringLcpContainer::new(merged_container);
    let lcps = compute_lcps(&result);
    result.set_lcps(lcps);
    result
}

/// Multi-level distributed merge sort.
pub struct DistributedMergeSort {
    cfg: SortConfig,
}

impl DistributedMergeSort {
    pub fn new(cfg: SortConfig) -> Self {
        DistributedMergeSort { cfg }
    }

    /// Sorts the local partition globally: afterwards the container is
    /// locally sorted and range-partitioned across the root communicator.
    pub fn sort<D: StringDesc, C: Communicator>(
        &self,
        mut container: StringLcpContainer<D>,
        grid: &CommGrid<C>,
        measure: &mut Measurements,
    ) -> StringLcpContainer<D> {
        measure.set_phase("sorting");
        measure.start("local_sort");
        sort_with_lcps(&mut container);
        measure.stop("local_sort");
        self.sort_presorted(container, grid, measure)
    }

    /// The level loop for an already locally sorted container. Every merge
    /// leaves the data sorted, so deeper levels assert instead of
    /// re-sorting.
    pub fn sort_presorted<D: StringDesc, C: Communicator>(
        &self,
        mut container: StringLcpContainer<D>,
        grid: &CommGrid<C>,
        measure: &mut Measurements,
    ) -> StringLcpContainer<D> {
        for level in 0..grid.num_levels() {
            let comm = grid.comm(level);
            if comm.size() == 1 {
                continue;
            }
            debug_assert!(container.container().is_sorted());

            let num_partitions = grid.num_partitions(level);
            let bucket_counts = compute_partition(
                &container,
                self.cfg.sample,
                self.cfg.sampling_factor,
                num_partitions,
                comm,
                measure,
            );
            let send_counts = stripe_over_groups(&bucket_counts, grid.group_size(level));

            let (received, runs) = alltoall_strings(
                container,
                &send_counts,
                self.cfg.lcp_compression,
                self.cfg.prefix_compression,
                self.cfg.alltoall,
                comm,
                measure,
            );

            measure.start("merge_ranges");
            container = merge_sorted_runs(received, &runs);
            measure.stop("merge_ranges");
        }
        container
    }
}

/// Tags every string of a local container with its origin.
fn attach_origins(
    container: StringLcpContainer<Str>,
    rank: usize,
) -> StringLcpContainer<IndexedStr> {
    let (inner, lcps) = container.into_inner();
    let (arena, descs) = inner.into_parts();
    let indexed = descs
        .iter()
        .enumerate()
        .map(|(index, d)| IndexedStr {
            offset: d.offset,
            len: d.len,
            pe: rank,
            index,
        })
        .collect();
    StringLcpContainer::with_lcps(StringContainer::from_parts(arena, indexed), lcps)
}

/// Shrinks a sorted container to the distinguishing prefixes reported by the
/// duplicate filter, keeping the origin members.
fn shrink_to_prefixes(
    container: &StringLcpContainer<IndexedStr>,
    depths: &[usize],
) -> StringLcpContainer<IndexedStr> {
    let mut builder = ContainerBuilder::<IndexedStr>::with_capacity(
        depths.iter().sum::<usize>() + container.len(),
        container.len(),
    );
    for (i, &depth) in depths.iter().enumerate() {
        let bytes = container.bytes(i);
        let desc = builder.push(&bytes[..depth.min(bytes.len())]);
        desc.pe = container.descs()[i].pe;
        desc.index = container.descs()[i].index;
    }
    StringLcpContainer::new(builder.finish())
}

/// Merge sort over distinguishing prefixes: exchanges only the prefix bytes
/// plus the origin members and returns the global rank permutation.
pub struct PrefixDoublingMergeSort {
    cfg: SortConfig,
}

impl PrefixDoublingMergeSort {
    pub fn new(cfg: SortConfig) -> Self {
        PrefixDoublingMergeSort { cfg }
    }

    /// Returns the sorted prefix container (with origin members) and the
    /// permutation it spells out.
    pub fn sort<C: Communicator>(
        &self,
        container: StringLcpContainer<Str>,
        grid: &CommGrid<C>,
        measure: &mut Measurements,
    ) -> (StringLcpContainer<IndexedStr>, Permutation) {
        let mut indexed = attach_origins(container, grid.world().rank());

        measure.set_phase("sorting");
        measure.start("local_sort");
        sort_with_lcps(&mut indexed);
        measure.stop("local_sort");

        measure.set_phase("bloomfilter");
        measure.start("bloomfilter_overall");
        let mut filter = BloomFilter::new(indexed.len(), HashAlgo::default(), self.cfg.golomb);
        let depths = filter.compute_distinguishing_prefixes(
            &indexed,
            self.cfg.init_depth,
            grid.comms(),
            measure,
        );
        measure.stop("bloomfilter_overall");
        measure.add("distinguishing_chars", depths.iter().sum::<usize>() as u64);

        let prefixes = shrink_to_prefixes(&indexed, &depths);
        drop(indexed);

        measure.set_phase("sorting");
        let sorted = DistributedMergeSort::new(self.cfg.clone()).sort(prefixes, grid, measure);
        let permutation = Permutation::from_container(sorted.container());
        (sorted, permutation)
    }
}

/// Routes `(index, rank)` assignments back to their origin PEs. Returns the
/// global rank of every local input string, in input order.
fn scatter_ranks_to_origins<C: Communicator>(
    assignments: &[(IndexedStr, usize)],
    num_local_strings: usize,
    comm: &C,
) -> Vec<usize> {
    let mut send_counts = vec![0usize; comm.size()];
    for (desc, _) in assignments {
        send_counts[desc.pe] += 2;
    }
    let mut slots = exclusive_prefix_sum(&send_counts);
    let mut send_buf = vec![0u64; assignments.len() * 2];
    for (desc, rank) in assignments {
        send_buf[slots[desc.pe]] = desc.index as u64;
        send_buf[slots[desc.pe] + 1] = *rank as u64;
        slots[desc.pe] += 2;
    }

    let (received, _) = comm.alltoallv(&send_buf, &send_counts);
    let mut ranks = vec![usize::MAX; num_local_strings];
    for pair in received.chunks_exact(2) {
        ranks[pair[0] as usize] = pair[1] as usize;
    }
    ranks
}

/// Chain scan along the ranks: strings byte-equal across a rank boundary
/// inherit the rank of their first occurrence. Message layout: 8 bytes rank
/// of the predecessor's last string, then its bytes.
///
/// This cannot use [`rotate_right`](crate::comm::rotate_right): when a
/// duplicate run covers a whole rank, the outgoing rank value depends on
/// the received one, so the messages form a sequential scan rather than a
/// one-step rotation.
fn resolve_boundary_duplicates<C: Communicator>(
    container: &StringLcpContainer<IndexedStr>,
    ranks: &mut [usize],
    comm: &C,
) {
    use byteorder::{ByteOrder, LittleEndian};

    let mut boundary: Option<(Vec<u8>, usize)> = None;
    if comm.rank() > 0 {
        let message = comm.recv::<u8>(comm.rank() - 1);
        if !message.is_empty() {
            let rank = LittleEndian::read_u64(&message[..8]) as usize;
            boundary = Some((message[8..].to_vec(), rank));
        }
        if let Some((bytes, rank)) = &boundary {
            for i in 0..container.len() {
                if container.bytes(i) == &bytes[..] {
                    ranks[i] = *rank;
                } else {
                    break;
                }
            }
        }
    }

    if comm.rank() + 1 < comm.size() {
        let message = match container.len() {
            0 => match boundary {
                // Empty rank: pass the predecessor's boundary through.
                Some((bytes, rank)) => {
                    let mut msg = vec![0u8; 8];
                    LittleEndian::write_u64(&mut msg[..8], rank as u64);
                    msg.extend_from_slice(&bytes);
                    msg
                }
                None => Vec::new(),
            },
            n => {
                let mut msg = vec![0u8; 8];
                LittleEndian::write_u64(&mut msg[..8], ranks[n - 1] as u64);
                msg.extend_from_slice(container.bytes(n - 1));
                msg
            }
        };
        comm.send(&message, comm.rank() + 1);
    }
}

/// Space-efficient sorter: processes the data in quantiles bounded by the
/// configured byte budget and emits only the global rank permutation.
pub struct SpaceEfficientSort {
    cfg: SortConfig,
}

impl SpaceEfficientSort {
    pub fn new(cfg: SortConfig) -> Self {
        SpaceEfficientSort { cfg }
    }

    /// Returns `ranks[i]` = global rank of local input string `i`.
    pub fn sort<C: Communicator>(
        &self,
        container: StringLcpContainer<Str>,
        grid: &CommGrid<C>,
        measure: &mut Measurements,
    ) -> Vec<usize> {
        let world = grid.world();
        let num_local = container.len();
        let mut indexed = attach_origins(container, world.rank());

        measure.set_phase("sorting");
        measure.start("local_sort");
        sort_with_lcps(&mut indexed);
        measure.stop("local_sort");

        if self.cfg.prefix_doubling {
            measure.set_phase("bloomfilter");
            let mut filter =
                BloomFilter::new(indexed.len(), HashAlgo::default(), self.cfg.golomb);
            let depths = filter.compute_distinguishing_prefixes(
                &indexed,
                self.cfg.init_depth,
                grid.comms(),
                measure,
            );
            let mut prefixes = shrink_to_prefixes(&indexed, &depths);
            sort_with_lcps(&mut prefixes);
            indexed = prefixes;
            measure.set_phase("sorting");
        }

        // Quantile count: bound peak memory by the largest local partition.
        let num_quantiles = world
            .allreduce_u64(
                indexed.char_size().div_ceil(self.cfg.quantile_size) as u64,
                ReduceOp::Max,
            )
            .max(1) as usize;
        measure.add("num_quantiles", num_quantiles as u64);

        let quantile_counts = compute_partition(
            &indexed,
            self.cfg.sample,
            self.cfg.sampling_factor,
            num_quantiles,
            world,
            measure,
        );
        let quantile_offsets = exclusive_prefix_sum(&quantile_counts);

        let merge_sort = DistributedMergeSort::new(self.cfg.clone());
        let mut assignments: Vec<(IndexedStr, usize)> = Vec::with_capacity(num_local);
        let mut global_offset = 0usize;
        for (&offset, &count) in quantile_offsets.iter().zip(&quantile_counts) {
            let quantile = extract_range(&indexed, offset..offset + count);
            let sorted = merge_sort.sort_presorted(quantile, grid, measure);

            let sizes = world.allgather_u64(sorted.len() as u64);
            let base: usize =
                global_offset + sizes[..world.rank()].iter().sum::<u64>() as usize;

            let mut ranks: Vec<usize> = (0..sorted.len()).map(|j| base + j).collect();
            if self.cfg.permutation == PermutationKind::NonUnique {
                for j in 1..sorted.len() {
                    if sorted.bytes(j) == sorted.bytes(j - 1) {
                        ranks[j] = ranks[j - 1];
                    }
                }
                resolve_boundary_duplicates(&sorted, &mut ranks, world);
            }

            assignments.extend(
                sorted
                    .descs()
                    .iter()
                    .zip(&ranks)
                    .map(|(desc, &rank)| (*desc, rank)),
            );
            global_offset += sizes.iter().sum::<u64>() as usize;
        }

        scatter_ranks_to_origins(&assignments, num_local, world)
    }
}

/// Copies a position range of a sorted container into its own arena.
fn extract_range(
    container: &StringLcpContainer<IndexedStr>,
    range: std::ops::Range<usize>,
) -> StringLcpContainer<IndexedStr> {
    let mut builder = ContainerBuilder::<IndexedStr>::with_capacity(0, range.len());
    let mut lcps = Vec::with_capacity(range.len());
    for i in range {
        let source = container.descs()[i];
        let desc = builder.push(container.bytes(i));
        desc.pe = source.pe;
        desc.index = source.index;
        lcps.push(if lcps.is_empty() {
            0
        } else {
            container.lcps()[i]
        });
    }
    StringLcpContainer::with_lcps(builder.finish(), lcps)
}

/// Redistributes rank values so that each process owns one contiguous value
/// interval; the result is sorted. Equal values always meet on one process.
pub fn redistribute_ranks<C: Communicator>(ranks: &[usize], comm: &C) -> Vec<u64> {
    let local_max = ranks.iter().max().map(|&r| r as u64 + 1).unwrap_or(0);
    let upper_bound = comm.allreduce_u64(local_max, ReduceOp::Max);
    let interval = upper_bound.div_ceil(comm.size() as u64).max(1);

    let mut send_counts = vec![0usize; comm.size()];
    for &rank in ranks {
        send_counts[(rank as u64 / interval) as usize] += 1;
    }
    let mut slots = exclusive_prefix_sum(&send_counts);
    let mut send_buf = vec![0u64; ranks.len()];
    for &rank in ranks {
        let dest = (rank as u64 / interval) as usize;
        send_buf[slots[dest]] = rank as u64;
        slots[dest] += 1;
    }

    let (mut received, _) = comm.alltoallv(&send_buf, &send_counts);
    received.sort_unstable();
    received
}

/// Reports how many global ranks are shared between strings. Ranks are
/// redistributed by value interval so each duplicate group is counted on
/// exactly one rank. Counting is a run-length scan, which stays exact on
/// the gapped rank sequences the non-unique permutation produces.
pub fn count_duplicate_ranks<C: Communicator>(
    ranks: &[usize],
    comm: &C,
    measure: &mut Measurements,
) {
    let received = redistribute_ranks(ranks, comm);

    let total = received.len();
    let mut distinct = 0usize;
    let mut duplicate_groups = 0usize;
    let mut i = 0;
    while i < total {
        let mut j = i + 1;
        while j < total && received[j] == received[i] {
            j += 1;
        }
        distinct += 1;
        if j - i > 1 {
            duplicate_groups += 1;
        }
        i = j;
    }

    measure.add("total_ranks", total as u64);
    measure.add("distinct_ranks", distinct as u64);
    measure.add("duplicate_ranks", duplicate_groups as u64);
    measure.add(
        "total_duplicates",
        (total - distinct + duplicate_groups) as u64,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_comm::run_cluster;

    fn container_of(strings: &[&[u8]]) -> StringLcpContainer<Str> {
        let mut builder = ContainerBuilder::new();
        for s in strings {
            builder.push(s);
        }
        StringLcpContainer::new(builder.finish())
    }

    fn collect_strings<D: StringDesc>(container: &StringLcpContainer<D>) -> Vec<Vec<u8>> {
        (0..container.len())
            .map(|i| container.bytes(i).to_vec())
            .collect()
    }

    fn reference_sorted(inputs: &[&[&[u8]]]) -> Vec<Vec<u8>> {
        let mut all: Vec<Vec<u8>> = inputs
            .iter()
            .flat_map(|strings| strings.iter().map(|s| s.to_vec()))
            .collect();
        all.sort();
        all
    }

    fn run_sort(
        inputs: &'static [&'static [&'static [u8]]],
        levels: &'static [usize],
        cfg: SortConfig,
    ) -> Vec<Vec<Vec<u8>>> {
        run_cluster(inputs.len(), move |comm| {
            let grid = CommGrid::new(comm, levels);
            let container = container_of(inputs[grid.world().rank()]);
            let sorted = DistributedMergeSort::new(cfg.clone()).sort(
                container,
                &grid,
                &mut Measurements::disabled(),
            );
            assert!(sorted.is_consistent());
            collect_strings(&sorted)
        })
    }

    #[test]
    fn test_single_rank_trivial() {
        let results = run_cluster(1, |comm| {
            let grid = CommGrid::new(comm, &[]);
            let container = container_of(&[b"banana", b"apple", b"cherry"]);
            let sorted = DistributedMergeSort::new(SortConfig::default()).sort(
                container,
                &grid,
                &mut Measurements::disabled(),
            );
            (collect_strings(&sorted), sorted.lcps().to_vec())
        });
        let (strings, lcps) = &results[0];
        assert_eq!(
            strings,
            &vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]
        );
        assert_eq!(lcps, &vec![0, 0, 0]);
    }

    #[test]
    fn test_two_ranks_balanced() {
        // Splitter "b": rank 0 ends up with [a, b], rank 1 with [c, d].
        static INPUTS: [&[&[u8]]; 2] = [&[b"c", b"a"], &[b"b", b"d"]];
        let cfg = SortConfig {
            sampling_factor: 8,
            ..SortConfig::default()
        };
        let results = run_sort(&INPUTS, &[], cfg);
        assert_eq!(results[0], vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(results[1], vec![b"c".to_vec(), b"d".to_vec()]);
    }

    static MIXED_INPUTS: [&[&[u8]]; 4] = [
        &[b"delta", b"alpha", b"echo", b"alpha"],
        &[b"bravo", b"zulu"],
        &[b"golf", b"foxtrot", b"bravo", b"hotel", b"india"],
        &[b"charlie"],
    ];

    #[test]
    fn test_four_ranks_matches_reference() {
        for cfg in [
            SortConfig::default(),
            SortConfig {
                lcp_compression: true,
                ..SortConfig::default()
            },
            SortConfig {
                lcp_compression: true,
                prefix_compression: true,
                ..SortConfig::default()
            },
        ] {
            let results = run_sort(&MIXED_INPUTS, &[], cfg);
            let global: Vec<Vec<u8>> = results.concat();
            assert_eq!(global, reference_sorted(&MIXED_INPUTS));
        }
    }

    #[test]
    fn test_level_schedule_matches_flat_sort() {
        static INPUTS: [&[&[u8]]; 8] = [
            &[b"mike", b"alpha"],
            &[b"kilo", b"bravo", b"kilo"],
            &[b"lima"],
            &[b"juliett", b"oscar", b"november"],
            &[b"papa", b"charlie"],
            &[b"quebec", b"echo", b"echo"],
            &[b"romeo", b"delta"],
            &[b"sierra", b"foxtrot"],
        ];
        let flat = run_sort(&INPUTS, &[], SortConfig::default());
        let leveled = run_sort(&INPUTS, &[4], SortConfig::default());
        let two_level = run_sort(&INPUTS, &[4, 2], SortConfig::default());

        let flat_global: Vec<Vec<u8>> = flat.concat();
        assert_eq!(flat_global, reference_sorted(&INPUTS));
        assert_eq!(flat_global, leveled.concat());
        assert_eq!(flat_global, two_level.concat());
    }

    #[test]
    fn test_sort_is_idempotent() {
        let results = run_cluster(4, |comm| {
            let grid = CommGrid::new(comm, &[]);
            let container = container_of(MIXED_INPUTS[grid.world().rank()]);
            let sorter = DistributedMergeSort::new(SortConfig::default());
            let mut measure = Measurements::disabled();
            let once = sorter.sort(container, &grid, &mut measure);
            let first = collect_strings(&once);
            let twice = sorter.sort(once, &grid, &mut measure);
            (first, collect_strings(&twice))
        });
        for (first, second) in results {
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_prefix_doubling_produces_valid_permutation() {
        static INPUTS: [&[&[u8]]; 4] = [
            &[b"prefix_delta", b"prefix_alpha"],
            &[b"prefix_bravo", b"prefix_alpha"],
            &[b"prefix_charlie", b"other"],
            &[b"prefix_echo"],
        ];
        let cfg = SortConfig {
            prefix_doubling: true,
            init_depth: 2,
            ..SortConfig::default()
        };
        let results = run_cluster(4, move |comm| {
            let grid = CommGrid::new(comm, &[]);
            let container = container_of(INPUTS[grid.world().rank()]);
            let (sorted, permutation) = PrefixDoublingMergeSort::new(cfg.clone()).sort(
                container,
                &grid,
                &mut Measurements::disabled(),
            );
            assert!(sorted.container().is_sorted());
            (0..permutation.len())
                .map(|i| (permutation.rank(i), permutation.string(i)))
                .collect::<Vec<_>>()
        });

        // Applying the permutation to the inputs must spell out the global
        // sorted order.
        let spelled: Vec<Vec<u8>> = results
            .concat()
            .into_iter()
            .map(|(pe, index)| INPUTS[pe][index].to_vec())
            .collect();
        assert_eq!(spelled, reference_sorted(&INPUTS));
    }

    #[test]
    fn test_space_efficient_ranks() {
        let cfg = SortConfig {
            quantile_size: 16, // force several quantiles
            sampling_factor: 4,
            ..SortConfig::default()
        };
        let results = run_cluster(4, move |comm| {
            let grid = CommGrid::new(comm, &[]);
            let container = container_of(MIXED_INPUTS[grid.world().rank()]);
            SpaceEfficientSort::new(cfg.clone()).sort(
                container,
                &grid,
                &mut Measurements::disabled(),
            )
        });

        let reference = reference_sorted(&MIXED_INPUTS);
        let mut seen = vec![false; reference.len()];
        for (pe, ranks) in results.iter().enumerate() {
            assert_eq!(ranks.len(), MIXED_INPUTS[pe].len());
            for (index, &rank) in ranks.iter().enumerate() {
                assert_eq!(
                    reference[rank],
                    MIXED_INPUTS[pe][index].to_vec(),
                    "pe {pe} string {index} got rank {rank}"
                );
                assert!(!seen[rank], "rank {rank} assigned twice");
                seen[rank] = true;
            }
        }
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn test_space_efficient_non_unique_ranks() {
        static INPUTS: [&[&[u8]]; 3] = [
            &[b"dup", b"alpha", b"dup"],
            &[b"dup", b"beta"],
            &[b"dup", b"alpha"],
        ];
        let cfg = SortConfig {
            permutation: PermutationKind::NonUnique,
            sampling_factor: 4,
            ..SortConfig::default()
        };
        let results = run_cluster(3, move |comm| {
            let grid = CommGrid::new(comm, &[]);
            let container = container_of(INPUTS[grid.world().rank()]);
            let mut measure = Measurements::new("");
            let ranks = SpaceEfficientSort::new(cfg.clone()).sort(
                container,
                &grid,
                &mut measure,
            );
            count_duplicate_ranks(&ranks, grid.world(), &mut measure);
            ranks
        });

        // Byte-equal strings share one rank; distinct strings get distinct
        // ranks that respect the sort order.
        let mut by_string: std::collections::HashMap<Vec<u8>, usize> =
            std::collections::HashMap::new();
        for (pe, ranks) in results.iter().enumerate() {
            for (index, &rank) in ranks.iter().enumerate() {
                let s = INPUTS[pe][index].to_vec();
                let entry = by_string.entry(s).or_insert(rank);
                assert_eq!(*entry, rank);
            }
        }
        let mut pairs: Vec<(&Vec<u8>, &usize)> = by_string.iter().collect();
        pairs.sort();
        let ranks_in_order: Vec<usize> = pairs.iter().map(|(_, &r)| r).collect();
        assert!(ranks_in_order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_count_duplicate_ranks() {
        let results = run_cluster(2, |comm| {
            let ranks = if comm.rank() == 0 {
                vec![0usize, 3, 5]
            } else {
                vec![3, 7]
            };
            let mut measure = Measurements::new("");
            count_duplicate_ranks(&ranks, &comm, &mut measure);
            measure
                .records()
                .iter()
                .map(|r| (r.key.clone(), r.value))
                .collect::<Vec<_>>()
        });
        let mut totals = std::collections::HashMap::new();
        for records in results {
            for (key, value) in records {
                *totals.entry(key).or_insert(0) += value;
            }
        }
        assert_eq!(totals["total_ranks"], 5);
        assert_eq!(totals["distinct_ranks"], 4);
        assert_eq!(totals["duplicate_ranks"], 1);
        assert_eq!(totals["total_duplicates"], 2);
    }
}
