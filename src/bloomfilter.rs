//! Distributed duplicate-prefix detection.
//!
//! At a probe depth `d`, every rank hashes the `d`-prefix of its candidate
//! strings and the hash space `[0, 2^64)` is partitioned linearly across the
//! ranks of a communicator: each receiver merges the per-sender hash runs,
//! walks the merged stream for equal neighbors, and reports the positions of
//! duplicated hashes back to their origins. Strings whose hash survives
//! unduplicated are unique up to depth `d`; the prefix-doubling driver then
//! doubles `d` for the remaining candidates until no duplicates are left.
//!
//! With a multi-level communicator grid the detection recurses: the merged
//! hash-rank stream of one level becomes the input of the next, with the
//! hash range narrowed proportionally to the local rank, and duplicate
//! positions are remapped on unwind through the forward offset counters.

use crate::comm::{exclusive_prefix_sum, Communicator};
use crate::config::GolombMode;
use crate::container::{StringDesc, StringLcpContainer};
use crate::golomb::{decode_sorted, encode_sorted};
use crate::hash::HashAlgo;
use crate::measure::Measurements;
use crate::merge::multiway_merge;

/// The Bloom-filter "size": hashes range over the whole u64 space.
pub const FILTER_SIZE: u64 = u64::MAX;

/// A hashed candidate on the sending side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashStringIndex {
    pub hash: u64,
    /// Local string index the hash was computed from.
    pub index: usize,
    pub local_duplicate: bool,
    pub send_anyway: bool,
    pub lcp_root: bool,
}

impl HashStringIndex {
    fn new(hash: u64, index: usize) -> Self {
        HashStringIndex {
            hash,
            index,
            ..Default::default()
        }
    }

    fn should_send(&self) -> bool {
        !self.local_duplicate || self.send_anyway
    }
}

/// A received hash tagged with its originating rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashPeIndex {
    pub hash: u64,
    pub pe: usize,
}

/// An interval of the hash space, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRange {
    pub lower: u64,
    pub upper: u64,
}

impl HashRange {
    pub fn full() -> Self {
        HashRange {
            lower: 0,
            upper: FILTER_SIZE,
        }
    }

    pub fn span(&self) -> u64 {
        self.upper - self.lower
    }

    fn bucket_span(&self, num_buckets: usize) -> u64 {
        (self.span() / num_buckets as u64).max(1)
    }

    /// The `idx`-th of `num_buckets` equal slices; the last one absorbs the
    /// rounding remainder.
    pub fn bucket(&self, idx: usize, num_buckets: usize) -> HashRange {
        let span = self.bucket_span(num_buckets);
        let lower = self.lower + idx as u64 * span;
        if idx + 1 == num_buckets {
            HashRange {
                lower,
                upper: self.upper,
            }
        } else {
            HashRange {
                lower,
                upper: lower + span - 1,
            }
        }
    }
}

/// Receive side of one filter exchange.
#[derive(Debug, Default)]
pub struct RecvData {
    /// Hashes, concatenated per sender in rank order.
    pub hashes: Vec<u64>,
    /// Per-sender run lengths.
    pub counts: Vec<usize>,
    /// For each sender, the offset of my interval within that sender's hash
    /// list; duplicate positions are mapped back through these.
    pub global_offsets: Vec<usize>,
}

impl RecvData {
    /// Tags every received hash with its sender and merges the per-sender
    /// runs into one sorted stream.
    fn merged_hash_rank_pairs(&self) -> Vec<HashPeIndex> {
        let mut pairs = Vec::with_capacity(self.hashes.len());
        let mut offset = 0;
        for (pe, &count) in self.counts.iter().enumerate() {
            pairs.extend(
                self.hashes[offset..offset + count]
                    .iter()
                    .map(|&hash| HashPeIndex { hash, pe }),
            );
            offset += count;
        }
        multiway_merge(&pairs, &self.counts, |p| p.hash)
    }
}

/// Splits a sorted hash sequence into one interval per receiver.
fn compute_interval_sizes(hashes: &[u64], range: HashRange, num_intervals: usize) -> Vec<usize> {
    let span = range.bucket_span(num_intervals);
    let mut sizes = Vec::with_capacity(num_intervals);
    let mut start = 0;
    for i in 0..num_intervals - 1 {
        let upper_limit = range.lower + (i as u64 + 1) * span - 1;
        let pos = start + hashes[start..].partition_point(|&h| h <= upper_limit);
        sizes.push(pos - start);
        start = pos;
    }
    sizes.push(hashes.len() - start);
    sizes
}

/// Ships each hash to the receiver owning its interval. Also exchanges the
/// per-interval offsets so the receiver can map duplicate positions back to
/// sender-local indices.
fn send_to_filter<C: Communicator>(
    hashes: &[u64],
    range: HashRange,
    comm: &C,
    golomb: GolombMode,
    measure: &mut Measurements,
) -> RecvData {
    let interval_sizes = compute_interval_sizes(hashes, range, comm.size());
    let offsets = exclusive_prefix_sum(&interval_sizes);

    let global_offsets: Vec<usize> = comm
        .alltoall(&offsets.iter().map(|&o| o as u64).collect::<Vec<_>>())
        .into_iter()
        .map(|o| o as usize)
        .collect();
    let counts: Vec<usize> = comm
        .alltoall(&interval_sizes.iter().map(|&c| c as u64).collect::<Vec<_>>())
        .into_iter()
        .map(|c| c as usize)
        .collect();

    let hashes_recv = match golomb {
        GolombMode::None => {
            measure.add("bloomfilter_sent_hash_bytes", (hashes.len() * 8) as u64);
            let (received, recv_counts) = comm.alltoallv(hashes, &interval_sizes);
            debug_assert_eq!(recv_counts, counts);
            received
        }
        GolombMode::Sequential | GolombMode::Pipelined => {
            let mut payload = Vec::new();
            let mut byte_counts = Vec::with_capacity(comm.size());
            for (i, (&offset, &count)) in offsets.iter().zip(&interval_sizes).enumerate() {
                let packet = encode_sorted(
                    &hashes[offset..offset + count],
                    range.bucket(i, comm.size()).span(),
                );
                byte_counts.push(packet.len());
                payload.extend_from_slice(&packet);
            }
            measure.add("bloomfilter_sent_hash_bytes", payload.len() as u64);
            let (blob, blob_counts) = comm.alltoallv(&payload, &byte_counts);
            let mut received = Vec::new();
            let mut offset = 0;
            for (pe, &bytes) in blob_counts.iter().enumerate() {
                let decoded = decode_sorted(&blob[offset..offset + bytes]);
                debug_assert_eq!(decoded.len(), counts[pe]);
                received.extend(decoded);
                offset += bytes;
            }
            received
        }
    };

    RecvData {
        hashes: hashes_recv,
        counts,
        global_offsets,
    }
}

/// Sends sorted index lists back to their origins, optionally Golomb-coded.
fn return_duplicates<C: Communicator>(
    send_buf: &[u64],
    send_counts: &[usize],
    comm: &C,
    golomb: GolombMode,
) -> Vec<u64> {
    match golomb {
        GolombMode::None => comm.alltoallv(send_buf, send_counts).0,
        GolombMode::Sequential | GolombMode::Pipelined => {
            let offsets = exclusive_prefix_sum(send_counts);
            let mut payload = Vec::new();
            let mut byte_counts = Vec::with_capacity(comm.size());
            for (&offset, &count) in offsets.iter().zip(send_counts) {
                let slice = &send_buf[offset..offset + count];
                let span = match (slice.first(), slice.last()) {
                    (Some(&first), Some(&last)) => (last - first).max(1),
                    _ => 1,
                };
                let packet = encode_sorted(slice, span);
                byte_counts.push(packet.len());
                payload.extend_from_slice(&packet);
            }
            let (blob, blob_counts) = comm.alltoallv(&payload, &byte_counts);
            let mut received = Vec::new();
            let mut offset = 0;
            for &bytes in &blob_counts {
                received.extend(decode_sorted(&blob[offset..offset + bytes]));
                offset += bytes;
            }
            received
        }
    }
}

/// Walks the merged hash-rank stream and reports, per origin, the positions
/// of duplicated hashes (positions count within my interval of that origin's
/// hash list, offset by the exchanged global offsets).
fn find_duplicates<C: Communicator>(
    pairs: &[HashPeIndex],
    recv_data: &RecvData,
    comm: &C,
    golomb: GolombMode,
    measure: &mut Measurements,
) -> Vec<u64> {
    let mut result_sets: Vec<Vec<u64>> = vec![Vec::new(); comm.size()];
    let mut counters = recv_data.global_offsets.clone();

    if !pairs.is_empty() {
        let mut in_duplicate_run = false;
        for window in pairs.windows(2) {
            let (prev, curr) = (window[0], window[1]);
            let idx = counters[prev.pe];
            counters[prev.pe] += 1;
            if prev.hash == curr.hash {
                result_sets[prev.pe].push(idx as u64);
                in_duplicate_run = true;
            } else if in_duplicate_run {
                result_sets[prev.pe].push(idx as u64);
                in_duplicate_run = false;
            }
        }
        if in_duplicate_run {
            let last = pairs.last().unwrap();
            result_sets[last.pe].push(counters[last.pe] as u64);
            counters[last.pe] += 1;
        }
    }

    let send_counts: Vec<usize> = result_sets.iter().map(|s| s.len()).collect();
    let num_duplicates: usize = send_counts.iter().sum();
    measure.add("bloomfilter_found_duplicates", num_duplicates as u64);

    // Short-circuit the send-back if no rank found anything.
    let any_global = comm.allreduce_bool_or(num_duplicates > 0);
    if !any_global {
        return Vec::new();
    }

    let send_buf: Vec<u64> = result_sets.into_iter().flatten().collect();
    return_duplicates(&send_buf, &send_counts, comm, golomb)
}

/// Recursive duplicate detection over the grid communicators. Returns the
/// sorted positions of duplicated hashes within the hash sequence this rank
/// fed into the level.
fn find_remote_duplicates<C: Communicator>(
    comms: &[C],
    hash_values: Vec<u64>,
    range: HashRange,
    golomb: GolombMode,
    measure: &mut Measurements,
) -> Vec<u64> {
    let comm = &comms[0];
    let recv_data = send_to_filter(&hash_values, range, comm, golomb, measure);
    let pairs = recv_data.merged_hash_rank_pairs();
    measure.add("bloomfilter_recv_hashes", pairs.len() as u64);

    if comms.len() == 1 {
        return find_duplicates(&pairs, &recv_data, comm, golomb, measure);
    }

    let sub_range = range.bucket(comm.rank(), comm.size());
    let next_hashes: Vec<u64> = pairs.iter().map(|p| p.hash).collect();
    let duplicates = find_remote_duplicates(&comms[1..], next_hashes, sub_range, golomb, measure);
    debug_assert!(duplicates.windows(2).all(|w| w[0] < w[1]));

    // Remap positions in `pairs` to sender-local positions via the forward
    // offset counters, then route them back within this level.
    let mut send_counts = vec![0usize; comm.size()];
    for &d in &duplicates {
        send_counts[pairs[d as usize].pe] += 1;
    }
    let mut slots = exclusive_prefix_sum(&send_counts);
    let mut counters = recv_data.global_offsets.clone();
    let mut remote_idxs = vec![0u64; duplicates.len()];
    let mut walked = 0;
    for &d in &duplicates {
        let d = d as usize;
        while walked < d {
            counters[pairs[walked].pe] += 1;
            walked += 1;
        }
        let pe = pairs[d].pe;
        remote_idxs[slots[pe]] = counters[pe] as u64;
        slots[pe] += 1;
        counters[pe] += 1;
        walked += 1;
    }

    comm.alltoallv(&remote_idxs, &send_counts).0
}

struct GeneratedHashPairs {
    hash_idx_pairs: Vec<HashStringIndex>,
    /// Candidates whose predecessor shares at least `depth` prefix bytes.
    lcp_duplicates: Vec<usize>,
    /// Candidates shorter than the probe depth.
    eos_candidates: Vec<usize>,
}

/// Prefix-doubling duplicate filter over a communicator grid.
pub struct BloomFilter {
    algo: HashAlgo,
    golomb: GolombMode,
    /// Prefix hash of each string at the depth it was last probed with.
    hash_values: Vec<u64>,
}

impl BloomFilter {
    pub fn new(size: usize, algo: HashAlgo, golomb: GolombMode) -> Self {
        BloomFilter {
            algo,
            golomb,
            hash_values: vec![0; size],
        }
    }

    /// Hashes the candidates at `depth`, reusing the `prev_depth` hash via
    /// the incremental block form. Candidates LCP-equal to their immediate
    /// predecessor skip hashing; their predecessor becomes an `lcp_root` so
    /// the receiver still sees the full duplicate group.
    fn generate_hash_pairs<D: StringDesc>(
        &mut self,
        container: &StringLcpContainer<D>,
        candidates: &[usize],
        depth: usize,
        prev_depth: usize,
    ) -> GeneratedHashPairs {
        let mut hash_idx_pairs: Vec<HashStringIndex> = Vec::with_capacity(candidates.len());
        let mut lcp_duplicates = Vec::new();
        let mut eos_candidates = Vec::new();

        let mut prev = candidates.first().copied().unwrap_or(0);
        for &curr in candidates {
            let bytes = container.bytes(curr);
            if depth > bytes.len() {
                eos_candidates.push(curr);
            } else if prev + 1 == curr && container.lcps()[curr] >= depth {
                lcp_duplicates.push(curr);
                self.hash_values[curr] = self.hash_values[curr - 1];
                if let Some(last) = hash_idx_pairs.last_mut() {
                    if last.index + 1 == curr {
                        last.lcp_root = true;
                    }
                }
            } else {
                let prior = if prev_depth == 0 {
                    0
                } else {
                    self.hash_values[curr]
                };
                let hash = self.algo.hash_block(&bytes[prev_depth..depth], prior);
                self.hash_values[curr] = hash;
                hash_idx_pairs.push(HashStringIndex::new(hash, curr));
            }
            prev = curr;
        }

        GeneratedHashPairs {
            hash_idx_pairs,
            lcp_duplicates,
            eos_candidates,
        }
    }

    /// Marks runs of equal hashes in the sorted pair list. The first element
    /// of every run is still sent (`send_anyway`) so the receiver can detect
    /// duplicate groups that continue remotely; so is an `lcp_root`, which
    /// stands in for its LCP-compressed successors.
    fn mark_local_duplicates(pairs: &mut [HashStringIndex]) -> Vec<usize> {
        let mut local_duplicates = Vec::new();
        if pairs.is_empty() {
            return local_duplicates;
        }

        let mut i = 0;
        while i + 1 < pairs.len() {
            if pairs[i + 1].hash == pairs[i].hash {
                let run_hash = pairs[i].hash;
                pairs[i].local_duplicate = true;
                pairs[i].send_anyway = true;
                local_duplicates.push(pairs[i].index);
                i += 1;
                while i < pairs.len() && pairs[i].hash == run_hash {
                    pairs[i].local_duplicate = true;
                    local_duplicates.push(pairs[i].index);
                    i += 1;
                }
            } else {
                if pairs[i].lcp_root {
                    pairs[i].local_duplicate = true;
                    pairs[i].send_anyway = true;
                    local_duplicates.push(pairs[i].index);
                }
                i += 1;
            }
        }
        if i < pairs.len() && pairs[i].lcp_root {
            pairs[i].local_duplicate = true;
            pairs[i].send_anyway = true;
            local_duplicates.push(pairs[i].index);
        }
        local_duplicates
    }

    /// One filter round at `depth` over the candidate set. Fills
    /// `results[c] = depth` for all candidates (EOS candidates get their own
    /// length) and returns the sorted local indices still duplicated at this
    /// depth.
    pub fn filter_round<D: StringDesc, C: Communicator>(
        &mut self,
        container: &StringLcpContainer<D>,
        candidates: &[usize],
        depth: usize,
        prev_depth: usize,
        results: &mut [usize],
        comms: &[C],
        measure: &mut Measurements,
    ) -> Vec<usize> {
        measure.start("bloomfilter_prepare");
        let generated = self.generate_hash_pairs(container, candidates, depth, prev_depth);
        let GeneratedHashPairs {
            mut hash_idx_pairs,
            lcp_duplicates,
            eos_candidates,
        } = generated;

        hash_idx_pairs.sort_unstable_by_key(|p| (p.hash, p.index));
        let mut local_hash_dups = Self::mark_local_duplicates(&mut hash_idx_pairs);
        hash_idx_pairs.retain(HashStringIndex::should_send);
        measure.stop("bloomfilter_prepare");

        let hash_values: Vec<u64> = hash_idx_pairs.iter().map(|p| p.hash).collect();
        let remote_positions =
            find_remote_duplicates(comms, hash_values, HashRange::full(), self.golomb, measure);

        // Map filtered-list positions back to string indices, dropping those
        // already covered by the local duplicate set.
        let mut remote_dups: Vec<usize> = remote_positions
            .iter()
            .map(|&p| hash_idx_pairs[p as usize])
            .filter(|pair| !pair.send_anyway)
            .map(|pair| pair.index)
            .collect();
        remote_dups.sort_unstable();
        local_hash_dups.sort_unstable();

        for &candidate in candidates {
            results[candidate] = depth;
        }
        for &eos in &eos_candidates {
            results[eos] = container.bytes(eos).len();
        }

        // Three-way merge of the sorted duplicate index streams.
        let counts = [
            local_hash_dups.len(),
            lcp_duplicates.len(),
            remote_dups.len(),
        ];
        let all: Vec<usize> = local_hash_dups
            .into_iter()
            .chain(lcp_duplicates)
            .chain(remote_dups)
            .collect();
        multiway_merge(&all, &counts, |x| x)
    }

    /// Runs the prefix-doubling loop and returns each string's
    /// distinguishing depth. The container must be locally sorted with a
    /// consistent LCP array.
    pub fn compute_distinguishing_prefixes<D: StringDesc, C: Communicator>(
        &mut self,
        container: &StringLcpContainer<D>,
        init_depth: usize,
        comms: &[C],
        measure: &mut Measurements,
    ) -> Vec<usize> {
        assert_eq!(self.hash_values.len(), container.len());
        let world = &comms[0];

        let mut results = vec![0; container.len()];
        let mut candidates: Vec<usize> = (0..container.len()).collect();
        let max_len = world.allreduce_u64(
            container
                .descs()
                .iter()
                .map(|d| d.len() as u64)
                .max()
                .unwrap_or(0),
            crate::comm::ReduceOp::Max,
        ) as usize;

        let mut depth = init_depth;
        let mut prev_depth = 0;
        let mut round = 0;
        loop {
            let duplicates = self.filter_round(
                container,
                &candidates,
                depth,
                prev_depth,
                &mut results,
                comms,
                measure,
            );
            measure.add("bloomfilter_round_duplicates", duplicates.len() as u64);
            round += 1;

            let any_left = world.allreduce_bool_or(!duplicates.is_empty());
            if !any_left || depth > max_len {
                break;
            }
            candidates = duplicates;
            prev_depth = depth;
            depth *= 2;
        }
        measure.add("bloomfilter_rounds", round);
        results
    }
}
