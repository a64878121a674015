//! Output checkers.
//!
//! Two predicates: is the output globally sorted, and is it a permutation of
//! the input? The sortedness check walks the rank boundary with the ring
//! helper pattern: each rank hands its last string (or the inherited
//! boundary, when it holds nothing) to its successor. The permutation check
//! compares commutative digests of the string multisets; the exhaustive
//! variant of the checker gathers both sides completely and is meant for
//! small test runs.

use crate::comm::{rotate_right, Communicator, ReduceOp};
use crate::container::{StringDesc, StringLcpContainer};
use crate::hash::HashAlgo;

/// Commutative multiset digest of a local string set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Digest {
    pub num_strings: u64,
    pub num_chars: u64,
    hash_sum: u64,
    hash_mix: u64,
}

pub fn local_digest<D: StringDesc>(container: &StringLcpContainer<D>) -> Digest {
    let mut digest = Digest {
        num_strings: container.len() as u64,
        num_chars: container.container().sum_len() as u64,
        ..Digest::default()
    };
    for i in 0..container.len() {
        let h = HashAlgo::Xx.hash_prefix(container.bytes(i), container.bytes(i).len());
        digest.hash_sum = digest.hash_sum.wrapping_add(h);
        digest.hash_mix = digest.hash_mix.wrapping_add(h.wrapping_mul(h) | 1);
    }
    digest
}

fn reduce_digest<C: Communicator>(digest: Digest, comm: &C) -> Digest {
    Digest {
        num_strings: comm.allreduce_u64(digest.num_strings, ReduceOp::Sum),
        num_chars: comm.allreduce_u64(digest.num_chars, ReduceOp::Sum),
        hash_sum: comm.allreduce_u64(digest.hash_sum, ReduceOp::Sum),
        hash_mix: comm.allreduce_u64(digest.hash_mix, ReduceOp::Sum),
    }
}

fn allreduce_and<C: Communicator>(value: bool, comm: &C) -> bool {
    !comm.allreduce_bool_or(!value)
}

/// True iff every local sequence is sorted and, for all `i < P-1`, the last
/// string on rank `i` is `<=` the first string on rank `i+1`. The boundary
/// strings travel one step along the ring; empty ranks forward the boundary
/// of their nearest non-empty predecessor.
pub fn is_sorted_globally<D: StringDesc, C: Communicator>(
    container: &StringLcpContainer<D>,
    comm: &C,
) -> bool {
    let mut sorted = container.container().is_sorted();

    if comm.size() > 1 {
        // Boundary message: [1, bytes...] carries a string, [0] means no
        // rank up to here holds one.
        let mut message = vec![0u8];
        if !container.is_empty() {
            message[0] = 1;
            message.extend_from_slice(container.bytes(container.len() - 1));
        }
        let skip = container.is_empty() && comm.rank() != 0;
        let boundary = rotate_right(&message, skip, comm);

        // The wrapped-around pair (last rank, first rank) carries no
        // ordering constraint.
        if comm.rank() > 0 && boundary[0] == 1 && !container.is_empty() {
            sorted &= &boundary[1..] <= container.bytes(0);
        }
    }

    allreduce_and(sorted, comm)
}

/// True iff the output string multiset matches the input digest: sizes and
/// global char counts agree and the hash multiset digests are equal.
pub fn is_permutation_of_input<D: StringDesc, C: Communicator>(
    input_digest: Digest,
    output: &StringLcpContainer<D>,
    comm: &C,
) -> bool {
    let input = reduce_digest(input_digest, comm);
    let output = reduce_digest(local_digest(output), comm);
    input == output
}

/// Exhaustive checker: stores a copy of the local input and later compares
/// the complete global input and output string sets element by element.
#[derive(Debug, Default)]
pub struct Checker {
    stored: Vec<u8>,
}

impl Checker {
    pub fn store_input<D: StringDesc>(&mut self, container: &StringLcpContainer<D>) {
        self.stored.clear();
        for i in 0..container.len() {
            self.stored.extend_from_slice(container.bytes(i));
            self.stored.push(0);
        }
    }

    /// Gathers both sides everywhere and compares the sorted string lists.
    pub fn check_complete_exchange<D: StringDesc, C: Communicator>(
        &self,
        output: &StringLcpContainer<D>,
        comm: &C,
    ) -> bool {
        let mut output_arena = Vec::with_capacity(output.char_size());
        for i in 0..output.len() {
            output_arena.extend_from_slice(output.bytes(i));
            output_arena.push(0);
        }

        let all_input = comm.allgatherv(&self.stored);
        let all_output = comm.allgatherv(&output_arena);

        let mut input_strings: Vec<&[u8]> =
            all_input.split(|&b| b == 0).collect();
        let mut output_strings: Vec<&[u8]> =
            all_output.split(|&b| b == 0).collect();
        input_strings.sort_unstable();
        output_strings.sort_unstable();
        input_strings == output_strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerBuilder, Str};
    use crate::local_comm::run_cluster;

    fn container_of(strings: &[&[u8]]) -> StringLcpContainer<Str> {
        let mut builder = ContainerBuilder::new();
        for s in strings {
            builder.push(s);
        }
        StringLcpContainer::new(builder.finish())
    }

    #[test]
    fn test_sorted_globally_accepts_range_partition() {
        let inputs: [&[&[u8]]; 4] = [&[b"a", b"b"], &[b"b", b"c"], &[], &[b"x"]];
        let results = run_cluster(4, |comm| {
            let c = container_of(inputs[comm.rank()]);
            is_sorted_globally(&c, &comm)
        });
        assert!(results.into_iter().all(|ok| ok));
    }

    #[test]
    fn test_sorted_globally_rejects_boundary_violation() {
        // Locally sorted, but rank 1 starts below rank 0's last string.
        let inputs: [&[&[u8]]; 2] = [&[b"m", b"z"], &[b"a", b"b"]];
        let results = run_cluster(2, |comm| {
            let c = container_of(inputs[comm.rank()]);
            is_sorted_globally(&c, &comm)
        });
        assert!(results.into_iter().all(|ok| !ok));
    }

    #[test]
    fn test_sorted_globally_rejects_local_disorder() {
        let results = run_cluster(2, |comm| {
            let c = container_of(if comm.rank() == 0 {
                &[b"b" as &[u8], b"a"]
            } else {
                &[b"c" as &[u8]]
            });
            is_sorted_globally(&c, &comm)
        });
        assert!(results.into_iter().all(|ok| !ok));
    }

    #[test]
    fn test_permutation_digest_accepts_redistribution() {
        let results = run_cluster(2, |comm| {
            let input = container_of(if comm.rank() == 0 {
                &[b"foo" as &[u8], b"bar"]
            } else {
                &[b"baz" as &[u8]]
            });
            // The "output" holds the same multiset, differently placed.
            let output = container_of(if comm.rank() == 0 {
                &[b"baz" as &[u8]]
            } else {
                &[b"bar" as &[u8], b"foo"]
            });
            is_permutation_of_input(local_digest(&input), &output, &comm)
        });
        assert!(results.into_iter().all(|ok| ok));
    }

    #[test]
    fn test_permutation_digest_rejects_loss_and_alteration() {
        let lost = run_cluster(2, |comm| {
            let input = container_of(&[b"foo", b"bar"]);
            let output = container_of(if comm.rank() == 0 {
                &[b"foo" as &[u8], b"bar", b"foo"]
            } else {
                &[b"bar" as &[u8]]
            });
            is_permutation_of_input(local_digest(&input), &output, &comm)
        });
        assert!(lost.into_iter().all(|ok| !ok));

        let altered = run_cluster(2, |comm| {
            let input = container_of(&[b"foo", b"bar"]);
            let output = container_of(if comm.rank() == 0 {
                &[b"foo" as &[u8], b"bar"]
            } else {
                &[b"foo" as &[u8], b"baR"]
            });
            is_permutation_of_input(local_digest(&input), &output, &comm)
        });
        assert!(altered.into_iter().all(|ok| !ok));
    }

    #[test]
    fn test_exhaustive_checker() {
        let results = run_cluster(2, |comm| {
            let input = container_of(if comm.rank() == 0 {
                &[b"one" as &[u8], b"two"]
            } else {
                &[b"three" as &[u8]]
            });
            let mut checker = Checker::default();
            checker.store_input(&input);

            let good = container_of(if comm.rank() == 0 {
                &[b"three" as &[u8]]
            } else {
                &[b"one" as &[u8], b"two"]
            });
            let bad = container_of(if comm.rank() == 0 {
                &[b"three" as &[u8]]
            } else {
                &[b"one" as &[u8], b"two", b"two"]
            });
            (
                checker.check_complete_exchange(&good, &comm),
                checker.check_complete_exchange(&bad, &comm),
            )
        });
        for (good, bad) in results {
            assert!(good);
            assert!(!bad);
        }
    }
}
