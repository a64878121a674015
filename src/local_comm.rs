//! In-process cluster backend.
//!
//! Runs one thread per rank and implements the collective primitives with
//! per-rank mailboxes. Sends are buffered (never block), receives block on a
//! condition variable with a generous timeout so a crashed peer surfaces as
//! a panic instead of a hang. This backend exists so that every multi-rank
//! code path can be exercised by `cargo test` without an MPI installation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::comm::{Communicator, ReduceOp, WireElem};

const RECV_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-rank mailbox holding one FIFO queue per sender.
struct Mailbox {
    queues: Mutex<Vec<VecDeque<Vec<u8>>>>,
    ready: Condvar,
}

impl Mailbox {
    fn new(senders: usize) -> Self {
        Mailbox {
            queues: Mutex::new(vec![VecDeque::new(); senders]),
            ready: Condvar::new(),
        }
    }

    fn push(&self, from: usize, message: Vec<u8>) {
        let mut queues = self.queues.lock().unwrap();
        queues[from].push_back(message);
        self.ready.notify_all();
    }

    fn pop(&self, from: usize) -> Vec<u8> {
        let mut queues = self.queues.lock().unwrap();
        loop {
            if let Some(message) = queues[from].pop_front() {
                return message;
            }
            let (guard, result) = self.ready.wait_timeout(queues, RECV_TIMEOUT).unwrap();
            queues = guard;
            assert!(
                !result.timed_out(),
                "collective timed out waiting for rank {from}; a peer died or \
                 the collective ordering invariant was violated"
            );
        }
    }
}

/// Shared state of one communicator group.
struct Group {
    id: u64,
    boxes: Vec<Arc<Mailbox>>,
    registry: Arc<Registry>,
}

impl Group {
    fn size(&self) -> usize {
        self.boxes.len()
    }
}

/// Cluster-wide table of subgroups created by `split`. Groups are keyed by
/// (parent id, color, membership fingerprint) so every member resolves the
/// same shared state without extra communication.
struct Registry {
    groups: Mutex<HashMap<(u64, u64, u64), Arc<Group>>>,
    next_id: AtomicU64,
}

impl Registry {
    fn new() -> Self {
        Registry {
            groups: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn get_or_create(self: &Arc<Self>, key: (u64, u64, u64), size: usize) -> Arc<Group> {
        let mut groups = self.groups.lock().unwrap();
        groups
            .entry(key)
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                Arc::new(Group {
                    id,
                    boxes: (0..size).map(|_| Arc::new(Mailbox::new(size))).collect(),
                    registry: Arc::clone(self),
                })
            })
            .clone()
    }
}

/// One rank's handle on an in-process communicator.
pub struct LocalComm {
    rank: usize,
    group: Arc<Group>,
}

impl LocalComm {
    fn exchange_bytes(&self, per_peer: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let size = self.group.size();
        debug_assert_eq!(per_peer.len(), size);

        let mut received: Vec<Vec<u8>> = vec![Vec::new(); size];
        for (peer, payload) in per_peer.into_iter().enumerate() {
            if peer == self.rank {
                received[peer] = payload;
            } else {
                self.group.boxes[peer].push(self.rank, payload);
            }
        }
        for (peer, slot) in received.iter_mut().enumerate() {
            if peer != self.rank {
                *slot = self.group.boxes[self.rank].pop(peer);
            }
        }
        received
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.size()
    }

    fn barrier(&self) {
        self.allgather_u64(0);
    }

    fn allreduce_u64(&self, value: u64, op: ReduceOp) -> u64 {
        self.allgather_u64(value)
            .into_iter()
            .reduce(|a, b| op.apply(a, b))
            .expect("allreduce over empty communicator")
    }

    fn alltoall(&self, send: &[u64]) -> Vec<u64> {
        assert_eq!(send.len(), self.size(), "alltoall needs one value per peer");
        let counts = vec![1; self.size()];
        let (received, _) = self.alltoallv(send, &counts);
        received
    }

    fn alltoallv<T: WireElem>(&self, send: &[T], counts: &[usize]) -> (Vec<T>, Vec<usize>) {
        assert_eq!(counts.len(), self.size());
        assert_eq!(counts.iter().sum::<usize>(), send.len());

        let mut offset = 0;
        let per_peer: Vec<Vec<u8>> = counts
            .iter()
            .map(|&count| {
                let mut buf = Vec::new();
                T::write_to(&mut buf, &send[offset..offset + count]);
                offset += count;
                buf
            })
            .collect();

        let mut data = Vec::new();
        let mut recv_counts = Vec::with_capacity(self.size());
        for payload in self.exchange_bytes(per_peer) {
            let decoded = T::read_from(&payload);
            recv_counts.push(decoded.len());
            data.extend(decoded);
        }
        (data, recv_counts)
    }

    fn allgather_u64(&self, value: u64) -> Vec<u64> {
        self.allgatherv(&[value])
    }

    fn allgatherv<T: WireElem>(&self, data: &[T]) -> Vec<T> {
        let mut buf = Vec::new();
        T::write_to(&mut buf, data);
        let per_peer = vec![buf; self.size()];
        self.exchange_bytes(per_peer)
            .into_iter()
            .flat_map(|payload| T::read_from(&payload))
            .collect()
    }

    fn send<T: WireElem>(&self, data: &[T], dest: usize) {
        assert_ne!(dest, self.rank, "self-send through the mailbox");
        let mut buf = Vec::new();
        T::write_to(&mut buf, data);
        self.group.boxes[dest].push(self.rank, buf);
    }

    fn recv<T: WireElem>(&self, from: usize) -> Vec<T> {
        T::read_from(&self.group.boxes[self.rank].pop(from))
    }

    fn split(&self, color: usize, key: usize) -> Self {
        let pairs = self.allgatherv(&[color as u64, key as u64]);

        // Members of my color, ordered by (key, old rank).
        let mut members: Vec<(u64, usize)> = (0..self.size())
            .filter(|&r| pairs[2 * r] == color as u64)
            .map(|r| (pairs[2 * r + 1], r))
            .collect();
        members.sort_unstable();

        let new_rank = members
            .iter()
            .position(|&(_, r)| r == self.rank)
            .expect("split color does not include the calling rank");

        // Fingerprint the membership so distinct colorings of the same
        // parent never alias each other's mailboxes.
        let mut fingerprint = 0xcbf2_9ce4_8422_2325u64;
        for &(key, rank) in &members {
            for word in [key, rank as u64] {
                fingerprint ^= word;
                fingerprint = fingerprint.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }

        let group = self.group.registry.get_or_create(
            (self.group.id, color as u64, fingerprint),
            members.len(),
        );
        LocalComm {
            rank: new_rank,
            group,
        }
    }
}

/// Spawns `num_ranks` threads, hands each a world communicator, and returns
/// the per-rank results in rank order.
pub fn run_cluster<R, F>(num_ranks: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalComm) -> R + Send + Sync,
{
    assert!(num_ranks > 0, "cluster needs at least one rank");

    let registry = Arc::new(Registry::new());
    let world = registry.get_or_create((0, 0, 0), num_ranks);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..num_ranks)
            .map(|rank| {
                let comm = LocalComm {
                    rank,
                    group: Arc::clone(&world),
                };
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("rank thread panicked"))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{broadcast_u64, exclusive_prefix_sum, rotate_right};

    #[test]
    fn test_allgather_and_reduce() {
        let results = run_cluster(4, |comm| {
            let gathered = comm.allgather_u64(comm.rank() as u64 + 1);
            let sum = comm.allreduce_u64(comm.rank() as u64 + 1, ReduceOp::Sum);
            let max = comm.allreduce_u64(comm.rank() as u64 + 1, ReduceOp::Max);
            (gathered, sum, max)
        });
        for (gathered, sum, max) in results {
            assert_eq!(gathered, vec![1, 2, 3, 4]);
            assert_eq!(sum, 10);
            assert_eq!(max, 4);
        }
    }

    #[test]
    fn test_alltoall_transpose() {
        let results = run_cluster(3, |comm| {
            let send: Vec<u64> = (0..3).map(|r| (comm.rank() * 10 + r) as u64).collect();
            comm.alltoall(&send)
        });
        // Received value from rank s at slot s is s*10 + my rank.
        for (rank, received) in results.into_iter().enumerate() {
            let expected: Vec<u64> = (0..3).map(|s| (s * 10 + rank) as u64).collect();
            assert_eq!(received, expected);
        }
    }

    #[test]
    fn test_alltoallv_uneven() {
        let results = run_cluster(2, |comm| {
            // Rank 0 sends [7] to itself and [8, 9] to rank 1;
            // rank 1 sends [1, 2, 3] to rank 0 and nothing to itself.
            let (send, counts): (Vec<u64>, Vec<usize>) = if comm.rank() == 0 {
                (vec![7, 8, 9], vec![1, 2])
            } else {
                (vec![1, 2, 3], vec![3, 0])
            };
            comm.alltoallv(&send, &counts)
        });
        assert_eq!(results[0], (vec![7, 1, 2, 3], vec![1, 3]));
        assert_eq!(results[1], (vec![8, 9], vec![2, 0]));
    }

    #[test]
    fn test_rotate_right() {
        for ranks in [1, 2, 3, 4, 5] {
            let results = run_cluster(ranks, |comm| {
                let data = vec![comm.rank() as u64; comm.rank() + 1];
                rotate_right(&data, false, &comm)
            });
            for (rank, received) in results.into_iter().enumerate() {
                let pred = (rank + ranks - 1) % ranks;
                assert_eq!(received, vec![pred as u64; pred + 1]);
            }
        }
    }

    #[test]
    fn test_rotate_right_skips_forward_their_predecessor() {
        // Ranks 1 and 2 skip: both see rank 0's buffer, and rank 3 receives
        // it forwarded across the two skipping ranks.
        let results = run_cluster(4, |comm| {
            let data = vec![comm.rank() as u64];
            let skip = comm.rank() == 1 || comm.rank() == 2;
            rotate_right(&data, skip, &comm)
        });
        assert_eq!(results[0], vec![3]);
        assert_eq!(results[1], vec![0]);
        assert_eq!(results[2], vec![0]);
        assert_eq!(results[3], vec![0]);
    }

    #[test]
    fn test_broadcast_from_root() {
        let results = run_cluster(4, |comm| {
            let value = if comm.is_root() { 42 } else { 0 };
            broadcast_u64(value, &comm)
        });
        assert!(results.into_iter().all(|v| v == 42));
    }

    #[test]
    fn test_split_into_pairs() {
        let results = run_cluster(4, |comm| {
            let sub = comm.split(comm.rank() / 2, comm.rank());
            let gathered = sub.allgather_u64(comm.rank() as u64);
            (sub.rank(), sub.size(), gathered)
        });
        assert_eq!(results[0], (0, 2, vec![0, 1]));
        assert_eq!(results[1], (1, 2, vec![0, 1]));
        assert_eq!(results[2], (0, 2, vec![2, 3]));
        assert_eq!(results[3], (1, 2, vec![2, 3]));
    }

    #[test]
    fn test_split_distinct_colorings_do_not_alias() {
        let results = run_cluster(4, |comm| {
            let by_half = comm.split(comm.rank() / 2, 0);
            let by_parity = comm.split(comm.rank() % 2, 0);
            let a = by_half.allreduce_u64(comm.rank() as u64, ReduceOp::Sum);
            let b = by_parity.allreduce_u64(comm.rank() as u64, ReduceOp::Sum);
            (a, b)
        });
        assert_eq!(results[0], (1, 2)); // 0+1 and 0+2
        assert_eq!(results[3], (5, 4)); // 2+3 and 1+3
    }

    #[test]
    fn test_prefix_sum_helper_matches_counts() {
        let counts = [3usize, 0, 2];
        assert_eq!(exclusive_prefix_sum(&counts), vec![0, 3, 3]);
    }
}
