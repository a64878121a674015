//! Abstract collective communication.
//!
//! The sorter talks to the message-passing runtime exclusively through this
//! trait: `size`/`rank`, `barrier`, `allreduce`, `alltoall(v)`,
//! `allgather(v)`, point-to-point `send`/`recv` for the ring rotation, and
//! `split` for building subcommunicators. Every rank must enter the same
//! sequence of collectives in the same order; that ordering is a global
//! invariant of the whole crate.
//!
//! Two backends exist: the in-process thread cluster in
//! [`crate::local_comm`] (default, used by tests and `--procs`), and an MPI
//! backend in [`crate::mpi_comm`] behind the `mpi-cluster` feature.

use byteorder::{ByteOrder, LittleEndian};

#[cfg(feature = "mpi-cluster")]
pub trait MaybeEquivalence: mpi::traits::Equivalence {}
#[cfg(feature = "mpi-cluster")]
impl<T: mpi::traits::Equivalence> MaybeEquivalence for T {}

#[cfg(not(feature = "mpi-cluster"))]
pub trait MaybeEquivalence {}
#[cfg(not(feature = "mpi-cluster"))]
impl<T> MaybeEquivalence for T {}

/// Element types that may cross the wire. Only `u8` (string payload) and
/// `u64` (hashes, counts, indices, LCPs) are ever exchanged.
pub trait WireElem: Copy + Default + Send + MaybeEquivalence + 'static {
    fn write_to(buf: &mut Vec<u8>, vals: &[Self]);
    fn read_from(bytes: &[u8]) -> Vec<Self>;
}

impl WireElem for u8 {
    fn write_to(buf: &mut Vec<u8>, vals: &[Self]) {
        buf.extend_from_slice(vals);
    }

    fn read_from(bytes: &[u8]) -> Vec<Self> {
        bytes.to_vec()
    }
}

impl WireElem for u64 {
    fn write_to(buf: &mut Vec<u8>, vals: &[Self]) {
        let start = buf.len();
        buf.resize(start + 8 * vals.len(), 0);
        LittleEndian::write_u64_into(vals, &mut buf[start..]);
    }

    fn read_from(bytes: &[u8]) -> Vec<Self> {
        assert_eq!(bytes.len() % 8, 0, "u64 payload not 8-byte aligned");
        let mut out = vec![0u64; bytes.len() / 8];
        LittleEndian::read_u64_into(bytes, &mut out);
        out
    }
}

/// Reduction operators required by the sorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    LogicalOr,
}

impl ReduceOp {
    pub fn apply(self, a: u64, b: u64) -> u64 {
        match self {
            ReduceOp::Sum => a.wrapping_add(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::LogicalOr => ((a != 0) || (b != 0)) as u64,
        }
    }
}

/// A communicator over a fixed group of ranks.
pub trait Communicator: Sized + Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn barrier(&self);

    fn allreduce_u64(&self, value: u64, op: ReduceOp) -> u64;

    /// One `u64` per peer, transposed.
    fn alltoall(&self, send: &[u64]) -> Vec<u64>;

    /// Exchanges `counts[r]` elements with each rank `r`; returns the
    /// received elements concatenated in rank order plus per-sender counts.
    fn alltoallv<T: WireElem>(&self, send: &[T], counts: &[usize]) -> (Vec<T>, Vec<usize>);

    fn allgather_u64(&self, value: u64) -> Vec<u64>;

    /// Concatenation of every rank's `data` in rank order.
    fn allgatherv<T: WireElem>(&self, data: &[T]) -> Vec<T>;

    fn send<T: WireElem>(&self, data: &[T], dest: usize);
    fn recv<T: WireElem>(&self, from: usize) -> Vec<T>;

    /// Collectively splits the group; ranks sharing `color` end up in the
    /// same subgroup, ordered by `key` (ties by old rank).
    fn split(&self, color: usize, key: usize) -> Self;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    fn allreduce_bool_or(&self, value: bool) -> bool {
        self.allreduce_u64(value as u64, ReduceOp::LogicalOr) != 0
    }
}

/// Exclusive prefix sum of `counts` (displacements for alltoallv buffers).
pub fn exclusive_prefix_sum(counts: &[usize]) -> Vec<usize> {
    let mut sum = 0;
    counts
        .iter()
        .map(|&c| {
            let offset = sum;
            sum += c;
            offset
        })
        .collect()
}

/// Rotates each rank's buffer one position right around the ring: rank `r`
/// receives the buffer of rank `r - 1 (mod P)`.
///
/// A rank entering with `skip` contributes nothing; it forwards the
/// received buffer to its successor, so the buffer of the nearest
/// non-skipping predecessor travels on. Skipping ranks receive before they
/// send, which costs O(P) latency in the worst case; the first rank must
/// not skip.
///
/// Non-skipping even ranks send before receiving, everyone else receives
/// first, so the ring never forms a cycle of blocked sends.
pub fn rotate_right<T: WireElem, C: Communicator>(data: &[T], skip: bool, comm: &C) -> Vec<T> {
    assert!(!(skip && comm.rank() == 0), "the first rank cannot skip");
    let size = comm.size();
    if size == 1 {
        return data.to_vec();
    }
    let succ = (comm.rank() + 1) % size;
    let pred = (comm.rank() + size - 1) % size;
    if skip {
        let received = comm.recv(pred);
        comm.send(&received, succ);
        received
    } else if comm.rank() % 2 == 0 {
        comm.send(data, succ);
        comm.recv(pred)
    } else {
        let received = comm.recv(pred);
        comm.send(data, succ);
        received
    }
}

/// Value of `value` on rank 0, on every rank.
pub fn broadcast_u64<C: Communicator>(value: u64, comm: &C) -> u64 {
    comm.allgather_u64(value)[0]
}

/// One throwaway random exchange so the first timed alltoallv does not pay
/// connection-establishment costs.
pub fn warmup<C: Communicator>(bytes_per_rank: usize, comm: &C) {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let payload: Vec<u8> = (0..bytes_per_rank * comm.size())
        .map(|_| rng.gen())
        .collect();
    let counts = vec![bytes_per_rank; comm.size()];
    let _ = comm.alltoallv(&payload, &counts);
    comm.barrier();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_prefix_sum() {
        assert_eq!(exclusive_prefix_sum(&[2, 3, 0, 1]), vec![0, 2, 5, 5]);
        assert!(exclusive_prefix_sum(&[]).is_empty());
    }

    #[test]
    fn test_wire_roundtrip_u64() {
        let vals = [0u64, 1, u64::MAX, 0xdead_beef];
        let mut buf = Vec::new();
        u64::write_to(&mut buf, &vals);
        assert_eq!(u64::read_from(&buf), vals);
    }

    #[test]
    fn test_reduce_ops() {
        assert_eq!(ReduceOp::Sum.apply(2, 3), 5);
        assert_eq!(ReduceOp::Max.apply(2, 3), 3);
        assert_eq!(ReduceOp::LogicalOr.apply(0, 0), 0);
        assert_eq!(ReduceOp::LogicalOr.apply(7, 0), 1);
    }
}
