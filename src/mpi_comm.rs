//! MPI cluster backend (feature `mpi-cluster`).
//!
//! Thin adapter from the crate's [`Communicator`](crate::comm::Communicator)
//! trait onto rsmpi. Every operation maps onto exactly one MPI collective;
//! any MPI failure aborts the job, matching the all-or-nothing error policy.

use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::{Communicator as _, CommunicatorCollectives as _, Destination as _, Source as _};
use mpi::Count;

use crate::comm::{exclusive_prefix_sum, Communicator, ReduceOp, WireElem};

pub struct MpiComm {
    inner: SimpleCommunicator,
}

impl MpiComm {
    /// Wraps the world communicator. The caller keeps the `mpi::Universe`
    /// alive for the duration of the run.
    pub fn world(universe: &mpi::environment::Universe) -> Self {
        MpiComm {
            inner: universe.world(),
        }
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.inner.rank() as usize
    }

    fn size(&self) -> usize {
        self.inner.size() as usize
    }

    fn barrier(&self) {
        self.inner.barrier();
    }

    fn allreduce_u64(&self, value: u64, op: ReduceOp) -> u64 {
        let mut result = 0u64;
        match op {
            ReduceOp::Sum => {
                self.inner
                    .all_reduce_into(&value, &mut result, SystemOperation::sum())
            }
            ReduceOp::Max => {
                self.inner
                    .all_reduce_into(&value, &mut result, SystemOperation::max())
            }
            ReduceOp::LogicalOr => {
                self.inner
                    .all_reduce_into(&value, &mut result, SystemOperation::logical_or())
            }
        }
        result
    }

    fn alltoall(&self, send: &[u64]) -> Vec<u64> {
        assert_eq!(send.len(), self.size(), "alltoall needs one value per peer");
        let mut recv = vec![0u64; self.size()];
        self.inner.all_to_all_into(send, &mut recv[..]);
        recv
    }

    fn alltoallv<T: WireElem>(&self, send: &[T], counts: &[usize]) -> (Vec<T>, Vec<usize>) {
        assert_eq!(counts.len(), self.size());
        assert_eq!(counts.iter().sum::<usize>(), send.len());

        let recv_counts: Vec<usize> = self
            .alltoall(&counts.iter().map(|&c| c as u64).collect::<Vec<_>>())
            .into_iter()
            .map(|c| c as usize)
            .collect();

        let send_counts: Vec<Count> = counts.iter().map(|&c| c as Count).collect();
        let send_displs: Vec<Count> = exclusive_prefix_sum(counts)
            .into_iter()
            .map(|d| d as Count)
            .collect();
        let recv_counts_i: Vec<Count> = recv_counts.iter().map(|&c| c as Count).collect();
        let recv_displs: Vec<Count> = exclusive_prefix_sum(&recv_counts)
            .into_iter()
            .map(|d| d as Count)
            .collect();

        let total: usize = recv_counts.iter().sum();
        let mut recv = vec![T::default(); total];
        {
            let send_partition = Partition::new(send, send_counts, send_displs);
            let mut recv_partition =
                PartitionMut::new(&mut recv[..], recv_counts_i, recv_displs);
            self.inner
                .all_to_all_varcount_into(&send_partition, &mut recv_partition);
        }
        (recv, recv_counts)
    }

    fn allgather_u64(&self, value: u64) -> Vec<u64> {
        let mut recv = vec![0u64; self.size()];
        self.inner.all_gather_into(&value, &mut recv[..]);
        recv
    }

    fn allgatherv<T: WireElem>(&self, data: &[T]) -> Vec<T> {
        let counts: Vec<usize> = self
            .allgather_u64(data.len() as u64)
            .into_iter()
            .map(|c| c as usize)
            .collect();
        let counts_i: Vec<Count> = counts.iter().map(|&c| c as Count).collect();
        let displs: Vec<Count> = exclusive_prefix_sum(&counts)
            .into_iter()
            .map(|d| d as Count)
            .collect();

        let total: usize = counts.iter().sum();
        let mut recv = vec![T::default(); total];
        {
            let mut recv_partition = PartitionMut::new(&mut recv[..], counts_i, displs);
            self.inner.all_gather_varcount_into(data, &mut recv_partition);
        }
        recv
    }

    fn send<T: WireElem>(&self, data: &[T], dest: usize) {
        self.inner.process_at_rank(dest as mpi::Rank).send(data);
    }

    fn recv<T: WireElem>(&self, from: usize) -> Vec<T> {
        let (data, _status) = self
            .inner
            .process_at_rank(from as mpi::Rank)
            .receive_vec::<T>();
        data
    }

    fn split(&self, color: usize, key: usize) -> Self {
        let inner = self
            .inner
            .split_by_color_with_key(Color::with_value(color as i32), key as i32)
            .expect("split excluded the calling rank");
        MpiComm { inner }
    }
}
