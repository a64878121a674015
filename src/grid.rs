//! Subcommunicator grid for the multi-level sort.
//!
//! A level schedule `[l1 > l2 > …]` turns the world communicator into a
//! cascade `g_0 ⊃ g_1 ⊃ …` where `|g_0| = P` and `g_k` colors `g_{k-1}` into
//! equal groups of size `l_k` (consecutive ranks share a group). The grid is
//! immutable after construction and shared by the merge sort and the
//! duplicate detector.

use crate::comm::Communicator;

pub struct CommGrid<C: Communicator> {
    comms: Vec<C>,
}

impl<C: Communicator> CommGrid<C> {
    /// Builds the cascade. `levels` must be strictly decreasing, smaller
    /// than the world size, and each entry must divide its predecessor
    /// (checked by [`crate::config::SortConfig::effective_levels`]).
    pub fn new(world: C, levels: &[usize]) -> Self {
        let mut comms = vec![world];
        for &group_size in levels {
            let current = comms.last().unwrap();
            assert!(
                group_size < current.size() && current.size() % group_size == 0,
                "level schedule entry {group_size} does not partition a \
                 communicator of size {}",
                current.size()
            );
            let sub = current.split(current.rank() / group_size, current.rank());
            comms.push(sub);
        }
        CommGrid { comms }
    }

    /// Number of grid levels (communicators), including the world.
    pub fn num_levels(&self) -> usize {
        self.comms.len()
    }

    pub fn comm(&self, level: usize) -> &C {
        &self.comms[level]
    }

    pub fn comms(&self) -> &[C] {
        &self.comms
    }

    pub fn world(&self) -> &C {
        &self.comms[0]
    }

    /// The smallest communicator; equal to the world without a schedule.
    pub fn leaf(&self) -> &C {
        self.comms.last().unwrap()
    }

    /// How many buckets the data is split into at `level`: the number of
    /// next-level groups inside this communicator, or one bucket per rank at
    /// the last level.
    pub fn num_partitions(&self, level: usize) -> usize {
        self.comms[level].size() / self.group_size(level)
    }

    /// Size of the receiver unit at `level`: the next-smaller group size,
    /// or 1 at the last level where each rank is its own receiver.
    pub fn group_size(&self, level: usize) -> usize {
        if level + 1 < self.comms.len() {
            self.comms[level + 1].size()
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_comm::run_cluster;

    #[test]
    fn test_grid_without_schedule() {
        let results = run_cluster(4, |comm| {
            let grid = CommGrid::new(comm, &[]);
            (
                grid.num_levels(),
                grid.num_partitions(0),
                grid.group_size(0),
                grid.leaf().size(),
            )
        });
        for r in results {
            assert_eq!(r, (1, 4, 1, 4));
        }
    }

    #[test]
    fn test_grid_two_levels() {
        let results = run_cluster(8, |comm| {
            let world_rank = comm.rank();
            let grid = CommGrid::new(comm, &[4, 2]);
            (
                world_rank,
                grid.num_levels(),
                (grid.comm(0).size(), grid.comm(1).size(), grid.comm(2).size()),
                (grid.num_partitions(0), grid.num_partitions(1), grid.num_partitions(2)),
                (grid.group_size(0), grid.group_size(1), grid.group_size(2)),
                (grid.comm(1).rank(), grid.comm(2).rank()),
            )
        });
        for (world_rank, levels, sizes, partitions, group_sizes, sub_ranks) in results {
            assert_eq!(levels, 3);
            assert_eq!(sizes, (8, 4, 2));
            assert_eq!(partitions, (2, 2, 2));
            assert_eq!(group_sizes, (4, 2, 1));
            assert_eq!(sub_ranks, (world_rank % 4, world_rank % 2));
        }
    }
}
