//! Distributed string sorting over collective message passing.
//!
//! This crate sorts a byte-string collection that is partitioned across the
//! P ranks of a cluster, producing globally sorted, range-partitioned output
//! or a global rank permutation of the input. The building blocks:
//!
//! - arena-backed string containers with LCP arrays ([`container`])
//! - a multi-level merge sort over a cascade of subcommunicators
//!   ([`sorter`], [`grid`], [`sample`], [`exchange`], [`merge`])
//! - a distributed duplicate-prefix detector driving prefix doubling
//!   ([`bloomfilter`], [`hash`], [`golomb`])
//! - output verification ([`verify`]) and measurement collection
//!   ([`measure`])
//!
//! All communication goes through the [`comm::Communicator`] trait. The
//! in-process backend ([`local_comm`]) runs a whole cluster as threads of
//! one process, which is how the test suite and the `--procs` CLI flag
//! exercise multi-rank behavior; the `mpi-cluster` feature adds an MPI
//! backend for real clusters.

pub mod bloomfilter;
pub mod comm;
pub mod config;
pub mod container;
pub mod error;
pub mod exchange;
pub mod generator;
pub mod golomb;
pub mod grid;
pub mod hash;
pub mod local_comm;
pub mod measure;
pub mod merge;
#[cfg(feature = "mpi-cluster")]
pub mod mpi_comm;
pub mod permutation;
pub mod sample;
pub mod sort_local;
pub mod sorter;
pub mod verify;

pub use config::{AllToAllRoutine, GolombMode, PermutationKind, SamplePolicy, SortConfig};
pub use container::{StringContainer, StringLcpContainer};
pub use error::{Error, Result};
