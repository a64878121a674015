//! Error types for configuration and container operations.
//!
//! Internal arithmetic invariants (offset sums, LCP array lengths, splitter
//! counts) are enforced with assertions instead: the sort is all-or-nothing
//! and a violated invariant aborts the whole job.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("container error: {0}")]
    Container(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn container(msg: impl Into<String>) -> Self {
        Error::Container(msg.into())
    }
}
