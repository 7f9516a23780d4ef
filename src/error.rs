use std::fmt;

use thiserror::Error;

/// Which half of a graph step a peer failure happened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Recv,
    Send,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Recv => write!(f, "recv"),
            Step::Send => write!(f, "send"),
        }
    }
}

/// A single failed partition, kept so callers can see more than the count.
#[derive(Debug)]
pub struct PartitionFailure {
    pub index: usize,
    pub error: CollectiveError,
}

#[derive(Error, Debug)]
pub enum CollectiveError {
    #[error("unknown allreduce algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid cluster: {0}")]
    InvalidCluster(String),

    #[error("graph {graph}: relay node {rank} has {prevs} predecessors, expected at most 1")]
    InvalidGraph {
        graph: usize,
        rank: usize,
        prevs: usize,
    },

    #[error("graph {graph}: has {size} nodes but cluster has {expected} peers")]
    GraphSizeMismatch {
        graph: usize,
        size: usize,
        expected: usize,
    },

    #[error("buffer mismatch: {0}")]
    BufferMismatch(String),

    #[error("invalid partition: {0}")]
    Partition(String),

    #[error("{step} with peer {peer} on {name:?} failed: {reason}")]
    Transport {
        peer: usize,
        name: String,
        step: Step,
        reason: String,
    },

    #[error("{failed} strategies among {total} failed")]
    PartitionsFailed {
        failed: usize,
        total: usize,
        failures: Vec<PartitionFailure>,
    },

    #[error("session has no strategy")]
    NoStrategy,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CollectiveError>;
