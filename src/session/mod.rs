//! Sessions: the strategies of one topology bound to a cluster and a fabric.
//!
//! A session never changes once built. When the cluster changes, build a
//! new one. Every operation blocks until all of its network activity has
//! finished, successful or not.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::buffer::{Buffer, DataType, ReduceOp};
use crate::config::Config;
use crate::error::{CollectiveError, PartitionFailure, Result};
use crate::fabric::Fabric;
use crate::plan::{even_partition, Cluster, Graph, PartitionFn};
use crate::strategy::{create_clique_strategies, Strategy};
use crate::workspace::Workspace;

mod executor;

use executor::{run_graphs, Peers};
pub use executor::Accumulator;

/// Elements per peer in the warmup buffer.
const WARMUP_COUNT_PER_PEER: usize = 4;

pub struct Session {
    strategies: Vec<Strategy>,
    cluster: Cluster,
    fabric: Arc<dyn Fabric>,
}

impl Session {
    /// Builds the strategies of the configured algorithm over the whole
    /// cluster. No network traffic happens here.
    pub fn new(config: &Config, cluster: Cluster, fabric: Arc<dyn Fabric>) -> Result<Self> {
        let algo = config.algorithm();
        let strategies = algo.build(cluster.peers());
        debug!(
            "session for rank {} of {}: {} with {} strategies",
            cluster.self_rank(),
            cluster.size(),
            algo,
            strategies.len()
        );
        Self::with_strategies(strategies, cluster, fabric)
    }

    /// Binds caller-supplied strategies, rejecting graphs the executor
    /// cannot run.
    pub fn with_strategies(
        strategies: Vec<Strategy>,
        cluster: Cluster,
        fabric: Arc<dyn Fabric>,
    ) -> Result<Self> {
        if fabric.self_addr() != cluster.self_addr() {
            return Err(CollectiveError::InvalidCluster(format!(
                "fabric is bound to {} but rank {} is {}",
                fabric.self_addr(),
                cluster.self_rank(),
                cluster.self_addr()
            )));
        }
        if strategies.is_empty() {
            return Err(CollectiveError::NoStrategy);
        }
        validate_strategies(&strategies, cluster.size())?;
        Ok(Self {
            strategies,
            cluster,
            fabric,
        })
    }

    pub fn rank(&self) -> usize {
        self.cluster.self_rank()
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster.size()
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Reduce then broadcast, with the data split evenly across all
    /// strategies.
    pub async fn all_reduce(&self, w: Workspace<'_>) -> Result<()> {
        self.all_reduce_with(w, even_partition).await
    }

    pub async fn all_reduce_with(&self, w: Workspace<'_>, partition: PartitionFn) -> Result<()> {
        self.run_strategies(w, partition, &self.strategies).await
    }

    /// Reduce onto the root of the first strategy only.
    pub async fn reduce(&self, w: Workspace<'_>) -> Result<()> {
        let strategy = self.strategies.first().ok_or(CollectiveError::NoStrategy)?;
        self.run_graphs(w, std::slice::from_ref(strategy.reduce_graph()))
            .await
    }

    /// Broadcast from the root of the first strategy only.
    pub async fn broadcast(&self, w: Workspace<'_>) -> Result<()> {
        let strategy = self.strategies.first().ok_or(CollectiveError::NoStrategy)?;
        self.run_graphs(w, std::slice::from_ref(strategy.bcast_graph()))
            .await
    }

    /// A small clique all-reduce, whatever the configured algorithm, so
    /// every pair of peers has talked before real traffic starts.
    pub async fn warmup(&self) -> Result<()> {
        let count = self.cluster.size() * WARMUP_COUNT_PER_PEER;
        let send = Buffer::zeros(count, DataType::I32);
        let mut recv = Buffer::zeros(count, DataType::I32);
        let w = Workspace::new(&send, &mut recv, ReduceOp::Sum, "warmup")?;
        let strategies = create_clique_strategies(self.cluster.peers());
        self.run_strategies(w, even_partition, &strategies).await
    }

    async fn run_graphs(&self, w: Workspace<'_>, graphs: &[Graph]) -> Result<()> {
        let peers = Peers {
            cluster: &self.cluster,
            fabric: self.fabric.as_ref(),
        };
        run_graphs(&peers, w, graphs).await
    }

    /// Runs one partition of `w` through each strategy concurrently. A failed
    /// partition does not stop the others; all failures are reported together.
    async fn run_strategies(
        &self,
        w: Workspace<'_>,
        partition: PartitionFn,
        strategies: &[Strategy],
    ) -> Result<()> {
        let total = strategies.len();
        let parts = w.split(partition, total)?;
        let runs = parts
            .into_iter()
            .zip(strategies)
            .map(|(w, s)| self.run_graphs(w, s.graphs()));
        let results = join_all(runs).await;

        let failures: Vec<PartitionFailure> = results
            .into_iter()
            .enumerate()
            .filter_map(|(index, r)| {
                r.err().map(|error| {
                    warn!("partition {} failed: {}", index, error);
                    PartitionFailure { index, error }
                })
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CollectiveError::PartitionsFailed {
                failed: failures.len(),
                total,
                failures,
            })
        }
    }
}

/// Every graph must cover the cluster, and relays may have at most one
/// predecessor.
fn validate_strategies(strategies: &[Strategy], k: usize) -> Result<()> {
    for s in strategies {
        for (i, g) in s.graphs().iter().enumerate() {
            if g.size() != k {
                return Err(CollectiveError::GraphSizeMismatch {
                    graph: i,
                    size: g.size(),
                    expected: k,
                });
            }
            for rank in 0..k {
                let prevs = g.prevs(rank).len();
                if !g.is_self_loop(rank) && prevs > 1 {
                    return Err(CollectiveError::InvalidGraph {
                        graph: i,
                        rank,
                        prevs,
                    });
                }
            }
        }
    }
    Ok(())
}
