//! Topology algorithms and the strategies they produce.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CollectiveError, Result};
use crate::plan::graph::{
    gen_circular_graph_pair, gen_default_bcast_graph, gen_default_reduce_graph,
    gen_star_bcast_graph,
};
use crate::plan::{Graph, PeerSpec};

/// One complete topology for a collective: a reduce graph followed by a
/// broadcast graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Strategy {
    graphs: [Graph; 2],
}

impl Strategy {
    pub fn new(reduce: Graph, bcast: Graph) -> Self {
        Self {
            graphs: [reduce, bcast],
        }
    }

    pub fn reduce_graph(&self) -> &Graph {
        &self.graphs[0]
    }

    pub fn bcast_graph(&self) -> &Graph {
        &self.graphs[1]
    }

    /// Both graphs, reduce first.
    pub fn graphs(&self) -> &[Graph] {
        &self.graphs
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Star,
    Clique,
    Ring,
    Tree,
}

impl Algorithm {
    /// Parses an algorithm name, falling back to [`Algorithm::Star`] with a
    /// warning for anything unrecognised.
    pub fn resolve(name: &str) -> Self {
        match name.parse() {
            Ok(algo) => algo,
            Err(e) => {
                warn!("{}, fallback to {}", e, Algorithm::Star);
                Algorithm::Star
            }
        }
    }

    pub fn build(self, peers: &[PeerSpec]) -> Vec<Strategy> {
        match self {
            Algorithm::Star => create_star_strategies(peers),
            Algorithm::Clique => create_clique_strategies(peers),
            Algorithm::Ring => create_ring_strategies(peers),
            Algorithm::Tree => create_tree_strategies(peers),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Algorithm::Star => "STAR",
            Algorithm::Clique => "CLIQUE",
            Algorithm::Ring => "RING",
            Algorithm::Tree => "TREE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Algorithm {
    type Err = CollectiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "STAR" => Ok(Algorithm::Star),
            "CLIQUE" => Ok(Algorithm::Clique),
            "RING" => Ok(Algorithm::Ring),
            "TREE" => Ok(Algorithm::Tree),
            _ => Err(CollectiveError::UnknownAlgorithm(s.to_string())),
        }
    }
}

pub fn create_star_strategies(peers: &[PeerSpec]) -> Vec<Strategy> {
    let bcast = gen_star_bcast_graph(peers.len(), 0);
    let reduce = gen_default_reduce_graph(&bcast);
    vec![Strategy::new(reduce, bcast)]
}

pub fn create_tree_strategies(peers: &[PeerSpec]) -> Vec<Strategy> {
    let bcast = gen_default_bcast_graph(peers);
    let reduce = gen_default_reduce_graph(&bcast);
    vec![Strategy::new(reduce, bcast)]
}

/// One star per root, so every peer aggregates a slice of the data.
pub fn create_clique_strategies(peers: &[PeerSpec]) -> Vec<Strategy> {
    let k = peers.len();
    (0..k)
        .map(|r| {
            let bcast = gen_star_bcast_graph(k, r);
            let reduce = gen_default_reduce_graph(&bcast);
            Strategy::new(reduce, bcast)
        })
        .collect()
}

pub fn create_ring_strategies(peers: &[PeerSpec]) -> Vec<Strategy> {
    let k = peers.len();
    (0..k)
        .map(|r| {
            let (reduce, bcast) = gen_circular_graph_pair(k, r);
            Strategy::new(reduce, bcast)
        })
        .collect()
}
