//! Cluster description and communication plans: who the peers are, which
//! directed graphs connect them, and how data is split across graphs.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CollectiveError, Result};

pub mod graph;
pub mod partition;

pub use graph::Graph;
pub use partition::{even_partition, PartitionFn};

/// Network location of one peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetAddr {
    pub host: String,
    pub port: u16,
}

impl NetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Qualifies the peer address with a message name.
    pub fn with_name(&self, name: &str) -> Addr {
        Addr {
            peer: self.clone(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NetAddr {
    type Err = CollectiveError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CollectiveError::InvalidCluster(format!("missing port in {s:?}")))?;
        let port = port
            .parse()
            .map_err(|_| CollectiveError::InvalidCluster(format!("invalid port in {s:?}")))?;
        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for NetAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// A peer address plus the name that correlates one message stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Addr {
    pub peer: NetAddr,
    pub name: String,
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.peer)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSpec {
    pub net_addr: NetAddr,
}

impl From<NetAddr> for PeerSpec {
    fn from(net_addr: NetAddr) -> Self {
        Self { net_addr }
    }
}

/// The fixed set of peers taking part in collectives, and which one we are.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    peers: Vec<PeerSpec>,
    self_rank: usize,
}

impl Cluster {
    pub fn new(peers: Vec<PeerSpec>, self_rank: usize) -> Result<Self> {
        if peers.is_empty() {
            return Err(CollectiveError::InvalidCluster("no peers".into()));
        }
        if self_rank >= peers.len() {
            return Err(CollectiveError::InvalidCluster(format!(
                "rank {} out of range for {} peers",
                self_rank,
                peers.len()
            )));
        }
        for (i, p) in peers.iter().enumerate() {
            if peers[..i].contains(p) {
                return Err(CollectiveError::InvalidCluster(format!(
                    "duplicate peer {}",
                    p.net_addr
                )));
            }
        }
        Ok(Self { peers, self_rank })
    }

    pub fn peers(&self) -> &[PeerSpec] {
        &self.peers
    }

    pub fn peer(&self, rank: usize) -> Option<&PeerSpec> {
        self.peers.get(rank)
    }

    pub fn self_rank(&self) -> usize {
        self.self_rank
    }

    pub fn self_addr(&self) -> &NetAddr {
        &self.peers[self.self_rank].net_addr
    }

    pub fn size(&self) -> usize {
        self.peers.len()
    }
}
