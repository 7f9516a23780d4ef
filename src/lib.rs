//! Graph-driven collectives: AllReduce, Reduce and Broadcast executed over
//! per-topology communication graphs, with the data of each call split
//! across the topology's strategies so multi-root topologies run their
//! partitions in parallel.

pub mod buffer;
pub mod config;
pub mod error;
pub mod fabric;
pub mod logging;
pub mod plan;
pub mod session;
pub mod status;
pub mod strategy;
pub mod workspace;

pub use buffer::{Buffer, DataType, ReduceOp};
pub use config::{Config, FabricConfig};
pub use error::{CollectiveError, Result};
pub use fabric::{Fabric, LocalFabric, TcpFabric};
pub use plan::{Cluster, NetAddr, PeerSpec};
pub use session::Session;
pub use status::Status;
pub use strategy::{Algorithm, Strategy};
pub use workspace::Workspace;
