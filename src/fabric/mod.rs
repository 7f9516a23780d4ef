use anyhow::Result;

use crate::plan::{Addr, NetAddr};

/// Core abstraction for network transport.
/// Messages are addressed by peer plus name, so concurrent collectives with
/// distinct names never see each other's data.
/// Implementations can be TCP (baseline) or in-process channels (testing).
#[async_trait::async_trait]
pub trait Fabric: Send + Sync {
    /// Send a named message to a peer; returns once handed off
    async fn send(&self, to: &Addr, buf: &[u8]) -> Result<()>;

    /// Wait for the next message with this name from this peer
    async fn recv(&self, from: &Addr) -> Result<Vec<u8>>;

    /// Address other peers know this process by
    fn self_addr(&self) -> &NetAddr;
}

pub mod local;
pub mod mailbox;
pub mod tcp;

pub use local::{FaultFn, LocalFabric};
pub use mailbox::Mailbox;
pub use tcp::TcpFabric;
