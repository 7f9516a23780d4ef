use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};

use super::{Fabric, Mailbox};
use crate::plan::{Addr, NetAddr};

/// Predicate over message addresses; matching sends and receives fail.
pub type FaultFn = Arc<dyn Fn(&Addr) -> bool + Send + Sync>;

struct Shared {
    mailboxes: HashMap<NetAddr, Arc<Mailbox>>,
    sent: AtomicUsize,
    fault: Option<FaultFn>,
}

/// In-process fabric: one instance per simulated rank, all sharing a set of
/// mailboxes. Used by tests to run whole clusters inside one runtime.
#[derive(Clone)]
pub struct LocalFabric {
    self_addr: NetAddr,
    shared: Arc<Shared>,
}

impl LocalFabric {
    /// Addresses `local:0 .. local:k-1`, one fabric per address.
    pub fn new_group(k: usize) -> Vec<Self> {
        Self::with_fault(k, None)
    }

    /// Like [`LocalFabric::new_group`], but every send or receive whose
    /// address matches `fault` fails immediately on every rank.
    pub fn with_fault(k: usize, fault: Option<FaultFn>) -> Vec<Self> {
        let addrs = (0..k).map(|i| NetAddr::new("local", i as u16)).collect();
        Self::from_addrs(addrs, fault)
    }

    /// One fabric per given address, e.g. to simulate several hosts.
    pub fn from_addrs(addrs: Vec<NetAddr>, fault: Option<FaultFn>) -> Vec<Self> {
        let shared = Arc::new(Shared {
            mailboxes: addrs
                .iter()
                .map(|a| (a.clone(), Arc::new(Mailbox::new())))
                .collect(),
            sent: AtomicUsize::new(0),
            fault,
        });
        addrs
            .into_iter()
            .map(|self_addr| Self {
                self_addr,
                shared: shared.clone(),
            })
            .collect()
    }

    /// Messages sent by the whole group so far.
    pub fn messages_sent(&self) -> usize {
        self.shared.sent.load(Ordering::SeqCst)
    }

    fn check_fault(&self, addr: &Addr) -> Result<()> {
        if let Some(fault) = &self.shared.fault {
            if fault(addr) {
                bail!("injected fault on {}", addr);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Fabric for LocalFabric {
    async fn send(&self, to: &Addr, buf: &[u8]) -> Result<()> {
        self.check_fault(to)?;
        let mailbox = self
            .shared
            .mailboxes
            .get(&to.peer)
            .ok_or_else(|| anyhow!("no local peer at {}", to.peer))?;
        self.shared.sent.fetch_add(1, Ordering::SeqCst);
        mailbox.deliver(&self.self_addr, &to.name, buf.to_vec()).await
    }

    async fn recv(&self, from: &Addr) -> Result<Vec<u8>> {
        self.check_fault(from)?;
        let mailbox = self
            .shared
            .mailboxes
            .get(&self.self_addr)
            .ok_or_else(|| anyhow!("no local mailbox for {}", self.self_addr))?;
        mailbox.recv(from).await
    }

    fn self_addr(&self) -> &NetAddr {
        &self.self_addr
    }
}
