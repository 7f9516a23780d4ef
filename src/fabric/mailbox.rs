use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, Mutex};

use crate::plan::{Addr, NetAddr};

type Queue = (
    mpsc::UnboundedSender<Vec<u8>>,
    Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
);

fn new_queue() -> Queue {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Arc::new(Mutex::new(rx)))
}

/// Incoming messages of one process, queued per (source peer, name).
/// Messages with the same key are received in arrival order.
///
/// A queue exists while it holds messages or has a receiver waiting on it,
/// so per-step names do not accumulate.
#[derive(Default)]
pub struct Mailbox {
    queues: Mutex<HashMap<(NetAddr, String), Queue>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deliver(&self, from: &NetAddr, name: &str, payload: Vec<u8>) -> Result<()> {
        // sent under the map lock so a concurrent `recv` cannot drop the
        // queue between lookup and send
        let mut queues = self.queues.lock().await;
        let (tx, _) = queues
            .entry((from.clone(), name.to_string()))
            .or_insert_with(new_queue);
        tx.send(payload)
            .map_err(|_| anyhow!("mailbox for {}@{} closed", name, from))
    }

    pub async fn recv(&self, from: &Addr) -> Result<Vec<u8>> {
        let key = (from.peer.clone(), from.name.clone());
        let rx = {
            let mut queues = self.queues.lock().await;
            queues.entry(key.clone()).or_insert_with(new_queue).1.clone()
        };
        let mut guard = rx.lock().await;
        let payload = guard
            .recv()
            .await
            .ok_or_else(|| anyhow!("mailbox for {} closed", from))?;

        let mut queues = self.queues.lock().await;
        // the map holds one reference and this call the other
        let idle = guard.is_empty() && Arc::strong_count(&rx) == 2;
        if idle && queues.get(&key).is_some_and(|(_, q)| Arc::ptr_eq(q, &rx)) {
            queues.remove(&key);
        }
        // release our reference before the map lock so the next receiver
        // sees an accurate count
        drop(guard);
        drop(rx);
        drop(queues);
        Ok(payload)
    }

    /// Number of live (peer, name) queues.
    pub async fn len(&self) -> usize {
        self.queues.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
