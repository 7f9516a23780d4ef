//! Runs one workspace through a sequence of graphs: per graph, take input
//! from predecessors (reduce or relay), then forward to successors.

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::debug;

use crate::buffer::{BufferView, BufferViewMut, ReduceOp};
use crate::error::{CollectiveError, Result, Step};
use crate::fabric::Fabric;
use crate::plan::{Addr, Cluster, Graph};
use crate::workspace::Workspace;

/// How much of an operation's input has reached the receive buffer.
///
/// While nothing has arrived, the send buffer is still the freshest value
/// and is what gets forwarded; afterwards the receive buffer is. Seeding
/// (send op incoming) and accumulating (recv op= incoming) are decided and
/// applied in the same call, so arrivals can be folded in any order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Accumulator {
    #[default]
    AwaitingFirst,
    Accumulating(usize),
}

impl Accumulator {
    pub fn contributions(&self) -> usize {
        match self {
            Accumulator::AwaitingFirst => 0,
            Accumulator::Accumulating(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Accumulator::AwaitingFirst
    }

    /// Combines one predecessor's contribution into `recv`.
    pub fn fold(
        &mut self,
        recv: &mut BufferViewMut<'_>,
        send: BufferView<'_>,
        incoming: BufferView<'_>,
        op: ReduceOp,
    ) -> Result<()> {
        match *self {
            Accumulator::AwaitingFirst => recv.transform2(send, incoming, op)?,
            Accumulator::Accumulating(_) => recv.transform(incoming, op)?,
        }
        *self = Accumulator::Accumulating(self.contributions() + 1);
        Ok(())
    }

    /// Overwrites `recv` with a relayed value.
    pub fn relay(&mut self, recv: &mut BufferViewMut<'_>, incoming: BufferView<'_>) -> Result<()> {
        recv.copy_from(incoming)?;
        *self = Accumulator::Accumulating(self.contributions() + 1);
        Ok(())
    }

    /// The bytes successors should receive.
    pub fn payload<'b>(&self, send: &'b [u8], recv: &'b [u8]) -> &'b [u8] {
        if self.is_empty() {
            send
        } else {
            recv
        }
    }
}

/// Rank-addressed messaging on top of a fabric.
pub(crate) struct Peers<'a> {
    pub cluster: &'a Cluster,
    pub fabric: &'a dyn Fabric,
}

impl Peers<'_> {
    fn addr(&self, rank: usize, name: &str) -> Result<Addr> {
        self.cluster
            .peer(rank)
            .map(|p| p.net_addr.with_name(name))
            .ok_or_else(|| {
                CollectiveError::InvalidCluster(format!(
                    "rank {} not in cluster of {}",
                    rank,
                    self.cluster.size()
                ))
            })
    }

    async fn send_to(&self, rank: usize, name: &str, payload: &[u8]) -> Result<()> {
        let addr = self.addr(rank, name)?;
        self.fabric
            .send(&addr, payload)
            .await
            .map_err(|e| transport_error(rank, name, Step::Send, e))
    }

    async fn recv_from(&self, rank: usize, name: &str, expected: usize) -> Result<Vec<u8>> {
        let addr = self.addr(rank, name)?;
        let data = self
            .fabric
            .recv(&addr)
            .await
            .map_err(|e| transport_error(rank, name, Step::Recv, e))?;
        if data.len() != expected {
            return Err(CollectiveError::BufferMismatch(format!(
                "{:?} from peer {}: got {} bytes, expected {}",
                name,
                rank,
                data.len(),
                expected
            )));
        }
        Ok(data)
    }
}

fn transport_error(peer: usize, name: &str, step: Step, e: anyhow::Error) -> CollectiveError {
    CollectiveError::Transport {
        peer,
        name: name.to_string(),
        step,
        reason: format!("{e:#}"),
    }
}

fn first_error(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
    results.into_iter().collect()
}

/// Runs `graphs` in order for this process's rank. On success the
/// workspace's receive buffer holds the result.
pub(crate) async fn run_graphs(peers: &Peers<'_>, mut w: Workspace<'_>, graphs: &[Graph]) -> Result<()> {
    if peers.cluster.size() == 1 {
        let src = w.send_buf;
        return w.recv_buf.copy_from(src);
    }

    let me = peers.cluster.self_rank();
    let mut acc = Accumulator::default();
    for (i, g) in graphs.iter().enumerate() {
        let prevs = g.prevs(me);
        debug!(name = %w.name, graph = i, prevs = ?prevs, nexts = ?g.nexts(me), "graph step");
        if g.is_self_loop(me) {
            recv_onto(peers, &mut w, prevs, &mut acc).await?;
        } else {
            match prevs {
                [] if acc.is_empty() => {
                    let src = w.send_buf;
                    w.recv_buf.copy_from(src)?;
                }
                [] => {}
                [prev] => {
                    let data = peers.recv_from(*prev, &w.name, w.byte_len()).await?;
                    let incoming = BufferView::from_bytes(&data, w.send_buf.dtype())?;
                    acc.relay(&mut w.recv_buf, incoming)?;
                }
                _ => {
                    return Err(CollectiveError::InvalidGraph {
                        graph: i,
                        rank: me,
                        prevs: prevs.len(),
                    })
                }
            }
        }
        send_to_all(peers, &w, g.nexts(me), &acc).await?;
    }
    Ok(())
}

/// Receives from every predecessor concurrently. The receivers hand their
/// payloads over a channel to a single folding loop that owns the receive
/// buffer.
async fn recv_onto(
    peers: &Peers<'_>,
    w: &mut Workspace<'_>,
    prevs: &[usize],
    acc: &mut Accumulator,
) -> Result<()> {
    if prevs.is_empty() {
        return Ok(());
    }
    let name = w.name.as_str();
    let expected = w.send_buf.byte_len();
    let send = w.send_buf;
    let op = w.op;
    let recv = &mut w.recv_buf;

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(prevs.len());
    let receivers = join_all(prevs.iter().map(|&rank| {
        let tx = tx.clone();
        async move {
            let data = peers.recv_from(rank, name, expected).await?;
            tx.send(data)
                .await
                .map_err(|_| CollectiveError::Transport {
                    peer: rank,
                    name: name.to_string(),
                    step: Step::Recv,
                    reason: "accumulator stopped".into(),
                })
        }
    }));
    drop(tx);

    let folding = async move {
        while let Some(data) = rx.recv().await {
            let incoming = BufferView::from_bytes(&data, send.dtype())?;
            acc.fold(recv, send, incoming, op)?;
        }
        Ok::<(), CollectiveError>(())
    };

    let (received, folded) = tokio::join!(receivers, folding);
    folded?;
    first_error(received)
}

/// Forwards the current value to every successor concurrently.
async fn send_to_all(
    peers: &Peers<'_>,
    w: &Workspace<'_>,
    nexts: &[usize],
    acc: &Accumulator,
) -> Result<()> {
    let payload = acc.payload(w.send_buf.bytes(), w.recv_buf.bytes());
    let sends = nexts
        .iter()
        .map(|&rank| peers.send_to(rank, &w.name, payload));
    first_error(join_all(sends).await)
}
