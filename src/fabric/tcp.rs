use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Fabric, Mailbox};
use crate::config::FabricConfig;
use crate::plan::{Addr, NetAddr};

/// Longest message name either end of a connection accepts.
pub const MAX_NAME_LEN: usize = 4096;

/// Outbound stream to one destination, empty until first use or after a
/// failed write.
type Slot = Arc<Mutex<Option<TcpStream>>>;

/// TCP-based fabric implementation.
///
/// Every process listens on its own address. Outbound streams are opened
/// lazily, one per destination, and start with a handshake naming the
/// sender's listen address. After that each message is a frame:
/// `u32 name_len | name | u64 payload_len | payload`, little endian.
/// Names over [`MAX_NAME_LEN`] and payloads over
/// [`FabricConfig::max_message_bytes`] are refused by both ends.
pub struct TcpFabric {
    self_addr: NetAddr,
    config: FabricConfig,
    mailbox: Arc<Mailbox>,
    /// Outbound streams indexed by destination
    peers: Mutex<HashMap<NetAddr, Slot>>,
    acceptor: JoinHandle<()>,
}

impl TcpFabric {
    /// Bind `self_addr` and start accepting peers. Port 0 picks a free port,
    /// reported back through [`Fabric::self_addr`].
    pub async fn new(self_addr: NetAddr, config: FabricConfig) -> Result<Self> {
        let listener = TcpListener::bind((self_addr.host.as_str(), self_addr.port))
            .await
            .with_context(|| format!("bind {}", self_addr))?;
        let self_addr = NetAddr::new(self_addr.host, listener.local_addr()?.port());
        info!("tcp fabric listening on {}", self_addr);

        let mailbox = Arc::new(Mailbox::new());
        let acceptor = tokio::spawn(accept_loop(
            listener,
            mailbox.clone(),
            config.max_message_bytes,
        ));

        Ok(Self {
            self_addr,
            config,
            mailbox,
            peers: Mutex::new(HashMap::new()),
            acceptor,
        })
    }

    /// The map lock is only held to look the slot up, so connecting to a
    /// slow peer never blocks sends to the others.
    async fn slot(&self, to: &NetAddr) -> Slot {
        let mut peers = self.peers.lock().await;
        peers.entry(to.clone()).or_default().clone()
    }

    async fn open(&self, to: &NetAddr) -> Result<TcpStream> {
        let mut stream = self.connect(to).await?;
        write_handshake(&mut stream, &self.self_addr).await?;
        Ok(stream)
    }

    /// Peers come up at different times, so retry with backoff.
    async fn connect(&self, to: &NetAddr) -> Result<TcpStream> {
        let mut delay = self.config.initial_backoff();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match TcpStream::connect((to.host.as_str(), to.port)).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("connected to {} after {} attempt(s)", to, attempts);
                    return Ok(stream);
                }
                Err(e) if attempts <= self.config.connect_retries => {
                    debug!("connect to {} failed ({}), retrying in {:?}", to, e, delay);
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(2.0).min(self.config.max_backoff());
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("connect to {} failed after {} attempts", to, attempts)
                    })
                }
            }
        }
    }
}

impl Drop for TcpFabric {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

#[async_trait::async_trait]
impl Fabric for TcpFabric {
    async fn send(&self, to: &Addr, buf: &[u8]) -> Result<()> {
        if to.name.len() > MAX_NAME_LEN {
            bail!(
                "message name of {} bytes exceeds {}",
                to.name.len(),
                MAX_NAME_LEN
            );
        }
        if buf.len() as u64 > self.config.max_message_bytes {
            bail!(
                "message {} of {} bytes exceeds {}",
                to.name,
                buf.len(),
                self.config.max_message_bytes
            );
        }
        if to.peer == self.self_addr {
            return self.mailbox.deliver(&self.self_addr, &to.name, buf.to_vec()).await;
        }

        let slot = self.slot(&to.peer).await;
        let mut guard = slot.lock().await;
        if guard.is_none() {
            *guard = Some(self.open(&to.peer).await?);
        }
        let Some(stream) = guard.as_mut() else {
            bail!("no stream to {}", to.peer);
        };
        let written = write_frame(stream, &to.name, buf).await;
        if written.is_err() {
            // reconnect on the next send
            *guard = None;
        }
        written.with_context(|| format!("send {} to {}", to.name, to.peer))
    }

    async fn recv(&self, from: &Addr) -> Result<Vec<u8>> {
        self.mailbox.recv(from).await
    }

    fn self_addr(&self) -> &NetAddr {
        &self.self_addr
    }
}

async fn write_frame(stream: &mut TcpStream, name: &str, buf: &[u8]) -> Result<()> {
    let mut header = Vec::with_capacity(12 + name.len());
    header.extend_from_slice(&(name.len() as u32).to_le_bytes());
    header.extend_from_slice(name.as_bytes());
    header.extend_from_slice(&(buf.len() as u64).to_le_bytes());
    stream.write_all(&header).await?;
    stream.write_all(buf).await?;
    Ok(())
}

async fn accept_loop(listener: TcpListener, mailbox: Arc<Mailbox>, max_message_bytes: u64) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let mailbox = mailbox.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_peer(stream, mailbox, max_message_bytes).await {
                        warn!("connection from {} dropped: {:#}", remote, e);
                    }
                });
            }
            Err(e) => {
                warn!("accept failed: {}", e);
            }
        }
    }
}

async fn serve_peer(
    mut stream: TcpStream,
    mailbox: Arc<Mailbox>,
    max_message_bytes: u64,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let from = read_handshake(&mut stream).await?;
    debug!("accepted peer {}", from);
    loop {
        let name_len = match stream.read_u32_le().await {
            Ok(n) => n as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if name_len > MAX_NAME_LEN {
            bail!("message name of {} bytes from {}", name_len, from);
        }
        let mut name = vec![0u8; name_len];
        stream.read_exact(&mut name).await?;
        let name = String::from_utf8(name).map_err(|_| anyhow!("non utf-8 name from {}", from))?;

        let len = stream.read_u64_le().await?;
        if len > max_message_bytes {
            bail!("message {} of {} bytes from {}", name, len, from);
        }
        let mut payload = vec![0u8; usize::try_from(len)?];
        stream.read_exact(&mut payload).await?;
        mailbox.deliver(&from, &name, payload).await?;
    }
}

async fn write_handshake(stream: &mut TcpStream, addr: &NetAddr) -> Result<()> {
    let mut buf = Vec::with_capacity(4 + addr.host.len());
    buf.extend_from_slice(&(addr.host.len() as u16).to_le_bytes());
    buf.extend_from_slice(addr.host.as_bytes());
    buf.extend_from_slice(&addr.port.to_le_bytes());
    stream.write_all(&buf).await?;
    Ok(())
}

async fn read_handshake(stream: &mut TcpStream) -> Result<NetAddr> {
    let host_len = stream.read_u16_le().await? as usize;
    let mut host = vec![0u8; host_len];
    stream.read_exact(&mut host).await?;
    let host = String::from_utf8(host).map_err(|_| anyhow!("non utf-8 host in handshake"))?;
    let port = stream.read_u16_le().await?;
    Ok(NetAddr::new(host, port))
}
