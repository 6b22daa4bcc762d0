//! [`Network`] over iroh QUIC connections.
//!
//! One ALPN carries every link. The dialer opens a single bidirectional
//! stream and names the virtual port it wants in the first two bytes; each
//! message after that is a big-endian `u32` length followed by the payload.
//! Background tasks on a private runtime bridge the streams to the polled
//! [`Link`] contract.

use std::{
    collections::HashMap,
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use bytes::Bytes;
use iroh::{
    Endpoint, EndpointId, SecretKey,
    endpoint::{Connection, RecvStream, SendStream},
    protocol::{AcceptError, ProtocolHandler, Router},
};
use tokio::{io::AsyncWriteExt, runtime::Runtime, sync::mpsc};
use tracing::{debug, info, warn};

use crate::{
    error::Error,
    transport::{Link, LinkStatus, Listener, Network, SendError, lock},
};

pub const ALPN: &[u8] = b"cp-multiplayer/1";
const MAX_FRAME: usize = 1 << 20;

type Ports = Arc<Mutex<HashMap<u16, mpsc::UnboundedSender<IrohLink>>>>;

pub struct IrohNetwork {
    router: Router,
    ports: Ports,
    next_port: u16,
    capacity: usize,
    runtime: Arc<Runtime>,
}

impl IrohNetwork {
    /// Bind an endpoint whose identity is persisted under `path`.
    pub fn new(path: PathBuf, capacity: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_cpus::get().clamp(1, 4))
            .thread_name("cp-multiplayer-net")
            .enable_all()
            .build()
            .context("unable to start the network runtime")?;
        let ports = Ports::default();
        let handler = PortHandler {
            ports: ports.clone(),
            capacity,
        };
        let router = runtime.block_on(async move {
            // create dir if it doesn't already exist
            tokio::fs::create_dir_all(&path).await?;
            let key = load_secret_key(path.join("keypair")).await?;
            let endpoint = Endpoint::builder().secret_key(key).bind().await?;
            anyhow::Ok(Router::builder(endpoint).accept(ALPN, handler).spawn())
        })?;
        info!(id = %router.endpoint().id(), "iroh endpoint bound");
        Ok(Self {
            router,
            ports,
            next_port: 0,
            capacity,
            runtime: Arc::new(runtime),
        })
    }

    pub fn id(&self) -> EndpointId {
        self.router.endpoint().id()
    }

    pub fn shutdown(self) -> Result<()> {
        self.runtime.block_on(self.router.shutdown())?;
        Ok(())
    }
}

impl Network for IrohNetwork {
    fn listen(&mut self) -> crate::Result<Box<dyn Listener>> {
        self.next_port = self.next_port.wrapping_add(1);
        let port = self.next_port;
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.ports).insert(port, tx);
        let address = format!("{}/{port}", self.id());
        debug!(%address, "iroh listener opened");
        Ok(Box::new(IrohListener {
            address,
            port,
            ports: self.ports.clone(),
            incoming: rx,
        }))
    }

    fn connect(&mut self, address: &str) -> crate::Result<Box<dyn Link>> {
        let (id, port) = parse_address(address)?;
        let (link, ends) =
            IrohLink::pair(address.to_string(), self.capacity, LinkStatus::Connecting);
        let endpoint = self.router.endpoint().clone();
        self.runtime.spawn(async move {
            let status = ends.status.clone();
            if let Err(e) = dial(endpoint, id, port, ends).await {
                warn!(%id, port, error = %e, "iroh link failed");
            }
            *lock(&status) = LinkStatus::Closed;
        });
        Ok(Box::new(link))
    }
}

fn parse_address(address: &str) -> crate::Result<(EndpointId, u16)> {
    let invalid = || Error::Transport(format!("invalid iroh address '{address}'"));
    let (id, port) = address.rsplit_once('/').ok_or_else(invalid)?;
    let id = EndpointId::from_str(id).map_err(|_| invalid())?;
    let port = port.parse().map_err(|_| invalid())?;
    Ok((id, port))
}

async fn dial(endpoint: Endpoint, id: EndpointId, port: u16, ends: StreamEnds) -> Result<()> {
    let connection = endpoint.connect(id, ALPN).await?;
    let (mut send, recv) = connection.open_bi().await?;
    send.write_all(&port.to_be_bytes()).await?;
    *lock(&ends.status) = LinkStatus::Connected;
    bridge(connection, send, recv, ends).await
}

/// Accepts dialers and routes them to the listener on their virtual port.
#[derive(Debug, Clone)]
struct PortHandler {
    ports: Ports,
    capacity: usize,
}

impl ProtocolHandler for PortHandler {
    async fn accept(&self, connection: Connection) -> Result<(), AcceptError> {
        let (send, mut recv) = connection.accept_bi().await.map_err(AcceptError::from_err)?;
        let mut port = [0u8; 2];
        recv.read_exact(&mut port)
            .await
            .map_err(AcceptError::from_err)?;
        let port = u16::from_be_bytes(port);

        let Some(listener) = lock(&self.ports).get(&port).cloned() else {
            debug!(port, "dial to a closed port");
            connection.close(1u32.into(), b"no listener");
            return Ok(());
        };
        let (link, ends) =
            IrohLink::pair(format!("iroh port {port}"), self.capacity, LinkStatus::Connected);
        if listener.send(link).is_err() {
            connection.close(1u32.into(), b"no listener");
            return Ok(());
        }
        let status = ends.status.clone();
        if let Err(e) = bridge(connection, send, recv, ends).await {
            debug!(port, error = %e, "iroh link closed");
        }
        *lock(&status) = LinkStatus::Closed;
        Ok(())
    }
}

/// The task side of an [`IrohLink`].
struct StreamEnds {
    outbound: mpsc::Receiver<Bytes>,
    inbound: mpsc::Sender<Bytes>,
    status: Arc<Mutex<LinkStatus>>,
}

/// Pump frames both ways until either side goes away.
async fn bridge(
    connection: Connection,
    send: SendStream,
    recv: RecvStream,
    ends: StreamEnds,
) -> Result<()> {
    let StreamEnds {
        outbound, inbound, ..
    } = ends;
    let result = tokio::select! {
        r = write_frames(send, outbound) => r,
        r = read_frames(recv, inbound) => r,
    };
    connection.close(0u32.into(), b"bye");
    result
}

async fn write_frames(mut send: SendStream, mut outbound: mpsc::Receiver<Bytes>) -> Result<()> {
    while let Some(frame) = outbound.recv().await {
        send.write_all(&(frame.len() as u32).to_be_bytes()).await?;
        send.write_all(&frame).await?;
    }
    send.finish()?;
    Ok(())
}

async fn read_frames(mut recv: RecvStream, inbound: mpsc::Sender<Bytes>) -> Result<()> {
    loop {
        let mut len = [0u8; 4];
        recv.read_exact(&mut len).await?;
        let len = u32::from_be_bytes(len) as usize;
        anyhow::ensure!(len <= MAX_FRAME, "oversized frame of {len} bytes");
        let mut frame = vec![0; len];
        recv.read_exact(&mut frame).await?;
        if inbound.send(Bytes::from(frame)).await.is_err() {
            return Ok(());
        }
    }
}

struct IrohListener {
    address: String,
    port: u16,
    ports: Ports,
    incoming: mpsc::UnboundedReceiver<IrohLink>,
}

impl Listener for IrohListener {
    fn address(&self) -> &str {
        &self.address
    }

    fn try_accept(&mut self) -> Option<Box<dyn Link>> {
        self.incoming
            .try_recv()
            .ok()
            .map(|link| Box::new(link) as Box<dyn Link>)
    }

    fn close(&mut self) {
        lock(&self.ports).remove(&self.port);
        self.incoming.close();
    }
}

impl Drop for IrohListener {
    fn drop(&mut self) {
        self.close();
    }
}

struct IrohLink {
    tx: Option<mpsc::Sender<Bytes>>,
    rx: Option<mpsc::Receiver<Bytes>>,
    status: Arc<Mutex<LinkStatus>>,
    peer: String,
}

impl std::fmt::Debug for IrohLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrohLink").field("peer", &self.peer).finish()
    }
}

impl IrohLink {
    fn pair(peer: String, capacity: usize, status: LinkStatus) -> (Self, StreamEnds) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let status = Arc::new(Mutex::new(status));
        let link = Self {
            tx: Some(out_tx),
            rx: Some(in_rx),
            status: status.clone(),
            peer,
        };
        let ends = StreamEnds {
            outbound: out_rx,
            inbound: in_tx,
            status,
        };
        (link, ends)
    }
}

impl Link for IrohLink {
    fn status(&self) -> LinkStatus {
        if self.tx.is_none() {
            return LinkStatus::Closed;
        }
        *lock(&self.status)
    }

    fn try_send(&mut self, payload: Bytes) -> Result<(), SendError> {
        if self.status() == LinkStatus::Closed {
            return Err(SendError::Closed);
        }
        let Some(tx) = &self.tx else {
            return Err(SendError::Closed);
        };
        match tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(payload)) => Err(SendError::Full(payload)),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.tx = None;
                Err(SendError::Closed)
            }
        }
    }

    fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.as_mut()?.try_recv().ok()
    }

    fn close(&mut self) {
        self.tx = None;
        self.rx = None;
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

async fn load_secret_key(key_path: PathBuf) -> Result<SecretKey> {
    if key_path.exists() {
        let key_bytes = tokio::fs::read(&key_path).await?;
        let key: [u8; 32] = key_bytes
            .get(..32)
            .and_then(|bytes| bytes.try_into().ok())
            .with_context(|| format!("corrupt keyfile '{}'", key_path.display()))?;
        Ok(SecretKey::from_bytes(&key))
    } else {
        let secret_key = SecretKey::generate(&mut rand::rng());

        // Try to canonicalize if possible
        let key_path = key_path.canonicalize().unwrap_or(key_path);
        let key_path_parent = key_path.parent().ok_or_else(|| {
            anyhow::anyhow!("no parent directory found for '{}'", key_path.display())
        })?;
        tokio::fs::create_dir_all(&key_path_parent).await?;

        // write to tempfile, then move it into place
        let (file, temp_file_path) = tempfile::NamedTempFile::new_in(key_path_parent)
            .context("unable to create tempfile")?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);
        file.write_all(&secret_key.to_bytes())
            .await
            .context("unable to write keyfile")?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(temp_file_path, key_path)
            .await
            .context("failed to rename keyfile")?;

        Ok(secret_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_addresses() {
        assert!(parse_address("no-port").is_err());
        assert!(parse_address("nonsense/12").is_err());
    }

    #[test]
    fn persisted_key_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let path = dir.path().join("keypair");
        let first = runtime.block_on(load_secret_key(path.clone())).unwrap();
        let second = runtime.block_on(load_secret_key(path)).unwrap();
        assert_eq!(first.public(), second.public());
    }
}
