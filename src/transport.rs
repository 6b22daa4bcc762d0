//! Reliable message links between peers.
//!
//! Everything here is non-blocking: the owner polls links once per frame.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, trace};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Closed,
}

/// Outcome of a failed [`Link::try_send`].
#[derive(Debug)]
pub enum SendError {
    /// The transport is rate limiting; the payload is handed back.
    Full(Bytes),
    Closed,
}

/// One point-to-point reliable ordered connection.
pub trait Link: Send {
    fn status(&self) -> LinkStatus;
    fn try_send(&mut self, payload: Bytes) -> Result<(), SendError>;
    fn try_recv(&mut self) -> Option<Bytes>;
    fn close(&mut self);
    /// Human readable remote description, for logs.
    fn peer(&self) -> &str;
}

pub trait Listener: Send {
    /// Opaque address a remote [`Network::connect`] can use.
    fn address(&self) -> &str;
    fn try_accept(&mut self) -> Option<Box<dyn Link>>;
    fn close(&mut self);
}

pub trait Network: Send {
    fn listen(&mut self) -> Result<Box<dyn Listener>>;
    fn connect(&mut self, address: &str) -> Result<Box<dyn Link>>;
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Hub {
    next_port: u64,
    listeners: HashMap<String, mpsc::UnboundedSender<MemoryLink>>,
}

/// In-process network. Clones share the same address space.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
    name: String,
    capacity: usize,
}

impl MemoryNetwork {
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::default(),
            name: "mem".to_string(),
            capacity: capacity.max(1),
        }
    }

    /// Another handle onto the same hub, labelled for logs.
    pub fn endpoint(&self, name: &str) -> Self {
        Self {
            hub: self.hub.clone(),
            name: name.to_string(),
            capacity: self.capacity,
        }
    }
}

impl Network for MemoryNetwork {
    fn listen(&mut self) -> Result<Box<dyn Listener>> {
        let mut hub = lock(&self.hub);
        hub.next_port += 1;
        let address = format!("{}:{}", self.name, hub.next_port);
        let (tx, rx) = mpsc::unbounded_channel();
        hub.listeners.insert(address.clone(), tx);
        debug!(%address, "memory listener opened");
        Ok(Box::new(MemoryListener {
            hub: self.hub.clone(),
            address,
            incoming: rx,
        }))
    }

    fn connect(&mut self, address: &str) -> Result<Box<dyn Link>> {
        let hub = lock(&self.hub);
        let Some(accept) = hub.listeners.get(address) else {
            return Err(Error::Transport(format!("nothing listening on '{address}'")));
        };
        let (a_tx, b_rx) = mpsc::channel(self.capacity);
        let (b_tx, a_rx) = mpsc::channel(self.capacity);
        let remote = MemoryLink {
            tx: Some(b_tx),
            rx: Some(b_rx),
            peer: self.name.clone(),
        };
        accept
            .send(remote)
            .map_err(|_| Error::Transport(format!("listener '{address}' is gone")))?;
        trace!(from = %self.name, to = address, "memory link opened");
        Ok(Box::new(MemoryLink {
            tx: Some(a_tx),
            rx: Some(a_rx),
            peer: address.to_string(),
        }))
    }
}

struct MemoryListener {
    hub: Arc<Mutex<Hub>>,
    address: String,
    incoming: mpsc::UnboundedReceiver<MemoryLink>,
}

impl Listener for MemoryListener {
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
        lock(&self.hub).listeners.remove(&self.address);
        self.incoming.close();
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.close();
    }
}

struct MemoryLink {
    tx: Option<mpsc::Sender<Bytes>>,
    rx: Option<mpsc::Receiver<Bytes>>,
    peer: String,
}

impl Link for MemoryLink {
    fn status(&self) -> LinkStatus {
        match &self.tx {
            Some(tx) if !tx.is_closed() => LinkStatus::Connected,
            _ => LinkStatus::Closed,
        }
    }

    fn try_send(&mut self, payload: Bytes) -> Result<(), SendError> {
        let Some(tx) = &self.tx else {
            return Err(SendError::Closed);
        };
        match tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(payload)) => Err(SendError::Full(payload)),
            Err(TrySendError::Closed(_)) => {
                self.tx = None;
                Err(SendError::Closed)
            }
        }
    }

    fn try_recv(&mut self) -> Option<Bytes> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(payload) => Some(payload),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.tx = None;
                None
            }
        }
    }

    fn close(&mut self) {
        self.tx = None;
        self.rx = None;
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_accept_and_exchange() {
        let mut net = MemoryNetwork::new(4);
        let mut listener = net.listen().unwrap();
        let mut client = net.endpoint("client").connect(listener.address()).unwrap();
        let mut server = listener.try_accept().unwrap();

        assert_eq!(client.status(), LinkStatus::Connected);
        client.try_send(Bytes::from_static(b"ping")).unwrap();
        assert_eq!(server.try_recv().unwrap(), Bytes::from_static(b"ping"));
        assert!(server.try_recv().is_none());
    }

    #[test]
    fn full_queue_hands_payload_back() {
        let mut net = MemoryNetwork::new(1);
        let mut listener = net.listen().unwrap();
        let mut client = net.connect(listener.address()).unwrap();
        let _server = listener.try_accept().unwrap();

        client.try_send(Bytes::from_static(b"a")).unwrap();
        match client.try_send(Bytes::from_static(b"b")) {
            Err(SendError::Full(p)) => assert_eq!(p, Bytes::from_static(b"b")),
            other => panic!("expected backpressure, got {other:?}"),
        }
    }

    #[test]
    fn closing_one_side_closes_the_other() {
        let mut net = MemoryNetwork::new(4);
        let mut listener = net.listen().unwrap();
        let mut client = net.connect(listener.address()).unwrap();
        let mut server = listener.try_accept().unwrap();

        server.close();
        assert_eq!(client.status(), LinkStatus::Closed);
        assert!(matches!(
            client.try_send(Bytes::from_static(b"x")),
            Err(SendError::Closed)
        ));
    }

    #[test]
    fn connect_to_closed_listener_fails() {
        let mut net = MemoryNetwork::new(4);
        let mut listener = net.listen().unwrap();
        let address = listener.address().to_string();
        listener.close();
        assert!(net.connect(&address).is_err());
    }
}
