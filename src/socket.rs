use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::transport::{Link, LinkStatus, SendError};

/// A [`Link`] with a client-side backpressure queue and a sticky fault flag.
pub struct Socket {
    link: Option<Box<dyn Link>>,
    pending: VecDeque<Bytes>,
    faulted: bool,
    peer: String,
}

impl Socket {
    pub fn new(link: Box<dyn Link>) -> Self {
        let peer = link.peer().to_string();
        Self {
            link: Some(link),
            pending: VecDeque::new(),
            faulted: false,
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue or transmit. Never fails: a transport fault drops the payload
    /// and raises [`Socket::error_state`].
    pub fn send(&mut self, payload: Bytes) {
        if self.faulted {
            return;
        }
        // keep FIFO: nothing overtakes what is already queued
        if !self.pending.is_empty() {
            self.pending.push_back(payload);
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match link.try_send(payload) {
            Ok(()) => {}
            Err(SendError::Full(payload)) => {
                trace!(peer = %self.peer, "send backpressure, queueing");
                self.pending.push_back(payload);
            }
            Err(SendError::Closed) => self.fault("send"),
        }
    }

    /// Drain the pending queue. Returns whether it is now empty.
    pub fn flush(&mut self) -> bool {
        if self.faulted {
            return false;
        }
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        while let Some(payload) = self.pending.pop_front() {
            match link.try_send(payload) {
                Ok(()) => {}
                Err(SendError::Full(payload)) => {
                    self.pending.push_front(payload);
                    return false;
                }
                Err(SendError::Closed) => {
                    self.fault("flush");
                    return false;
                }
            }
        }
        true
    }

    pub fn try_receive(&mut self) -> Option<Bytes> {
        if self.faulted {
            return None;
        }
        self.link.as_mut()?.try_recv()
    }

    pub fn is_connected(&self) -> bool {
        !self.faulted
            && self
                .link
                .as_ref()
                .is_some_and(|l| l.status() == LinkStatus::Connected)
    }

    /// Once true, stays true. The owner must dispose the socket.
    pub fn error_state(&self) -> bool {
        self.faulted
            || self
                .link
                .as_ref()
                .is_none_or(|l| l.status() == LinkStatus::Closed)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn dispose(&mut self) {
        if let Some(mut link) = self.link.take() {
            trace!(peer = %self.peer, "socket disposed");
            link.close();
        }
        self.pending.clear();
    }

    fn fault(&mut self, during: &str) {
        warn!(peer = %self.peer, during, "socket fault");
        self.faulted = true;
        self.pending.clear();
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("peer", &self.peer)
            .field("pending", &self.pending.len())
            .field("faulted", &self.faulted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNetwork, Network};

    fn pair(capacity: usize) -> (Socket, Socket) {
        let mut net = MemoryNetwork::new(capacity);
        let mut listener = net.listen().unwrap();
        let client = net.connect(listener.address()).unwrap();
        let server = listener.try_accept().unwrap();
        (Socket::new(client), Socket::new(server))
    }

    #[test]
    fn backpressure_preserves_order() {
        let (mut a, mut b) = pair(2);
        for i in 0..5u8 {
            a.send(Bytes::from(vec![i]));
        }
        assert_eq!(a.pending(), 3);

        let mut seen = Vec::new();
        while seen.len() < 5 {
            while let Some(p) = b.try_receive() {
                seen.push(p[0]);
            }
            a.flush();
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(a.flush());
    }

    #[test]
    fn fault_is_sticky() {
        let (mut a, mut b) = pair(2);
        b.dispose();
        assert!(a.error_state());
        a.send(Bytes::from_static(b"lost"));
        assert!(a.error_state());
        assert!(a.try_receive().is_none());
    }

    #[test]
    fn double_dispose_is_noop() {
        let (mut a, _b) = pair(2);
        a.dispose();
        a.dispose();
        assert!(a.error_state());
        assert!(!a.flush());
    }
}
