//! Transport Channel: a duplex, message-framed text pipe to an endpoint's
//! terminal service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_core::EndpointDescriptor;

use crate::error::ExecError;

/// Opens channels to endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolve once the channel is open.
    async fn open(&self, endpoint: &EndpointDescriptor) -> Result<Channel, ExecError>;
}

/// An open duplex channel carrying one text payload per message.
///
/// Real sockets are pumped by a background task that flips the shared open
/// flag when the peer goes away; [`Channel::pair`] builds an in-process one.
pub struct Channel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl Channel {
    pub fn from_parts(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
        open: Arc<AtomicBool>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            open,
            pump,
        }
    }

    /// An in-process channel and the far end that serves it.
    pub fn pair() -> (Channel, ChannelPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let channel = Channel::from_parts(outbound_tx, inbound_rx, open.clone(), None);
        let peer = ChannelPeer {
            incoming: outbound_rx,
            outgoing: inbound_tx,
            open,
        };
        (channel, peer)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Shared open flag, for observers that outlive a borrow of the channel.
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        self.open.clone()
    }

    pub fn send(&self, payload: &str) -> Result<(), String> {
        if !self.is_open() {
            return Err("channel is closed".to_string());
        }
        self.outbound.send(payload.to_string()).map_err(|_| {
            self.open.store(false, Ordering::Release);
            "channel writer has stopped".to_string()
        })
    }

    /// Next inbound payload; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<String> {
        let next = self.inbound.recv().await;
        if next.is_none() {
            self.open.store(false, Ordering::Release);
        }
        next
    }

    pub fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        self.inbound.close();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// The serving end of [`Channel::pair`].
pub struct ChannelPeer {
    /// Payloads written by the channel owner.
    pub incoming: mpsc::UnboundedReceiver<String>,
    /// Payloads delivered to the channel owner.
    pub outgoing: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

impl ChannelPeer {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Deliver one payload. Returns `false` once the owner has gone away.
    pub fn deliver(&self, payload: impl Into<String>) -> bool {
        self.outgoing.send(payload.into()).is_ok()
    }

    /// Close from the remote side.
    pub fn hang_up(self) {
        self.open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_carries_payloads_both_ways() {
        let (mut channel, mut peer) = Channel::pair();
        channel.send("ls\n").expect("send");
        assert_eq!(peer.incoming.recv().await.as_deref(), Some("ls\n"));

        assert!(peer.deliver("a.txt\r\n"));
        assert_eq!(channel.recv().await.as_deref(), Some("a.txt\r\n"));
    }

    #[tokio::test]
    async fn hang_up_closes_channel() {
        let (mut channel, peer) = Channel::pair();
        peer.hang_up();
        assert!(channel.recv().await.is_none());
        assert!(!channel.is_open());
        assert!(channel.send("echo hi\n").is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut channel, peer) = Channel::pair();
        channel.close();
        channel.close();
        assert!(!channel.is_open());
        assert!(!peer.is_open());
    }
}
