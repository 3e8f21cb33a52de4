//! Datagram Transport
//!
//! The protocol only ever needs an unreliable fire-and-forget send primitive
//! between statically known endpoints; everything failure-related is driven by
//! wall-clock aging, never by transport timeouts. Keeping the primitive behind
//! a trait lets the whole protocol run against an in-memory fake in tests.

pub mod book;

use anyhow::Result;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;

pub use book::AddressBook;

/// Stateless fire-and-forget datagram send. Implementations must not block on
/// delivery and must not retry; a send either leaves the host or fails with a
/// local error the caller logs and forgets.
pub trait Transport: Send + Sync {
    fn send_to(&self, target: SocketAddr, payload: &[u8]) -> Result<()>;
}

/// Real UDP sender. Opens a short-lived ephemeral socket per call (open, send,
/// close); the long-lived receive socket lives in the membership service.
#[derive(Debug, Default)]
pub struct UdpTransport;

impl Transport for UdpTransport {
    fn send_to(&self, target: SocketAddr, payload: &[u8]) -> Result<()> {
        let bind: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(bind)?;
        socket.send_to(payload, target)?;
        Ok(())
    }
}

/// In-memory fake that records every datagram instead of sending it.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.lock().expect("transport log poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("transport log poisoned").len()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("transport log poisoned").clear();
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, target: SocketAddr, payload: &[u8]) -> Result<()> {
        self.sent
            .lock()
            .expect("transport log poisoned")
            .push((target, payload.to_vec()));
        Ok(())
    }
}
