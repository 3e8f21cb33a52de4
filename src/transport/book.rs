//! Address Book
//!
//! The cluster is a closed, statically known set of N machines. Machine index
//! i ∈ [1, N] maps to list position i-1, and machine #1 is the fixed
//! introducer every join announcement goes to. There is no dynamic discovery
//! beyond gossip itself.

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

/// Gossip port shared by every machine in the book.
pub const GOSSIP_PORT: u16 = 49153;

#[derive(Debug, Clone)]
pub struct AddressBook {
    endpoints: Vec<SocketAddr>,
}

impl AddressBook {
    pub fn new(endpoints: Vec<SocketAddr>) -> Result<Self> {
        anyhow::ensure!(!endpoints.is_empty(), "address book must not be empty");
        Ok(Self { endpoints })
    }

    /// Parses a comma-separated `host:port` list, resolving hostnames.
    /// Resolution failure here is fatal: without the book the node cannot
    /// form an identity or reach the introducer.
    pub fn parse(list: &str) -> Result<Self> {
        let mut endpoints = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let addr = entry
                .to_socket_addrs()
                .with_context(|| format!("cannot resolve peer endpoint {:?}", entry))?
                .next()
                .with_context(|| format!("peer endpoint {:?} resolved to nothing", entry))?;
            endpoints.push(addr);
        }
        Self::new(endpoints)
    }

    /// Loopback cluster on consecutive ports, for running several nodes on
    /// one machine.
    pub fn local_cluster(size: usize) -> Self {
        let endpoints = (0..size)
            .map(|i| {
                SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::LOCALHOST),
                    GOSSIP_PORT + i as u16,
                )
            })
            .collect();
        Self { endpoints }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoint of machine #index (1-based).
    pub fn addr(&self, machine_index: usize) -> Option<SocketAddr> {
        if machine_index == 0 {
            return None;
        }
        self.endpoints.get(machine_index - 1).copied()
    }

    /// Machine #1, the fixed join bootstrap peer.
    pub fn introducer(&self) -> SocketAddr {
        self.endpoints[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_is_one_based() {
        let book = AddressBook::local_cluster(3);
        assert_eq!(book.len(), 3);
        assert_eq!(book.addr(0), None);
        assert_eq!(book.addr(1), Some(book.introducer()));
        assert_eq!(book.addr(3).unwrap().port(), GOSSIP_PORT + 2);
        assert_eq!(book.addr(4), None);
    }

    #[test]
    fn test_parse_socket_addrs() {
        let book = AddressBook::parse("127.0.0.1:4000, 127.0.0.1:4001").unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(book.introducer(), "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(AddressBook::parse("").is_err());
        assert!(AddressBook::parse(" , ").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(AddressBook::parse("not an endpoint").is_err());
    }
}
