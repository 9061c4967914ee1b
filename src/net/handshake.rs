//! Handshake dispatcher: drives the HELLO / WELCOME / CLIENT_ACK exchange.
//!
//! Per endpoint the machine is: no state → PENDING on HELLO (WELCOME sent),
//! PENDING → ESTABLISHED on CLIENT_ACK (client record committed), PENDING →
//! nothing on timeout or a replacing HELLO. DATA never reaches this module.

use super::clients::ClientTable;
use super::packet::{self, PacketError, WELCOME_LEN};
use super::pending::{PendingSession, PendingTable};
use super::pool::AddrPool;
use super::types::now;
use crate::crypto::{self, G, P};
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("short handshake packet: {got} bytes, need {need}")]
    Short { got: usize, need: usize },

    /// No FREE address left; the HELLO is dropped without a reply and the
    /// client retries later.
    #[error("address pool exhausted")]
    PoolExhausted,

    /// CLIENT_ACK from an endpoint with no pending session.
    #[error("no pending handshake for {0}")]
    UnknownPending(SocketAddrV4),

    /// Commit raced an existing record for the same virtual ip.
    #[error("virtual ip {} already committed", Ipv4Addr::from(*.0))]
    DuplicateVip(u32),
}

impl From<PacketError> for HandshakeError {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::Short { got, need } => HandshakeError::Short { got, need },
            // Dispatch happens on the already-validated type byte.
            PacketError::UnknownType(_) => HandshakeError::Short { got: 0, need: 0 },
        }
    }
}

pub struct Handshake {
    pending: PendingTable,
    timeout_secs: u64,
    next_session_id: u32,
}

impl Handshake {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            pending: PendingTable::new(),
            timeout_secs,
            next_session_id: 1,
        }
    }

    /// Session ids are a monotonic counter; 0 stays reserved for DATA
    /// headers.
    fn alloc_session_id(&mut self) -> u32 {
        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Handle a HELLO datagram. On success the WELCOME reply has been
    /// serialized into `reply` and its length is returned.
    pub fn on_hello(
        &mut self,
        src: SocketAddrV4,
        datagram: &[u8],
        pool: &mut AddrPool,
        reply: &mut [u8; WELCOME_LEN],
    ) -> Result<usize, HandshakeError> {
        let hello = packet::parse_hello(datagram)?;

        // A repeated HELLO replaces the earlier pending session; its
        // reservation goes back to the pool first.
        if let Some(stale) = self.pending.remove(src) {
            debug!("replacing pending handshake from {}", src);
            pool.free(stale.vip);
        }

        let vip = pool.reserve().ok_or(HandshakeError::PoolExhausted)?;
        let b = crypto::ephemeral_exponent();
        let ys = crypto::modexp(G, u64::from(b), P) as u32;
        let session_id = self.alloc_session_id();

        self.pending.add(PendingSession {
            endpoint: src,
            client_magic: hello.client_magic,
            vip,
            yc: hello.yc,
            b,
            created_at: now(),
            session_id,
        });

        let len = packet::encode_welcome(reply, hello.client_magic, vip, ys);
        info!(
            "HELLO from {}: reserved {}, session {}",
            src,
            Ipv4Addr::from(vip),
            session_id
        );
        Ok(len)
    }

    /// Handle a CLIENT_ACK: derive the symmetric key and commit the client
    /// record. Returns the committed virtual address.
    pub fn on_client_ack(
        &mut self,
        src: SocketAddrV4,
        clients: &mut ClientTable,
        pool: &mut AddrPool,
    ) -> Result<u32, HandshakeError> {
        let session = self
            .pending
            .remove(src)
            .ok_or(HandshakeError::UnknownPending(src))?;

        let shared = crypto::modexp(u64::from(session.yc), u64::from(session.b), P) as u32;
        let key = crypto::derive_key(shared);

        match clients.add(src, session.vip, key, session.session_id, pool) {
            Ok(client) => {
                info!(
                    "client {} established from {} (session {})",
                    Ipv4Addr::from(client.vip),
                    src,
                    client.session_id
                );
                Ok(session.vip)
            }
            Err(err) => {
                warn!("handshake commit for {} failed: {}", src, err);
                pool.free(session.vip);
                Err(HandshakeError::DuplicateVip(session.vip))
            }
        }
    }

    /// Drop pending sessions older than the configured timeout, releasing
    /// their reserved addresses.
    pub fn sweep(&mut self, now: u64, pool: &mut AddrPool) -> usize {
        self.pending.expire(now, self.timeout_secs, pool)
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }
}
