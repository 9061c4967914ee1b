//! Pending handshakes: state held between HELLO and CLIENT_ACK.
//!
//! Entries are short-lived and few (one per endpoint mid-handshake), so a
//! plain vector beats a map here. The expiry sweep bounds both memory and
//! the window in which a reserved address can be held by a client that
//! never completes.

use super::pool::AddrPool;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;

/// Handshake state for one endpoint between HELLO and CLIENT_ACK.
#[derive(Debug, Clone)]
pub struct PendingSession {
    /// Client endpoint at HELLO time.
    pub endpoint: SocketAddrV4,
    /// Correlation value from the HELLO, echoed in the WELCOME.
    pub client_magic: u32,
    /// Tentatively assigned virtual address; pool entry is RESERVED.
    pub vip: u32,
    /// Client's public DH value.
    pub yc: u32,
    /// Server's ephemeral private exponent.
    pub b: u32,
    /// Unix seconds at creation, for the expiry sweep.
    pub created_at: u64,
    /// Persistent session id allocated at HELLO time.
    pub session_id: u32,
}

/// At most one pending session per endpoint; a repeated HELLO replaces the
/// earlier entry (the caller frees its reserved address first).
#[derive(Default)]
pub struct PendingTable {
    sessions: Vec<PendingSession>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, session: PendingSession) {
        debug_assert!(self.get(session.endpoint).is_none());
        self.sessions.push(session);
    }

    pub fn get(&self, endpoint: SocketAddrV4) -> Option<&PendingSession> {
        self.sessions.iter().find(|s| s.endpoint == endpoint)
    }

    /// Remove and return the pending session for `endpoint`, if any.
    pub fn remove(&mut self, endpoint: SocketAddrV4) -> Option<PendingSession> {
        let idx = self.sessions.iter().position(|s| s.endpoint == endpoint)?;
        Some(self.sessions.swap_remove(idx))
    }

    /// Drop every session older than `timeout_secs`, returning each reserved
    /// virtual address to the pool. Returns the number of expired entries.
    pub fn expire(&mut self, now: u64, timeout_secs: u64, pool: &mut AddrPool) -> usize {
        let mut expired = 0;
        self.sessions.retain(|s| {
            if now.saturating_sub(s.created_at) > timeout_secs {
                debug!(
                    "handshake from {} expired, releasing {}",
                    s.endpoint,
                    Ipv4Addr::from(s.vip)
                );
                pool.free(s.vip);
                expired += 1;
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
