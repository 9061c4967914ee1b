//! Client table: one owning store keyed by virtual ip, plus endpoint and
//! session-id indices.
//!
//! The endpoint index serves every inbound DATA packet and must stay O(1);
//! records are always re-looked-up by virtual ip rather than held by
//! reference across mutations.

use super::pool::AddrPool;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;
use tracing::{info, warn};

/// Pack `(ipv4, port)` into a 64-bit map key: bits 47..16 carry the address,
/// bits 15..0 the port, top 16 bits zero.
pub fn endpoint_key(endpoint: SocketAddrV4) -> u64 {
    (u64::from(u32::from(*endpoint.ip())) << 16) | u64::from(endpoint.port())
}

/// Persistent state for one authenticated client.
#[derive(Debug, Clone)]
pub struct Client {
    /// Public transport endpoint; the only mutable field (roaming).
    pub endpoint: SocketAddrV4,
    /// Assigned virtual address (host order), fixed for the record's life.
    pub vip: u32,
    /// Symmetric key derived from the handshake.
    pub key: u8,
    /// Server-assigned id that survives endpoint changes.
    pub session_id: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientTableError {
    #[error("virtual ip {} already has a client", Ipv4Addr::from(*.0))]
    DuplicateVip(u32),

    #[error("virtual ip {} outside the pool", Ipv4Addr::from(*.0))]
    VipOutOfRange(u32),
}

#[derive(Default)]
pub struct ClientTable {
    by_vip: HashMap<u32, Client>,
    by_endpoint: HashMap<u64, u32>,
    by_session: HashMap<u32, u32>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a client, promoting its reserved pool entry to ACTIVE and
    /// inserting all three indices.
    ///
    /// An endpoint collision means a lost BYE or an address/port reuse; the
    /// stale mapping is replaced.
    pub fn add(
        &mut self,
        endpoint: SocketAddrV4,
        vip: u32,
        key: u8,
        session_id: u32,
        pool: &mut AddrPool,
    ) -> Result<&Client, ClientTableError> {
        if self.by_vip.contains_key(&vip) {
            return Err(ClientTableError::DuplicateVip(vip));
        }
        if !pool.activate(vip) {
            return Err(ClientTableError::VipOutOfRange(vip));
        }

        let ep_key = endpoint_key(endpoint);
        if let Some(stale) = self.by_endpoint.insert(ep_key, vip) {
            warn!(
                "endpoint {} remapped from {} to {}",
                endpoint,
                Ipv4Addr::from(stale),
                Ipv4Addr::from(vip)
            );
        }
        self.by_session.insert(session_id, vip);

        let client = Client { endpoint, vip, key, session_id };
        Ok(self.by_vip.entry(vip).or_insert(client))
    }

    pub fn get_by_vip(&self, vip: u32) -> Option<&Client> {
        self.by_vip.get(&vip)
    }

    pub fn get_by_endpoint(&self, endpoint: SocketAddrV4) -> Option<&Client> {
        let vip = self.by_endpoint.get(&endpoint_key(endpoint))?;
        self.by_vip.get(vip)
    }

    pub fn get_by_session(&self, session_id: u32) -> Option<&Client> {
        let vip = self.by_session.get(&session_id)?;
        self.by_vip.get(vip)
    }

    /// Move a client to a new endpoint (roaming). Returns false when the
    /// session id is unknown.
    ///
    /// Single mutator means no reader can observe the record missing from
    /// both the old and the new endpoint key.
    pub fn update_endpoint(&mut self, session_id: u32, new_endpoint: SocketAddrV4) -> bool {
        let Some(&vip) = self.by_session.get(&session_id) else {
            return false;
        };
        let Some(client) = self.by_vip.get_mut(&vip) else {
            return false;
        };

        let old_key = endpoint_key(client.endpoint);
        let old_endpoint = client.endpoint;
        // Only drop the old key if it still points at this client; a later
        // endpoint collision may have remapped it to someone else.
        if self.by_endpoint.get(&old_key) == Some(&vip) {
            self.by_endpoint.remove(&old_key);
        }

        if let Some(stale) = self.by_endpoint.insert(endpoint_key(new_endpoint), vip) {
            if stale != vip {
                warn!(
                    "endpoint {} remapped from {} to {}",
                    new_endpoint,
                    Ipv4Addr::from(stale),
                    Ipv4Addr::from(vip)
                );
            }
        }
        client.endpoint = new_endpoint;

        info!(
            "client {} roamed {} -> {}",
            Ipv4Addr::from(vip),
            old_endpoint,
            new_endpoint
        );
        true
    }

    /// Drop a client from all three indices and free its virtual address.
    pub fn remove(&mut self, vip: u32, pool: &mut AddrPool) -> Option<Client> {
        let client = self.by_vip.remove(&vip)?;

        let ep_key = endpoint_key(client.endpoint);
        if self.by_endpoint.get(&ep_key) == Some(&vip) {
            self.by_endpoint.remove(&ep_key);
        }
        self.by_session.remove(&client.session_id);
        pool.free(vip);

        info!("client {} removed", Ipv4Addr::from(vip));
        Some(client)
    }

    pub fn len(&self) -> usize {
        self.by_vip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_vip.is_empty()
    }
}
