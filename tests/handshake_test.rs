//! Handshake state-machine tests: the HELLO / WELCOME / CLIENT_ACK exchange
//! against the address pool and client table.
//!
//! Run with: cargo test --test handshake_test

use std::net::{Ipv4Addr, SocketAddrV4};
use warren::crypto::{self, G, P};
use warren::net::packet::{self, PacketType, HELLO_LEN, WELCOME_LEN};
use warren::net::types::now;
use warren::net::{AddrPool, ClientTable, Handshake, HandshakeError, IpState};

const TIMEOUT: u64 = 10;

fn hello(magic: u32, yc: u32) -> [u8; HELLO_LEN] {
    let mut buf = [0u8; HELLO_LEN];
    buf[0] = PacketType::Hello as u8;
    buf[5..9].copy_from_slice(&magic.to_be_bytes());
    buf[9..13].copy_from_slice(&yc.to_be_bytes());
    buf
}

fn ep(addr: [u8; 4], port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::from(addr), port)
}

fn pool() -> AddrPool {
    AddrPool::new(Ipv4Addr::new(10, 8, 0, 2), 100)
}

// =============================================================================
// S1 — HANDSHAKE SUCCESS
// =============================================================================

#[test]
fn test_full_handshake() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let mut hs = Handshake::new(TIMEOUT);
    let src = ep([1, 2, 3, 4], 5000);

    let client_exp = 1234u64;
    let yc = crypto::modexp(G, client_exp, P) as u32;
    let mut reply = [0u8; WELCOME_LEN];
    let n = hs.on_hello(src, &hello(0xDEAD_BEEF, yc), &mut pool, &mut reply).unwrap();
    assert_eq!(n, WELCOME_LEN);

    // WELCOME: magic echoed in the session id field, assigned ip and ys in
    // network order.
    let hdr = packet::parse_header(&reply).unwrap();
    assert_eq!(hdr.kind, PacketType::Welcome);
    assert_eq!(hdr.session_id, 0xDEAD_BEEF);
    let assigned = u32::from_be_bytes(reply[5..9].try_into().unwrap());
    let ys = u32::from_be_bytes(reply[9..13].try_into().unwrap());
    assert_eq!(Ipv4Addr::from(assigned), Ipv4Addr::new(10, 8, 0, 2));
    assert!(u64::from(ys) < P);

    // Between HELLO and CLIENT_ACK the address is reserved, not active.
    assert_eq!(pool.state(assigned), IpState::Reserved);
    assert!(hs.pending().get(src).is_some());

    hs.on_client_ack(src, &mut clients, &mut pool).unwrap();

    let committed = clients.get_by_endpoint(src).unwrap();
    assert_eq!(committed.vip, assigned);
    assert_eq!(committed.endpoint, src);
    assert_eq!(pool.state(assigned), IpState::Active);
    assert!(hs.pending().get(src).is_none());

    // Both sides of the exchange agree on the key.
    let client_key =
        crypto::derive_key(crypto::modexp(u64::from(ys), client_exp, P) as u32);
    assert_eq!(committed.key, client_key);
}

// =============================================================================
// S4 — PENDING EXPIRY
// =============================================================================

#[test]
fn test_pending_expires_and_frees_vip() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let mut hs = Handshake::new(TIMEOUT);
    let src = ep([1, 2, 3, 4], 5000);

    let mut reply = [0u8; WELCOME_LEN];
    hs.on_hello(src, &hello(1, 9), &mut pool, &mut reply).unwrap();
    let assigned = u32::from_be_bytes(reply[5..9].try_into().unwrap());

    assert_eq!(hs.sweep(now() + TIMEOUT + 1, &mut pool), 1);
    assert!(hs.pending().get(src).is_none());
    assert_eq!(pool.state(assigned), IpState::Free);

    // A late CLIENT_ACK finds nothing.
    let err = hs.on_client_ack(src, &mut clients, &mut pool).unwrap_err();
    assert_eq!(err, HandshakeError::UnknownPending(src));
}

#[test]
fn test_sweep_keeps_fresh_sessions() {
    let mut pool = pool();
    let mut hs = Handshake::new(TIMEOUT);
    let mut reply = [0u8; WELCOME_LEN];
    hs.on_hello(ep([1, 2, 3, 4], 5000), &hello(1, 9), &mut pool, &mut reply).unwrap();

    assert_eq!(hs.sweep(now(), &mut pool), 0);
    assert_eq!(hs.pending().len(), 1);
}

// =============================================================================
// S6 — POOL EXHAUSTION
// =============================================================================

#[test]
fn test_exhausted_pool_drops_hello() {
    let mut pool = AddrPool::new(Ipv4Addr::new(10, 8, 0, 2), 2);
    let mut clients = ClientTable::new();
    let mut hs = Handshake::new(TIMEOUT);
    let mut reply = [0u8; WELCOME_LEN];

    for (i, port) in [5000u16, 5001].iter().enumerate() {
        let src = ep([1, 2, 3, 4], *port);
        hs.on_hello(src, &hello(i as u32, 9), &mut pool, &mut reply).unwrap();
        hs.on_client_ack(src, &mut clients, &mut pool).unwrap();
    }
    assert_eq!(pool.active_count(), 2);

    let err = hs
        .on_hello(ep([9, 9, 9, 9], 1111), &hello(3, 9), &mut pool, &mut reply)
        .unwrap_err();
    assert_eq!(err, HandshakeError::PoolExhausted);
    assert!(hs.pending().get(ep([9, 9, 9, 9], 1111)).is_none());
}

// =============================================================================
// TABLE INVARIANTS
// =============================================================================

#[test]
fn test_active_count_tracks_client_count() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let mut hs = Handshake::new(TIMEOUT);
    let mut reply = [0u8; WELCOME_LEN];

    for port in 5000..5010u16 {
        let src = ep([1, 2, 3, 4], port);
        hs.on_hello(src, &hello(u32::from(port), 9), &mut pool, &mut reply).unwrap();
        // Reservations do not count as active.
        assert_eq!(pool.active_count(), clients.len());
        hs.on_client_ack(src, &mut clients, &mut pool).unwrap();
        assert_eq!(pool.active_count(), clients.len());
    }

    let vip = clients.get_by_endpoint(ep([1, 2, 3, 4], 5004)).unwrap().vip;
    clients.remove(vip, &mut pool);
    assert_eq!(pool.active_count(), clients.len());
}

#[test]
fn test_secondary_indices_stay_consistent() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let mut hs = Handshake::new(TIMEOUT);
    let mut reply = [0u8; WELCOME_LEN];

    for port in 5000..5005u16 {
        let src = ep([1, 2, 3, 4], port);
        hs.on_hello(src, &hello(u32::from(port), 9), &mut pool, &mut reply).unwrap();
        hs.on_client_ack(src, &mut clients, &mut pool).unwrap();

        let client = clients.get_by_endpoint(src).unwrap();
        let vip = client.vip;
        let session_id = client.session_id;
        assert_eq!(clients.get_by_session(session_id).unwrap().vip, vip);
        assert_eq!(clients.get_by_vip(vip).unwrap().endpoint, src);
    }
}

#[test]
fn test_session_ids_are_unique() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let mut hs = Handshake::new(TIMEOUT);
    let mut reply = [0u8; WELCOME_LEN];

    let mut seen = std::collections::HashSet::new();
    for port in 5000..5020u16 {
        let src = ep([1, 2, 3, 4], port);
        hs.on_hello(src, &hello(1, 9), &mut pool, &mut reply).unwrap();
        hs.on_client_ack(src, &mut clients, &mut pool).unwrap();
        assert!(seen.insert(clients.get_by_endpoint(src).unwrap().session_id));
    }
}
