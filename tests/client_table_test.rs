//! Client table tests: three-way indexing, endpoint roaming and removal.
//!
//! Run with: cargo test --test client_table_test

use std::net::{Ipv4Addr, SocketAddrV4};
use warren::net::{endpoint_key, AddrPool, ClientTable, ClientTableError, IpState};

fn ep(addr: [u8; 4], port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::from(addr), port)
}

fn pool() -> AddrPool {
    AddrPool::new(Ipv4Addr::new(10, 8, 0, 2), 16)
}

// =============================================================================
// S5 — ENDPOINT ROAMING
// =============================================================================

#[test]
fn test_roaming_moves_endpoint_index_only() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let vip = pool.reserve().unwrap();
    let home = ep([1, 2, 3, 4], 5000);
    let away = ep([5, 6, 7, 8], 6000);

    let session_id = clients.add(home, vip, 0x42, 77, &mut pool).unwrap().session_id;
    assert!(clients.update_endpoint(session_id, away));

    assert!(clients.get_by_endpoint(home).is_none());
    assert_eq!(clients.get_by_endpoint(away).unwrap().vip, vip);

    // vip and session indices are untouched.
    assert_eq!(clients.get_by_vip(vip).unwrap().endpoint, away);
    assert_eq!(clients.get_by_session(session_id).unwrap().vip, vip);
    assert_eq!(pool.state(vip), IpState::Active);
}

#[test]
fn test_roaming_after_collision_keeps_other_client() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let shared = ep([1, 2, 3, 4], 5000);

    let vip_a = pool.reserve().unwrap();
    let vip_b = pool.reserve().unwrap();
    clients.add(shared, vip_a, 1, 1, &mut pool).unwrap();
    // Same endpoint re-handshakes as a new client: mapping replaced.
    clients.add(shared, vip_b, 2, 2, &mut pool).unwrap();

    // When the first client later roams away, the second keeps the shared
    // endpoint.
    assert!(clients.update_endpoint(1, ep([9, 9, 9, 9], 7000)));
    assert_eq!(clients.get_by_endpoint(shared).unwrap().vip, vip_b);
    assert_eq!(clients.get_by_endpoint(ep([9, 9, 9, 9], 7000)).unwrap().vip, vip_a);
}

// =============================================================================
// REMOVAL
// =============================================================================

#[test]
fn test_remove_returns_vip_to_pool() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let src = ep([1, 2, 3, 4], 5000);
    let vip = pool.reserve().unwrap();
    clients.add(src, vip, 1, 5, &mut pool).unwrap();

    let removed = clients.remove(vip, &mut pool).unwrap();
    assert_eq!(removed.session_id, 5);
    assert!(clients.is_empty());
    assert_eq!(pool.state(vip), IpState::Free);

    // The freed address is reservable again.
    assert_eq!(pool.reserve(), Some(vip));
}

#[test]
fn test_remove_unknown_vip() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    assert!(clients.remove(pool.base(), &mut pool).is_none());
}

// =============================================================================
// INSERT EDGE CASES
// =============================================================================

#[test]
fn test_duplicate_vip_rejected_without_side_effects() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let vip = pool.reserve().unwrap();
    clients.add(ep([1, 2, 3, 4], 5000), vip, 1, 1, &mut pool).unwrap();

    let err = clients
        .add(ep([5, 6, 7, 8], 6000), vip, 2, 2, &mut pool)
        .unwrap_err();
    assert_eq!(err, ClientTableError::DuplicateVip(vip));

    // The loser's endpoint and session never entered the indices.
    assert!(clients.get_by_endpoint(ep([5, 6, 7, 8], 6000)).is_none());
    assert!(clients.get_by_session(2).is_none());
    assert_eq!(clients.len(), 1);
}

#[test]
fn test_vip_outside_pool_rejected() {
    let mut pool = pool();
    let mut clients = ClientTable::new();
    let outside = pool.base() + 16;

    let err = clients
        .add(ep([1, 2, 3, 4], 5000), outside, 1, 1, &mut pool)
        .unwrap_err();
    assert_eq!(err, ClientTableError::VipOutOfRange(outside));
    assert!(clients.is_empty());
}

// =============================================================================
// ENDPOINT KEY PACKING
// =============================================================================

#[test]
fn test_endpoint_key_distinguishes_addr_and_port() {
    let a = endpoint_key(ep([1, 2, 3, 4], 5000));
    let b = endpoint_key(ep([1, 2, 3, 4], 5001));
    let c = endpoint_key(ep([1, 2, 3, 5], 5000));
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_ne!(b, c);

    // Address in bits 47..16, port in bits 15..0, top 16 zero.
    assert_eq!(a >> 48, 0);
    assert_eq!((a & 0xFFFF) as u16, 5000);
    assert_eq!((a >> 16) as u32, u32::from(Ipv4Addr::new(1, 2, 3, 4)));
}
