//! Network constants shared across the forwarding core.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// TRANSPORT DEFAULTS
// =============================================================================

/// Default UDP listen port.
pub const DEFAULT_PORT: u16 = 5555;

/// Default tunnel device name.
pub const DEFAULT_TUN_NAME: &str = "tun0";

/// Default tunnel MTU. Must stay below [`TUN_BUF_SIZE`] so a single read
/// always returns a whole frame.
pub const DEFAULT_TUN_MTU: i32 = 1500;

// =============================================================================
// ADDRESS POOL DEFAULTS
// =============================================================================

/// First virtual address handed out to clients.
pub const DEFAULT_POOL_BASE: Ipv4Addr = Ipv4Addr::new(10, 8, 0, 2);

/// Number of assignable virtual addresses.
pub const DEFAULT_POOL_SIZE: u32 = 100;

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Seconds a handshake may sit between HELLO and CLIENT_ACK before its
/// pending state is swept and the reserved virtual address returns to FREE.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// BATCHING AND BUFFERS
// =============================================================================
// All buffers are allocated once at startup and reused for every packet.

/// Max datagrams pulled off the socket per receive batch.
pub const RX_BATCH: usize = 8;

/// Max encrypted datagrams accumulated before a send flush.
pub const TX_BATCH: usize = 8;

/// Receive buffer per datagram: the 5-byte header plus a full tunnel frame.
pub const RX_BUF_SIZE: usize = 2000;

/// Per-slot send buffer: header plus an encrypted frame.
pub const TX_BUF_SIZE: usize = 2048;

/// Tunnel read buffer; one IPv4 frame per read.
pub const TUN_BUF_SIZE: usize = 2000;

/// Anything shorter than an IPv4 header cannot be a forwardable frame.
pub const MIN_IPV4_FRAME: usize = 20;

/// Seconds since the Unix epoch.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
