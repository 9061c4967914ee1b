//! Server configuration.

use crate::net::types::{
    DEFAULT_POOL_BASE, DEFAULT_POOL_SIZE, DEFAULT_PORT, DEFAULT_TUN_MTU, DEFAULT_TUN_NAME,
    HANDSHAKE_TIMEOUT_SECS,
};
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP listen port (bound on 0.0.0.0).
    pub listen_port: u16,

    /// Tunnel device name.
    pub tun_name: String,

    /// Address assigned to the tunnel device; `None` leaves addressing to
    /// external configuration.
    pub tun_addr: Option<Ipv4Addr>,

    /// Netmask used when `tun_addr` is set.
    pub tun_netmask: Ipv4Addr,

    /// Tunnel MTU.
    pub tun_mtu: i32,

    /// First virtual address handed out to clients.
    pub pool_base: Ipv4Addr,

    /// Number of assignable virtual addresses.
    pub pool_size: u32,

    /// Seconds a handshake may stay pending before it is swept.
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_PORT,
            tun_name: DEFAULT_TUN_NAME.to_string(),
            tun_addr: None,
            tun_netmask: Ipv4Addr::new(255, 255, 255, 0),
            tun_mtu: DEFAULT_TUN_MTU,
            pool_base: DEFAULT_POOL_BASE,
            pool_size: DEFAULT_POOL_SIZE,
            handshake_timeout_secs: HANDSHAKE_TIMEOUT_SECS,
        }
    }
}
