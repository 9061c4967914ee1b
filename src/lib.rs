//! Warren — minimal userspace UDP↔TUN VPN server.
//!
//! One non-blocking reactor forwards between an unreliable UDP transport
//! and a kernel tunnel device: decrypted client datagrams become IPv4
//! frames in the tunnel, tunnel frames come back out encrypted to the
//! owning client's endpoint. Sessions are established with a three-step
//! HELLO / WELCOME / CLIENT_ACK exchange over a (toy) finite-field DH
//! agreement.

pub mod config;
pub mod crypto;
pub mod net;

pub use config::ServerConfig;
pub use crypto::{derive_key, modexp, G, P};
pub use net::{AddrPool, Client, ClientTable, Handshake, IpState, Server, Stats};
