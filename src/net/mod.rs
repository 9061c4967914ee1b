//! UDP↔TUN forwarding core.

pub mod clients;
pub mod handshake;
pub mod packet;
pub mod pending;
pub mod pool;
pub mod server;
pub mod stats;
pub mod tun;
pub mod types;

// Re-exports
pub use clients::{endpoint_key, Client, ClientTable, ClientTableError};
pub use handshake::{Handshake, HandshakeError};
pub use packet::{
    parse_header, parse_hello, xor_into, Header, Hello, PacketError, PacketType, HEADER_LEN,
    HELLO_LEN, WELCOME_LEN,
};
pub use pending::{PendingSession, PendingTable};
pub use pool::{AddrPool, IpState};
pub use server::{InitError, Server};
pub use stats::Stats;
pub use tun::{TunDevice, TunError};
pub use types::*;
