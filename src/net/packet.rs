//! On-wire packet framing and the symmetric XOR codec.
//!
//! Every datagram starts with the same 5-byte header: a one-byte type tag
//! followed by a 32-bit session id. Header fields are little-endian on the
//! wire; the handshake body fields (`client_magic`, `yc`, `assigned_tun_ip`,
//! `ys`) are big-endian. Peers must share these conventions.

use thiserror::Error;

/// Fixed header length: type tag + session id.
pub const HEADER_LEN: usize = 5;

/// HELLO: header + client_magic + yc.
pub const HELLO_LEN: usize = HEADER_LEN + 8;

/// WELCOME: header + assigned_tun_ip + ys.
pub const WELCOME_LEN: usize = HEADER_LEN + 8;

/// CLIENT_ACK carries nothing beyond the header.
pub const CLIENT_ACK_LEN: usize = HEADER_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("short packet: {got} bytes, need {need}")]
    Short { got: usize, need: usize },

    #[error("unknown packet type {0}")]
    UnknownType(u8),
}

/// Packet type tags exchanged over UDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Client → server, handshake start.
    Hello = 1,
    /// Server → client, assigned ip + server DH value.
    Welcome = 2,
    /// Client → server, commits the handshake.
    ClientAck = 3,
    /// Encrypted tunnel payload, both directions.
    Data = 4,
    /// Best-effort disconnect; accepted and ignored.
    Bye = 5,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(PacketType::Hello),
            2 => Some(PacketType::Welcome),
            3 => Some(PacketType::ClientAck),
            4 => Some(PacketType::Data),
            5 => Some(PacketType::Bye),
            _ => None,
        }
    }
}

/// Parsed fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketType,
    pub session_id: u32,
}

/// HELLO body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    /// Random correlation value chosen by the client, echoed in WELCOME.
    pub client_magic: u32,
    /// Client's public DH value.
    pub yc: u32,
}

pub fn parse_header(buf: &[u8]) -> Result<Header, PacketError> {
    if buf.len() < HEADER_LEN {
        return Err(PacketError::Short { got: buf.len(), need: HEADER_LEN });
    }
    let kind = PacketType::from_byte(buf[0]).ok_or(PacketError::UnknownType(buf[0]))?;
    let session_id = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
    Ok(Header { kind, session_id })
}

pub fn parse_hello(buf: &[u8]) -> Result<Hello, PacketError> {
    if buf.len() < HELLO_LEN {
        return Err(PacketError::Short { got: buf.len(), need: HELLO_LEN });
    }
    Ok(Hello {
        client_magic: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        yc: u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]),
    })
}

/// Serialize a WELCOME into `buf` and return its length.
///
/// The header's session id field carries `client_magic` back for
/// correlation; the persistent server-side session id is never on the wire
/// during the handshake.
pub fn encode_welcome(buf: &mut [u8], client_magic: u32, assigned_vip: u32, ys: u32) -> usize {
    buf[0] = PacketType::Welcome as u8;
    buf[1..5].copy_from_slice(&client_magic.to_le_bytes());
    buf[5..9].copy_from_slice(&assigned_vip.to_be_bytes());
    buf[9..13].copy_from_slice(&ys.to_be_bytes());
    WELCOME_LEN
}

/// Write a DATA header (session id 0) at the front of `buf`.
pub fn encode_data_header(buf: &mut [u8]) {
    buf[0] = PacketType::Data as u8;
    buf[1..5].copy_from_slice(&0u32.to_le_bytes());
}

/// Byte-wise XOR of `src` into `dst` under a single 8-bit key.
///
/// Encryption and decryption are the same transform. `dst` must hold at
/// least `src.len()` bytes; nothing is allocated.
pub fn xor_into(src: &[u8], dst: &mut [u8], key: u8) {
    debug_assert!(dst.len() >= src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d = s ^ key;
    }
}
