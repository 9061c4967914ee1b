//! Forwarding event loop: a single-threaded reactor over the UDP socket and
//! the tunnel device.
//!
//! Both descriptors are non-blocking; the loop sleeps in `select!` until one
//! is readable, then drains it with bounded batches. All buffers are
//! allocated once at startup and nothing on the packet path allocates.
//! Every table mutation happens on this task, so no locks exist anywhere in
//! the forwarding state.

use super::clients::ClientTable;
use super::handshake::{Handshake, HandshakeError};
use super::packet::{self, PacketError, PacketType, HEADER_LEN, WELCOME_LEN};
use super::pool::AddrPool;
use super::stats::Stats;
use super::tun::{self, TunDevice, TunError};
use super::types::{
    now, MIN_IPV4_FRAME, RX_BATCH, RX_BUF_SIZE, TUN_BUF_SIZE, TX_BATCH, TX_BUF_SIZE,
};
use crate::config::ServerConfig;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;
use tokio::io::unix::{AsyncFd, AsyncFdReadyMutGuard};
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("udp bind failed: {0}")]
    Bind(#[source] io::Error),

    #[error(transparent)]
    Tun(#[from] TunError),
}

/// One pre-encrypted datagram waiting in the send batch.
struct TxSlot {
    dst: SocketAddr,
    len: usize,
    buf: Box<[u8]>,
}

/// Fixed-size array of send slots, reused for the life of the process.
struct TxBatch {
    slots: Vec<TxSlot>,
    used: usize,
}

impl TxBatch {
    fn new() -> Self {
        let slots = (0..TX_BATCH)
            .map(|_| TxSlot {
                dst: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
                len: 0,
                buf: vec![0u8; TX_BUF_SIZE].into_boxed_slice(),
            })
            .collect();
        Self { slots, used: 0 }
    }

    fn is_full(&self) -> bool {
        self.used == TX_BATCH
    }
}

/// All forwarding state: the tables, the counters and the reusable buffers.
/// Owned exclusively by the event loop.
struct Forwarder {
    pool: AddrPool,
    clients: ClientTable,
    handshake: Handshake,
    stats: Stats,
    rx_buf: Box<[u8]>,
    scratch: Box<[u8]>,
    frame_buf: Box<[u8]>,
    tx: TxBatch,
}

impl Forwarder {
    fn new(config: &ServerConfig) -> Self {
        Self {
            pool: AddrPool::new(config.pool_base, config.pool_size),
            clients: ClientTable::new(),
            handshake: Handshake::new(config.handshake_timeout_secs),
            stats: Stats::new(),
            rx_buf: vec![0u8; RX_BUF_SIZE].into_boxed_slice(),
            scratch: vec![0u8; RX_BUF_SIZE].into_boxed_slice(),
            frame_buf: vec![0u8; TUN_BUF_SIZE].into_boxed_slice(),
            tx: TxBatch::new(),
        }
    }

    /// Pull batches off the socket until it is drained or the kernel
    /// returned fewer datagrams than a full batch.
    fn drain_socket(&mut self, socket: &UdpSocket, tun: &mut AsyncFd<TunDevice>) {
        loop {
            let mut received = 0;
            let mut drained = false;

            while received < RX_BATCH {
                match socket.try_recv_from(&mut self.rx_buf) {
                    Ok((n, src)) => {
                        received += 1;
                        self.stats.udp_rx_pkts += 1;
                        self.stats.udp_rx_bytes += n as u64;
                        match src {
                            SocketAddr::V4(src) => self.on_datagram(n, src, socket, tun),
                            SocketAddr::V6(src) => {
                                // IPv4-only transport.
                                debug!("dropping datagram from v6 source {}", src);
                                self.stats.udp_rx_drops += 1;
                            }
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.stats.udp_recv_eagain += 1;
                        drained = true;
                        break;
                    }
                    Err(e) => {
                        // Linux reports ICMP errors from earlier sends on
                        // the next receive; never fatal.
                        warn!("udp recv failed: {}", e);
                        drained = true;
                        break;
                    }
                }
            }

            if received > 0 {
                self.stats.udp_rx_batches += 1;
            }
            if drained || received < RX_BATCH {
                return;
            }
        }
    }

    /// Dispatch one inbound datagram by type byte.
    fn on_datagram(
        &mut self,
        n: usize,
        src: SocketAddrV4,
        socket: &UdpSocket,
        tun: &mut AsyncFd<TunDevice>,
    ) {
        let header = match packet::parse_header(&self.rx_buf[..n]) {
            Ok(header) => header,
            Err(PacketError::Short { got, need }) => {
                debug!("runt datagram from {}: {} bytes, need {}", src, got, need);
                self.stats.udp_rx_drops += 1;
                return;
            }
            Err(PacketError::UnknownType(tag)) => {
                debug!("unknown packet type {} from {}", tag, src);
                self.stats.udp_rx_drops += 1;
                return;
            }
        };

        match header.kind {
            PacketType::Data => self.on_data(n, src, tun),
            other => self.on_handshake(other, n, src, socket),
        }
    }

    /// DATA ingress: decrypt and inject the frame into the tunnel.
    fn on_data(&mut self, n: usize, src: SocketAddrV4, tun: &mut AsyncFd<TunDevice>) {
        let Some(client) = self.clients.get_by_endpoint(src) else {
            debug!("DATA from unknown endpoint {}", src);
            self.stats.udp_rx_drops += 1;
            return;
        };
        let key = client.key;

        let enc_len = n - HEADER_LEN;
        if enc_len < MIN_IPV4_FRAME {
            debug!("DATA from {} shorter than an IPv4 header ({} bytes)", src, enc_len);
            self.stats.udp_rx_drops += 1;
            return;
        }

        packet::xor_into(&self.rx_buf[HEADER_LEN..n], &mut self.scratch, key);

        match tun.get_mut().write(&self.scratch[..enc_len]) {
            Ok(written) if written == enc_len => {
                self.stats.tun_tx_pkts += 1;
                self.stats.tun_tx_bytes += written as u64;
            }
            Ok(written) => {
                warn!("partial tunnel write: {} of {} bytes", written, enc_len);
                self.stats.tun_rx_drops += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.tun_rx_drops += 1;
            }
            Err(e) => {
                warn!("tunnel write failed: {}", e);
                self.stats.tun_rx_drops += 1;
            }
        }
    }

    /// Non-DATA traffic goes through the handshake dispatcher.
    fn on_handshake(&mut self, kind: PacketType, n: usize, src: SocketAddrV4, socket: &UdpSocket) {
        self.stats.handshake_pkts += 1;

        match kind {
            PacketType::Hello => {
                let mut reply = [0u8; WELCOME_LEN];
                match self.handshake.on_hello(src, &self.rx_buf[..n], &mut self.pool, &mut reply) {
                    Ok(len) => self.send_reply(&reply[..len], src, socket),
                    Err(HandshakeError::PoolExhausted) => {
                        // The client retries; no reply, and not a protocol
                        // failure.
                        error!("no free virtual address for HELLO from {}", src);
                    }
                    Err(err) => {
                        warn!("HELLO from {} rejected: {}", src, err);
                        self.stats.handshake_failures += 1;
                    }
                }
            }
            PacketType::ClientAck => {
                match self.handshake.on_client_ack(src, &mut self.clients, &mut self.pool) {
                    Ok(_) => {}
                    Err(err) => {
                        warn!("CLIENT_ACK from {} rejected: {}", src, err);
                        self.stats.handshake_failures += 1;
                    }
                }
            }
            PacketType::Bye => {
                debug!("BYE from {} ignored", src);
            }
            PacketType::Welcome => {
                debug!("unexpected WELCOME from {}", src);
            }
            // Dispatched to the forwarding path before reaching here.
            PacketType::Data => {}
        }
    }

    fn send_reply(&mut self, buf: &[u8], src: SocketAddrV4, socket: &UdpSocket) {
        match socket.try_send_to(buf, SocketAddr::V4(src)) {
            Ok(sent) => {
                self.stats.udp_tx_pkts += 1;
                self.stats.udp_tx_bytes += sent as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.udp_tx_drops += 1;
            }
            Err(e) => {
                warn!("reply to {} failed: {}", src, e);
                self.stats.udp_tx_drops += 1;
            }
        }
    }

    /// Tunnel egress: read frames until EAGAIN, encrypting each into the
    /// send batch; flush on a full batch and once more when the tunnel
    /// drains.
    fn drain_tun(
        &mut self,
        guard: &mut AsyncFdReadyMutGuard<'_, TunDevice>,
        socket: &UdpSocket,
    ) -> io::Result<()> {
        loop {
            match guard.try_io(|device| device.get_mut().read(&mut self.frame_buf)) {
                Err(_would_block) => {
                    self.stats.tun_read_eagain += 1;
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => self.on_tun_frame(n, socket),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => {
                    self.flush_tx(socket);
                    return Err(e);
                }
            }
        }

        self.flush_tx(socket);
        Ok(())
    }

    /// One frame out of the tunnel: resolve the destination client and queue
    /// the encrypted DATA datagram.
    fn on_tun_frame(&mut self, n: usize, socket: &UdpSocket) {
        self.stats.tun_rx_pkts += 1;
        self.stats.tun_rx_bytes += n as u64;

        if n < MIN_IPV4_FRAME {
            debug!("tunnel frame too short ({} bytes)", n);
            return;
        }

        let frame = &self.frame_buf[..n];
        let src = u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]);
        let dst = u32::from_be_bytes([frame[16], frame[17], frame[18], frame[19]]);
        debug!(
            "tunnel frame proto {} {} -> {} ({} bytes)",
            frame[9],
            Ipv4Addr::from(src),
            Ipv4Addr::from(dst),
            n
        );

        // Frames to unknown destinations are routine during client
        // teardown; dropped without a counter.
        let Some(client) = self.clients.get_by_vip(dst) else {
            return;
        };
        let endpoint = SocketAddr::V4(client.endpoint);
        let key = client.key;

        let used = self.tx.used;
        let slot = &mut self.tx.slots[used];
        packet::encode_data_header(&mut slot.buf);
        packet::xor_into(frame, &mut slot.buf[HEADER_LEN..], key);
        slot.len = HEADER_LEN + n;
        slot.dst = endpoint;
        self.tx.used += 1;

        if self.tx.is_full() {
            self.flush_tx(socket);
        }
    }

    /// Send every queued slot. A kernel that refuses mid-batch costs the
    /// remaining slots (no retry: the transport is lossy and a retry would
    /// reorder against fresh arrivals without improving delivery).
    fn flush_tx(&mut self, socket: &UdpSocket) {
        if self.tx.used == 0 {
            return;
        }
        self.stats.udp_tx_batches += 1;

        for i in 0..self.tx.used {
            let slot = &self.tx.slots[i];
            match socket.try_send_to(&slot.buf[..slot.len], slot.dst) {
                Ok(sent) => {
                    self.stats.udp_tx_pkts += 1;
                    self.stats.udp_tx_bytes += sent as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.stats.udp_tx_drops += (self.tx.used - i) as u64;
                    break;
                }
                Err(e) => {
                    warn!("send to {} failed: {}", slot.dst, e);
                    self.stats.udp_tx_drops += 1;
                }
            }
        }
        self.tx.used = 0;
    }

    /// One-second housekeeping: sweep expired handshakes, report counters.
    fn on_tick(&mut self) {
        let expired = self.handshake.sweep(now(), &mut self.pool);
        if expired > 0 {
            warn!("{} pending handshakes expired", expired);
        }
        self.stats.report_and_reset();
    }
}

/// The VPN server: socket, tunnel and the forwarding state.
pub struct Server {
    socket: UdpSocket,
    tun: AsyncFd<TunDevice>,
    fwd: Forwarder,
}

/// Wait for tunnel readability, then drain frames into the send batch.
/// Runs synchronously after the single await, so cancellation by another
/// `select!` branch can only land before any frame is touched.
async fn tun_ready(
    tun: &mut AsyncFd<TunDevice>,
    socket: &UdpSocket,
    fwd: &mut Forwarder,
) -> io::Result<()> {
    let mut guard = tun.readable_mut().await?;
    fwd.drain_tun(&mut guard, socket)
}

impl Server {
    /// Bind the transport socket and open the tunnel device.
    pub async fn bind(config: &ServerConfig) -> Result<Self, InitError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.listen_port))
            .await
            .map_err(InitError::Bind)?;
        info!("udp listening on 0.0.0.0:{}", config.listen_port);

        let tun = tun::open(
            &config.tun_name,
            config.tun_addr,
            config.tun_netmask,
            config.tun_mtu,
        )?;

        Ok(Self {
            socket,
            tun,
            fwd: Forwarder::new(config),
        })
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(&mut self) -> Result<(), io::Error> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let mut tick = time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Consume the immediate first tick.
        tick.tick().await;

        info!(
            "forwarding loop running (rx batch {}, tx batch {})",
            RX_BATCH, TX_BATCH
        );

        loop {
            tokio::select! {
                biased;

                _ = sigint.recv() => {
                    info!("SIGINT: shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM: shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.fwd.on_tick();
                }
                ready = self.socket.readable() => {
                    ready?;
                    self.fwd.drain_socket(&self.socket, &mut self.tun);
                }
                res = tun_ready(&mut self.tun, &self.socket, &mut self.fwd) => {
                    res?;
                }
            }
        }

        // Pending sessions are abandoned here; process exit releases their
        // reservations along with both descriptors.
        info!(
            "shutdown: {} clients, {} pending handshakes",
            self.fwd.clients.len(),
            self.fwd.handshake.pending().len()
        );
        Ok(())
    }
}
