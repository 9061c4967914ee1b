//! Tunnel device setup.
//!
//! The device is an IPv4 point-to-point interface with no per-packet
//! metadata prefix: one `read` returns exactly one frame, one `write`
//! injects one. It is switched to non-blocking and registered with the
//! reactor so the forwarding loop can wait on readability alongside the
//! socket.

use std::net::Ipv4Addr;
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tracing::info;

pub type TunDevice = tun::platform::Device;

#[derive(Debug, Error)]
pub enum TunError {
    #[error("tunnel device setup failed: {0}")]
    Create(#[from] tun::Error),

    #[error("tunnel registration failed: {0}")]
    Register(#[from] std::io::Error),
}

/// Create and bring up the tunnel device, non-blocking, wrapped for the
/// reactor. Assigning an address is optional; deployments often configure
/// the interface externally.
pub fn open(
    name: &str,
    addr: Option<Ipv4Addr>,
    netmask: Ipv4Addr,
    mtu: i32,
) -> Result<AsyncFd<TunDevice>, TunError> {
    let mut config = tun::Configuration::default();
    config.name(name);
    if let Some(ip) = addr {
        config.address(ip).netmask(netmask);
    }
    config.mtu(mtu).up();
    config.platform(|platform| {
        // Raw IPv4 frames only; no packet-information prefix.
        platform.packet_information(false);
    });

    let device = tun::create(&config)?;
    device.set_nonblock()?;

    info!("tunnel device {} up (mtu {})", name, mtu);
    Ok(AsyncFd::new(device)?)
}
