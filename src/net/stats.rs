//! Forwarding counters with a one-second report/reset cycle.
//!
//! Per-interval counters reset after every report; the batching averages
//! and megabit figures keep running maxima (and minima) across the life of
//! the process, mirroring what the loop prints each second.

use std::time::Instant;
use tracing::{debug, info};

pub struct Stats {
    // ---------- UDP ingress ----------
    pub udp_rx_pkts: u64,
    pub udp_rx_bytes: u64,
    pub udp_rx_drops: u64,
    pub udp_rx_batches: u64,
    pub udp_recv_eagain: u64,

    // ---------- UDP egress ----------
    pub udp_tx_pkts: u64,
    pub udp_tx_bytes: u64,
    pub udp_tx_drops: u64,
    pub udp_tx_batches: u64,

    // ---------- Tunnel ----------
    pub tun_rx_pkts: u64,
    pub tun_rx_bytes: u64,
    pub tun_rx_drops: u64,
    pub tun_read_eagain: u64,
    pub tun_tx_pkts: u64,
    pub tun_tx_bytes: u64,

    // ---------- Handshake ----------
    pub handshake_pkts: u64,
    pub handshake_failures: u64,

    // ---------- Running extremes (never reset) ----------
    max_avg_rx_batch: f64,
    max_avg_tx_batch: f64,
    max_udp_mbps: u64,
    min_udp_mbps: u64,
    max_tun_mbps: u64,
    min_tun_mbps: u64,

    last_reset: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            udp_rx_pkts: 0,
            udp_rx_bytes: 0,
            udp_rx_drops: 0,
            udp_rx_batches: 0,
            udp_recv_eagain: 0,
            udp_tx_pkts: 0,
            udp_tx_bytes: 0,
            udp_tx_drops: 0,
            udp_tx_batches: 0,
            tun_rx_pkts: 0,
            tun_rx_bytes: 0,
            tun_rx_drops: 0,
            tun_read_eagain: 0,
            tun_tx_pkts: 0,
            tun_tx_bytes: 0,
            handshake_pkts: 0,
            handshake_failures: 0,
            max_avg_rx_batch: 0.0,
            max_avg_tx_batch: 0.0,
            max_udp_mbps: 0,
            min_udp_mbps: u64::MAX,
            max_tun_mbps: 0,
            min_tun_mbps: u64::MAX,
            last_reset: Instant::now(),
        }
    }

    fn interval_active(&self) -> bool {
        self.udp_rx_pkts
            + self.udp_tx_pkts
            + self.tun_rx_pkts
            + self.tun_tx_pkts
            + self.handshake_pkts
            + self.udp_rx_drops
            + self.udp_tx_drops
            + self.tun_rx_drops
            > 0
    }

    /// Emit the interval report and reset the per-interval counters. Idle
    /// intervals log at debug so a quiet server does not scroll its log.
    pub fn report_and_reset(&mut self) {
        let elapsed = self.last_reset.elapsed().as_secs().max(1);

        let udp_mbps = (self.udp_rx_bytes * 8) / (elapsed * 1_000_000);
        self.max_udp_mbps = self.max_udp_mbps.max(udp_mbps);
        self.min_udp_mbps = self.min_udp_mbps.min(udp_mbps);

        let tun_mbps = (self.tun_tx_bytes * 8) / (elapsed * 1_000_000);
        self.max_tun_mbps = self.max_tun_mbps.max(tun_mbps);
        self.min_tun_mbps = self.min_tun_mbps.min(tun_mbps);

        let avg_rx_batch = if self.udp_rx_batches > 0 {
            self.udp_rx_pkts as f64 / self.udp_rx_batches as f64
        } else {
            0.0
        };
        let avg_tx_batch = if self.udp_tx_batches > 0 {
            self.udp_tx_pkts as f64 / self.udp_tx_batches as f64
        } else {
            0.0
        };
        self.max_avg_rx_batch = self.max_avg_rx_batch.max(avg_rx_batch);
        self.max_avg_tx_batch = self.max_avg_tx_batch.max(avg_tx_batch);

        if self.interval_active() {
            info!(
                "udp rx {} pkts/{} B ({} batches) tx {} pkts/{} B ({} batches) | \
                 tun rx {} pkts/{} B tx {} pkts/{} B",
                self.udp_rx_pkts,
                self.udp_rx_bytes,
                self.udp_rx_batches,
                self.udp_tx_pkts,
                self.udp_tx_bytes,
                self.udp_tx_batches,
                self.tun_rx_pkts,
                self.tun_rx_bytes,
                self.tun_tx_pkts,
                self.tun_tx_bytes,
            );
            info!(
                "drops udp_rx {} udp_tx {} tun_rx {} | eagain udp {} tun {} | \
                 handshake {} pkts {} failures",
                self.udp_rx_drops,
                self.udp_tx_drops,
                self.tun_rx_drops,
                self.udp_recv_eagain,
                self.tun_read_eagain,
                self.handshake_pkts,
                self.handshake_failures,
            );
            info!(
                "avg rx batch {:.2} (max {:.2}) avg tx batch {:.2} (max {:.2}) | \
                 udp {} Mbps (max {} min {}) tun {} Mbps (max {} min {})",
                avg_rx_batch,
                self.max_avg_rx_batch,
                avg_tx_batch,
                self.max_avg_tx_batch,
                udp_mbps,
                self.max_udp_mbps,
                self.min_udp_mbps,
                tun_mbps,
                self.max_tun_mbps,
                self.min_tun_mbps,
            );
        } else {
            debug!("idle interval");
        }

        self.udp_rx_pkts = 0;
        self.udp_rx_bytes = 0;
        self.udp_rx_drops = 0;
        self.udp_rx_batches = 0;
        self.udp_recv_eagain = 0;
        self.udp_tx_pkts = 0;
        self.udp_tx_bytes = 0;
        self.udp_tx_drops = 0;
        self.udp_tx_batches = 0;
        self.tun_rx_pkts = 0;
        self.tun_rx_bytes = 0;
        self.tun_rx_drops = 0;
        self.tun_read_eagain = 0;
        self.tun_tx_pkts = 0;
        self.tun_tx_bytes = 0;
        self.handshake_pkts = 0;
        self.handshake_failures = 0;
        self.last_reset = Instant::now();
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_resets_interval_counters() {
        let mut stats = Stats::new();
        stats.udp_rx_pkts = 16;
        stats.udp_rx_batches = 2;
        stats.handshake_failures = 1;

        stats.report_and_reset();
        assert_eq!(stats.udp_rx_pkts, 0);
        assert_eq!(stats.udp_rx_batches, 0);
        assert_eq!(stats.handshake_failures, 0);
        // The batching maximum survives the reset.
        assert!(stats.max_avg_rx_batch >= 8.0);
    }
}
