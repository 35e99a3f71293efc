//! TCP subnet sweep used to re-locate a doorbell whose DHCP lease moved.
//!
//! Doorbells do not answer the usual UDP discovery broadcasts, so discovery
//! here is a plain connect scan: every host in the configured CIDR block is
//! probed on the device port with a short timeout, a bounded number of
//! probes in flight at once.

use std::net::Ipv4Addr;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{DoorbellError, Result};

/// Probe timeout during a sweep.
pub const SCAN_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Probe timeout for a single reachability check before connecting.
pub const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum concurrent probes during a sweep.
pub const SCAN_CONCURRENCY: usize = 25;

/// Check whether `host:port` accepts a TCP connection within `probe_timeout`.
pub async fn probe_host(host: &str, port: u16, probe_timeout: Duration) -> bool {
    match timeout(probe_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!("Probe {}:{} refused: {}", host, port, e);
            false
        }
        Err(_) => {
            debug!("Probe {}:{} timed out", host, port);
            false
        }
    }
}

/// Sweep `subnet` (CIDR notation, e.g. "192.168.1.0/24") for hosts with
/// `port` open. Returns the responsive addresses in ascending order, no
/// duplicates. Probes run [`SCAN_CONCURRENCY`] at a time.
pub async fn scan_subnet(subnet: &str, port: u16, probe_timeout: Duration) -> Result<Vec<Ipv4Addr>> {
    let hosts = enumerate_hosts(subnet)?;
    info!(
        "Scanning {} hosts in {} for port {}",
        hosts.size_hint().0,
        subnet,
        port
    );

    let mut found: Vec<Ipv4Addr> = stream::iter(hosts)
        .map(|ip| async move {
            probe_host(&ip.to_string(), port, probe_timeout)
                .await
                .then_some(ip)
        })
        .buffer_unordered(SCAN_CONCURRENCY)
        .filter_map(|hit| async move { hit })
        .collect()
        .await;

    found.sort_unstable();
    found.dedup();

    if found.is_empty() {
        warn!("Scan of {} found no open port {}", subnet, port);
    } else {
        info!("Scan of {} found {} candidate(s)", subnet, found.len());
    }
    Ok(found)
}

/// Expand a CIDR block into its host addresses, lazily so a wide prefix
/// never materializes millions of addresses up front. The network and
/// broadcast addresses are skipped for prefixes shorter than /31.
fn enumerate_hosts(subnet: &str) -> Result<impl Iterator<Item = Ipv4Addr> + use<>> {
    let (addr_part, prefix_part) = subnet
        .split_once('/')
        .ok_or(DoorbellError::InvalidPayload)?;
    let base: Ipv4Addr = addr_part
        .trim()
        .parse()
        .map_err(|_| DoorbellError::InvalidPayload)?;
    let prefix: u32 = prefix_part
        .trim()
        .parse()
        .map_err(|_| DoorbellError::InvalidPayload)?;
    if prefix > 32 {
        return Err(DoorbellError::InvalidPayload);
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(base) & mask;
    let broadcast = network | !mask;

    let (first, last) = if prefix >= 31 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    };

    Ok((first..=last).map(Ipv4Addr::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn enumerates_slash24_hosts() {
        let hosts: Vec<Ipv4Addr> = enumerate_hosts("192.168.1.0/24").unwrap().collect();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
    }

    #[test]
    fn enumerates_small_blocks() {
        let hosts: Vec<Ipv4Addr> = enumerate_hosts("10.0.0.0/30").unwrap().collect();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
        // /31 point-to-point keeps both addresses
        assert_eq!(enumerate_hosts("10.0.0.0/31").unwrap().count(), 2);
        assert_eq!(enumerate_hosts("10.0.0.5/32").unwrap().count(), 1);
    }

    #[test]
    fn normalizes_host_bits() {
        // Address inside the block, not on the boundary
        let mut hosts = enumerate_hosts("192.168.1.77/24").unwrap();
        assert_eq!(hosts.next(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(hosts.count(), 253);
    }

    #[test]
    fn wide_prefix_enumerates_without_materializing() {
        // A /8 is ~16.7M hosts; taking the front must not allocate them all
        let mut hosts = enumerate_hosts("10.0.0.0/8").unwrap();
        assert_eq!(hosts.next(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(hosts.size_hint().0, 16_777_213);

        let mut all = enumerate_hosts("0.0.0.0/0").unwrap();
        assert_eq!(all.next(), Some(Ipv4Addr::new(0, 0, 0, 1)));
    }

    #[test]
    fn rejects_malformed_subnets() {
        assert!(enumerate_hosts("192.168.1.0").is_err());
        assert!(enumerate_hosts("not-an-ip/24").is_err());
        assert!(enumerate_hosts("10.0.0.0/40").is_err());
    }

    #[tokio::test]
    async fn probe_detects_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_host("127.0.0.1", port, Duration::from_secs(1)).await);
        drop(listener);
        assert!(!probe_host("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn scan_finds_exactly_the_listening_host() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // 127.0.0.0/30 covers 127.0.0.1 and 127.0.0.2; only .1 listens
        let found = scan_subnet("127.0.0.0/30", port, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(found, vec![Ipv4Addr::new(127, 0, 0, 1)]);
    }
}
