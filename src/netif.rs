//! Local interface discovery
//!
//! Finds the IPv4 address the LAN-facing listener should advertise. On the
//! hosts this engine targets the client-facing interface is `en0` or a
//! `bridge*` device, so those names are preferred; everything else falls
//! back to the `0.0.0.0` sentinel. Enumeration failures also yield the
//! sentinel, never an error.

use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Address published when no suitable interface is found
pub const UNKNOWN_ADDR: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// IPv4 address of the preferred LAN interface, or `0.0.0.0`
pub fn lan_ipv4() -> Ipv4Addr {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => select_lan(ifaces.iter().map(|iface| (iface.name.as_str(), iface.ip()))),
        Err(e) => {
            debug!("interface enumeration failed: {}", e);
            UNKNOWN_ADDR
        }
    }
}

fn select_lan<'a>(ifaces: impl IntoIterator<Item = (&'a str, IpAddr)>) -> Ipv4Addr {
    for (name, addr) in ifaces {
        if let IpAddr::V4(v4) = addr {
            if name == "en0" || name.starts_with("bridge") {
                return v4;
            }
        }
    }
    UNKNOWN_ADDR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_en0() {
        let ifaces = [
            ("lo0", IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            ("en0", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))),
        ];
        assert_eq!(select_lan(ifaces), Ipv4Addr::new(192, 168, 1, 5));
    }

    #[test]
    fn test_select_bridge_prefix() {
        let ifaces = [
            ("utun0", IpAddr::V4(Ipv4Addr::new(10, 8, 0, 2))),
            ("bridge100", IpAddr::V4(Ipv4Addr::new(172, 20, 10, 1))),
        ];
        assert_eq!(select_lan(ifaces), Ipv4Addr::new(172, 20, 10, 1));
    }

    #[test]
    fn test_select_first_match_wins() {
        let ifaces = [
            ("en0", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))),
            ("bridge100", IpAddr::V4(Ipv4Addr::new(172, 20, 10, 1))),
        ];
        assert_eq!(select_lan(ifaces), Ipv4Addr::new(192, 168, 1, 5));
    }

    #[test]
    fn test_select_skips_ipv6_on_preferred() {
        let ifaces = [
            ("en0", "fe80::1".parse::<IpAddr>().unwrap()),
            ("bridge0", IpAddr::V4(Ipv4Addr::new(172, 20, 10, 1))),
        ];
        assert_eq!(select_lan(ifaces), Ipv4Addr::new(172, 20, 10, 1));
    }

    #[test]
    fn test_select_no_match() {
        let ifaces = [
            ("lo0", IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            ("eth0", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
        ];
        assert_eq!(select_lan(ifaces), UNKNOWN_ADDR);
    }

    #[test]
    fn test_select_empty() {
        assert_eq!(select_lan(std::iter::empty()), UNKNOWN_ADDR);
    }

    #[test]
    fn test_lan_ipv4_never_panics() {
        // Whatever the host looks like, the call must return an address
        let _ = lan_ipv4();
    }
}
