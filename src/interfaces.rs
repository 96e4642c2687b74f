use std::net::Ipv4Addr;

use if_addrs::IfAddr;
use log::warn;

use crate::endpoint::ANY_HOST;

/// A non-loopback IPv4 interface address, as shown in the startup listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanInterface {
    pub name: String,
    pub addr: Ipv4Addr,
}

/// Every active IPv4, non-loopback interface. Enumeration failure is
/// not fatal; the listing just comes up empty.
pub fn collect() -> Vec<LanInterface> {
    let ifaces = match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {e}");
            return Vec::new();
        }
    };
    ifaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) => Some(LanInterface {
                name: iface.name,
                addr: v4.ip,
            }),
            IfAddr::V6(_) => None,
        })
        .collect()
}

/// Interfaces the listener will be reachable on: all of them for the
/// `*` host, otherwise only the exact address match.
pub fn matching<'a>(ifaces: &'a [LanInterface], host: &str) -> Vec<&'a LanInterface> {
    ifaces
        .iter()
        .filter(|iface| host == ANY_HOST || iface.addr.to_string() == host)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<LanInterface> {
        vec![
            LanInterface {
                name: "eth0".to_string(),
                addr: Ipv4Addr::new(192, 168, 0, 100),
            },
            LanInterface {
                name: "wlan0".to_string(),
                addr: Ipv4Addr::new(10, 0, 0, 1),
            },
        ]
    }

    #[test]
    fn star_matches_every_interface() {
        let ifaces = sample();
        assert_eq!(matching(&ifaces, "*").len(), 2);
    }

    #[test]
    fn exact_address_matches_one() {
        let ifaces = sample();
        let matches = matching(&ifaces, "10.0.0.1");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "wlan0");
    }

    #[test]
    fn unknown_address_matches_none() {
        let ifaces = sample();
        assert!(matching(&ifaces, "172.16.0.1").is_empty());
    }

    #[test]
    fn hostname_matches_none() {
        let ifaces = sample();
        assert!(matching(&ifaces, "localhost").is_empty());
    }
}
