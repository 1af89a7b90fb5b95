//! Interface-aware dial planning.
//!
//! # Responsibilities
//! - Look up a named interface (state, index, addresses)
//! - Pick the source address to bind when dialing through that interface
//! - Attach the interface zone to link-local destinations
//!
//! # Source selection
//! Candidates are evaluated in interface order. A candidate is skipped if it
//! equals the destination, if it is neither global unicast nor link-local,
//! if its class (global vs link-local) differs from the destination's, or if
//! its address family differs. The first survivor wins.

use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};

use pnet::datalink;

use crate::error::LinkError;

/// What the dialer needs to know about an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub up: bool,
    pub addrs: Vec<IpAddr>,
}

/// Look up an interface by name.
pub fn lookup_interface(name: &str) -> Result<InterfaceInfo, LinkError> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .map(|iface| InterfaceInfo {
            name: iface.name.clone(),
            index: iface.index,
            up: iface.is_up(),
            addrs: iface.ips.iter().map(|net| net.ip()).collect(),
        })
        .ok_or_else(|| LinkError::InterfaceNotFound(name.to_string()))
}

/// Unicast, routable beyond the local link. Private ranges count.
pub fn is_global_unicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !v4.is_unspecified()
                && !v4.is_loopback()
                && !v4.is_link_local()
                && !v4.is_multicast()
                && !v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            !v6.is_unspecified()
                && !v6.is_loopback()
                && !v6.is_multicast()
                && !is_link_local_v6(v6)
        }
    }
}

pub fn is_link_local_unicast(ip: &IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => is_link_local_v6(&v6),
    }
}

fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Unmap IPv4 peers reported by a dual-stack socket as `::ffff:a.b.c.d`.
pub fn canonical_addr(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) if v6.ip().to_ipv4_mapped().is_some() => {
            SocketAddr::new(v6.ip().to_canonical(), v6.port())
        }
        other => other,
    }
}

/// Choose a source address on an interface for reaching `dst`.
pub fn select_source_address(candidates: &[IpAddr], dst: IpAddr) -> Option<IpAddr> {
    let dst_global = is_global_unicast(&dst);
    let dst_link_local = is_link_local_unicast(&dst);

    candidates.iter().copied().find(|src| {
        if *src == dst {
            return false;
        }
        let src_global = is_global_unicast(src);
        let src_link_local = is_link_local_unicast(src);
        if !src_global && !src_link_local {
            return false;
        }
        if src_global != dst_global && src_link_local != dst_link_local {
            return false;
        }
        src.is_ipv4() == dst.is_ipv4()
    })
}

/// Resolved addresses for one outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialPlan {
    /// Destination, with scope id filled in for link-local IPv6.
    pub remote: SocketAddr,
    /// Source to bind, if an interface was named.
    pub local: Option<SocketAddr>,
    /// Interface to bind the socket to.
    pub interface: Option<String>,
}

impl DialPlan {
    /// Plan a dial to `dst`, optionally through the interface `sintf`.
    pub fn new(dst: SocketAddr, sintf: &str) -> Result<Self, LinkError> {
        Self::with_lookup(dst, sintf, lookup_interface)
    }

    /// As [`DialPlan::new`], with an injectable interface lookup.
    pub fn with_lookup<F>(dst: SocketAddr, sintf: &str, lookup: F) -> Result<Self, LinkError>
    where
        F: Fn(&str) -> Result<InterfaceInfo, LinkError>,
    {
        if is_link_local_unicast(&dst.ip()) && sintf.is_empty() {
            return Err(LinkError::LinkLocalRequiresZone(dst.ip()));
        }
        if sintf.is_empty() {
            return Ok(Self {
                remote: dst,
                local: None,
                interface: None,
            });
        }

        let iface = lookup(sintf)?;
        if !iface.up {
            return Err(LinkError::InterfaceDown(iface.name));
        }
        let src = select_source_address(&iface.addrs, dst.ip())
            .ok_or_else(|| LinkError::NoSourceAddress(iface.name.clone()))?;

        Ok(Self {
            remote: scoped(dst, iface.index),
            local: Some(scoped(SocketAddr::new(src, 0), iface.index)),
            interface: Some(iface.name),
        })
    }
}

/// Attach `scope_id` to a link-local IPv6 socket address.
pub fn scoped(addr: SocketAddr, scope_id: u32) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) if is_link_local_v6(v6.ip()) => {
            SocketAddr::V6(SocketAddrV6::new(*v6.ip(), v6.port(), v6.flowinfo(), scope_id))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn eth0(addrs: &[&str]) -> impl Fn(&str) -> Result<InterfaceInfo, LinkError> {
        let addrs: Vec<IpAddr> = addrs.iter().map(|a| ip(a)).collect();
        move |name| {
            if name != "eth0" {
                return Err(LinkError::InterfaceNotFound(name.to_string()));
            }
            Ok(InterfaceInfo {
                name: "eth0".into(),
                index: 3,
                up: true,
                addrs: addrs.clone(),
            })
        }
    }

    #[test]
    fn test_address_classes() {
        assert!(is_global_unicast(&ip("10.0.0.5")));
        assert!(is_global_unicast(&ip("2001:db8::1")));
        assert!(!is_global_unicast(&ip("127.0.0.1")));
        assert!(!is_global_unicast(&ip("fe80::1")));
        assert!(is_link_local_unicast(&ip("fe80::1")));
        assert!(is_link_local_unicast(&ip("169.254.3.4")));
        assert!(!is_link_local_unicast(&ip("ff02::1")));
        assert!(is_link_local_unicast(&ip("::ffff:169.254.3.4")));
        assert!(!is_link_local_unicast(&ip("::ffff:10.0.0.5")));
    }

    #[test]
    fn test_canonical_addr_unmaps_ipv4() {
        let mapped: SocketAddr = "[::ffff:127.0.0.1]:9001".parse().unwrap();
        assert_eq!(canonical_addr(mapped), "127.0.0.1:9001".parse::<SocketAddr>().unwrap());

        let native: SocketAddr = "[2001:db8::1]:9001".parse().unwrap();
        assert_eq!(canonical_addr(native), native);
    }

    #[test]
    fn test_selects_global_source_for_global_destination() {
        let candidates = [ip("10.0.0.5"), ip("fe80::1")];
        assert_eq!(select_source_address(&candidates, ip("10.0.0.9")), Some(ip("10.0.0.5")));
    }

    #[test]
    fn test_selects_link_local_source_for_link_local_destination() {
        let candidates = [ip("10.0.0.5"), ip("fe80::1")];
        assert_eq!(select_source_address(&candidates, ip("fe80::9")), Some(ip("fe80::1")));
    }

    #[test]
    fn test_skips_destination_loopback_and_wrong_family() {
        let candidates = [ip("10.0.0.9"), ip("127.0.0.1"), ip("2001:db8::5")];
        assert_eq!(select_source_address(&candidates, ip("10.0.0.9")), None);

        let candidates = [ip("2001:db8::5"), ip("192.168.1.2")];
        assert_eq!(select_source_address(&candidates, ip("10.0.0.9")), Some(ip("192.168.1.2")));
    }

    #[test]
    fn test_plan_sets_zone_for_link_local() {
        let dst: SocketAddr = "[fe80::9]:1234".parse().unwrap();
        let plan = DialPlan::with_lookup(dst, "eth0", eth0(&["10.0.0.5", "fe80::1"])).unwrap();

        match plan.remote {
            SocketAddr::V6(v6) => assert_eq!(v6.scope_id(), 3),
            other => panic!("unexpected remote {other}"),
        }
        match plan.local {
            Some(SocketAddr::V6(v6)) => {
                assert_eq!(*v6.ip(), "fe80::1".parse::<Ipv6Addr>().unwrap());
                assert_eq!(v6.scope_id(), 3);
            }
            other => panic!("unexpected local {other:?}"),
        }
        assert_eq!(plan.interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn test_plan_global_destination_through_interface() {
        let dst: SocketAddr = "10.0.0.9:1234".parse().unwrap();
        let plan = DialPlan::with_lookup(dst, "eth0", eth0(&["10.0.0.5", "fe80::1"])).unwrap();
        assert_eq!(plan.local, Some("10.0.0.5:0".parse().unwrap()));
        assert_eq!(plan.remote, dst);
    }

    #[test]
    fn test_plan_requires_zone_for_link_local() {
        let dst: SocketAddr = "[fe80::9]:1234".parse().unwrap();
        let err = DialPlan::with_lookup(dst, "", eth0(&[])).unwrap_err();
        assert!(matches!(err, LinkError::LinkLocalRequiresZone(_)));
    }

    #[test]
    fn test_plan_without_interface_is_direct() {
        let dst: SocketAddr = "192.0.2.7:80".parse().unwrap();
        let plan = DialPlan::with_lookup(dst, "", eth0(&[])).unwrap();
        assert_eq!(plan.local, None);
        assert_eq!(plan.remote, dst);
    }

    #[test]
    fn test_plan_interface_errors() {
        let dst: SocketAddr = "10.0.0.9:1234".parse().unwrap();
        let err = DialPlan::with_lookup(dst, "wlan9", eth0(&[])).unwrap_err();
        assert!(matches!(err, LinkError::InterfaceNotFound(_)));

        let err = DialPlan::with_lookup(dst, "eth0", eth0(&["fe80::1"])).unwrap_err();
        assert!(matches!(err, LinkError::NoSourceAddress(_)));

        let down = |_: &str| {
            Ok(InterfaceInfo {
                name: "eth1".into(),
                index: 4,
                up: false,
                addrs: vec![],
            })
        };
        let err = DialPlan::with_lookup(dst, "eth1", down).unwrap_err();
        assert!(matches!(err, LinkError::InterfaceDown(_)));
    }
}
