//! Local address selection and broadcast target derivation
//!
//! Picks the "best" non-loopback IPv4 address for discovery replies and
//! derives the broadcast addresses the initiator's queries go out on. Pure
//! over an `if-addrs` snapshot; no state is kept between discovery cycles.

use std::net::Ipv4Addr;
use tracing::debug;

/// Interface name fragments that mark virtual/NAT adapters
const VIRTUAL_ADAPTER_KEYWORDS: &[&str] = &[
    "vmware", "vmnet", "virtualbox", "vbox", "hyper-v", "vethernet", "docker", "veth", "utun",
    "tun", "tap", "bridge",
];

/// An IPv4 address bound to a local interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAddress {
    /// The interface address
    pub ip: Ipv4Addr,
    /// OS interface name
    pub interface: String,
    /// Whether the interface name matches the virtual-adapter denylist
    pub is_virtual: bool,
}

/// Broadcast addresses derived from one local interface
///
/// Both forms are used because subnet-directed broadcast is not deliverable
/// through every adapter/driver combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastTarget {
    /// Subnet broadcast: interface address with the last octet set to 255
    pub subnet: Ipv4Addr,
    /// All-ones global broadcast
    pub global: Ipv4Addr,
}

/// Pick the best local IPv4 address for discovery replies
///
/// Virtual/NAT adapters lose to physical ones; first-seen wins ties. Falls
/// back to loopback when no candidate exists.
pub fn select_local_address() -> LocalAddress {
    let selected = pick(candidates());
    debug!(
        "selected local address {} on {}",
        selected.ip, selected.interface
    );
    selected
}

/// Broadcast targets for every local IPv4 interface
pub fn broadcast_targets() -> Vec<BroadcastTarget> {
    candidates()
        .iter()
        .map(|candidate| targets_for(candidate.ip))
        .collect()
}

fn candidates() -> Vec<LocalAddress> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!("failed to enumerate interfaces: {}", e);
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(ref v4) => Some(LocalAddress {
                ip: v4.ip,
                is_virtual: is_virtual_name(&iface.name),
                interface: iface.name,
            }),
            _ => None,
        })
        .collect()
}

fn is_virtual_name(name: &str) -> bool {
    let lowered = name.to_lowercase();
    VIRTUAL_ADAPTER_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

fn pick(candidates: Vec<LocalAddress>) -> LocalAddress {
    candidates
        .into_iter()
        .min_by_key(|candidate| candidate.is_virtual)
        .unwrap_or(LocalAddress {
            ip: Ipv4Addr::LOCALHOST,
            interface: "loopback".to_string(),
            is_virtual: false,
        })
}

fn targets_for(ip: Ipv4Addr) -> BroadcastTarget {
    let [a, b, c, _] = ip.octets();
    BroadcastTarget {
        subnet: Ipv4Addr::new(a, b, c, 255),
        global: Ipv4Addr::BROADCAST,
    }
}
