//! Local address discovery.
//!
//! Finding "the" address other hosts reach this machine on is a heuristic:
//! multi-homed hosts and NAT can defeat it. Deployments that know better
//! should advertise an explicit address through `StaticAddressResolver`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::error::{Result, RendezvousError};

/// Public address used only to let the OS pick an outbound route.
/// Nothing is ever sent to it.
const ROUTE_PROBE_TARGET: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53);

/// Determines the host string a participant advertises.
pub trait AddressResolver: Send + Sync {
    /// Returns an IP address or hostname reachable by the other participants.
    ///
    /// # Errors
    ///
    /// Returns `RendezvousError::Resolution` if no usable address exists.
    fn resolve(&self) -> Result<String>;
}

/// Best-effort detection from the host's network interfaces.
///
/// Prefers the default-route interface, then a non-loopback address of a
/// physical interface (IPv4 over IPv6). When no such address is configured,
/// falls back to the source address the OS would use to reach a public host.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceAddressResolver;

impl AddressResolver for InterfaceAddressResolver {
    fn resolve(&self) -> Result<String> {
        resolve_local_address()
    }
}

/// Always returns the configured host.
#[derive(Debug, Clone)]
pub struct StaticAddressResolver {
    host: String,
}

impl StaticAddressResolver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl AddressResolver for StaticAddressResolver {
    fn resolve(&self) -> Result<String> {
        Ok(self.host.clone())
    }
}

/// Interface name prefixes of container bridges, virtual Ethernet pairs,
/// overlay networks and tunnels. Their addresses are usually not reachable
/// from other hosts.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "docker", "br-", "virbr", "veth", "cni", "flannel", "cali", "vxlan", "weave", "podman",
    "lxc", "lxd", "kube", "tun", "tap", "zt",
];

/// Determine the local machine's externally reachable IP address.
///
/// Candidates, in order:
///
/// 1. The address of the default-route interface
/// 2. The best ranked interface address
/// 3. The source address of a routed probe
///
/// # Errors
///
/// Returns `RendezvousError::Resolution` when none of them yields a usable
/// address.
pub fn resolve_local_address() -> Result<String> {
    match local_ip_address::local_ip() {
        Ok(ip) if is_usable(&ip) => {
            tracing::debug!("Using default-route address {}", ip);
            return Ok(ip.to_string());
        }
        Ok(ip) => tracing::debug!("Ignoring default-route address {}", ip),
        Err(e) => tracing::debug!("No default-route address: {}", e),
    }

    match interface_address() {
        Some(ip) => {
            tracing::debug!("Using interface address {}", ip);
            Ok(ip.to_string())
        }
        None => {
            let ip = routed_address()?;
            tracing::debug!("No interface address found, using routed address {}", ip);
            Ok(ip.to_string())
        }
    }
}

fn interface_address() -> Option<IpAddr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => best_interface_address(interfaces),
        Err(e) => {
            tracing::debug!("Failed to list network interfaces: {}", e);
            None
        }
    }
}

/// Pick the address most likely reachable from other hosts.
///
/// Physical interfaces rank ahead of virtual ones, IPv4 ahead of IPv6, then
/// interface names break ties so the choice is stable across calls.
fn best_interface_address(interfaces: Vec<(String, IpAddr)>) -> Option<IpAddr> {
    let mut candidates: Vec<(String, IpAddr)> = interfaces
        .into_iter()
        .filter(|(_, ip)| is_usable(ip))
        .collect();

    candidates.sort_by(|(a_name, a_ip), (b_name, b_ip)| {
        is_virtual_interface(a_name)
            .cmp(&is_virtual_interface(b_name))
            .then_with(|| a_ip.is_ipv6().cmp(&b_ip.is_ipv6()))
            .then_with(|| a_name.cmp(b_name))
    });

    for (name, ip) in &candidates {
        tracing::trace!("Found interface {}: {}", name, ip);
    }

    candidates.into_iter().map(|(_, ip)| ip).next()
}

fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

fn routed_address() -> Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|e| RendezvousError::resolution_with_source("failed to open probe socket", e))?;
    socket.connect(ROUTE_PROBE_TARGET).map_err(|e| {
        RendezvousError::resolution_with_source("no route to a public address", e)
    })?;
    let local = socket
        .local_addr()
        .map_err(|e| RendezvousError::resolution_with_source("failed to read probe address", e))?;

    let ip = local.ip();
    if ip.is_unspecified() || ip.is_loopback() {
        return Err(RendezvousError::resolution(format!(
            "the OS selected unusable source address {ip}"
        )));
    }
    Ok(ip)
}

fn is_usable(ip: &IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return false;
    }
    match ip {
        IpAddr::V4(v4) => !v4.is_link_local(),
        // fe80::/10
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}
