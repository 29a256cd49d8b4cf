use crate::error::{IgdError, Result};
use std::net::Ipv4Addr;

/// First non-loopback IPv4 address of this host
pub fn local_ipv4() -> Result<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs().map_err(|e| IgdError::LocalAddress(e.to_string()))?;

    let candidates = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| (iface.name.clone(), iface.ip()));

    first_ipv4(candidates).ok_or_else(|| IgdError::LocalAddress("no non-loopback IPv4 interface".to_string()))
}

fn first_ipv4(candidates: impl IntoIterator<Item = (String, std::net::IpAddr)>) -> Option<Ipv4Addr> {
    candidates.into_iter().find_map(|(name, ip)| match ip {
        std::net::IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => {
            tracing::debug!("Using local address {} ({})", v4, name);
            Some(v4)
        }
        _ => None,
    })
}
