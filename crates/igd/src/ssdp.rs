/// SSDP gateway discovery
///
/// Sends one M-SEARCH for an Internet Gateway Device to the SSDP multicast
/// group and waits for the first answer. The socket lives only for the
/// duration of one `discover` call.

use crate::error::{IgdError, Result};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub const SSDP_MULTICAST_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);
const SSDP_MX: u8 = 3; // Max wait time in seconds

pub const IGD_SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// The interesting part of an SSDP search response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    /// URL of the device description
    pub location: String,
    pub st: Option<String>,
    pub server: Option<String>,
    pub from: SocketAddr,
}

/// One-shot SSDP searcher for Internet Gateway Devices
#[derive(Debug, Clone)]
pub struct SsdpDiscoverer {
    target: SocketAddr,
    timeout: Duration,
}

impl Default for SsdpDiscoverer {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_TIMEOUT)
    }
}

impl SsdpDiscoverer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            target: SocketAddr::V4(SSDP_MULTICAST_ADDR),
            timeout,
        }
    }

    /// Send the search somewhere other than the multicast group (unicast gateways, tests)
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Search for a gateway and return the first response's location
    ///
    /// Fails with `DiscoveryTimeout` when nothing answers in time. The socket
    /// is dropped before this returns, whatever the outcome.
    pub async fn discover(&self) -> Result<SsdpResponse> {
        info!("Starting SSDP gateway discovery ({:?} timeout)", self.timeout);

        let socket = create_ssdp_socket()?;

        let outcome = tokio::time::timeout(self.timeout, search(&socket, self.target)).await;
        drop(socket);

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!("No SSDP response within {:?}", self.timeout);
                Err(IgdError::DiscoveryTimeout(self.timeout))
            }
        }
    }
}

async fn search(socket: &UdpSocket, target: SocketAddr) -> Result<SsdpResponse> {
    let msearch = build_msearch();
    let bytes_sent = socket.send_to(msearch.as_bytes(), target).await?;
    info!("Sent M-SEARCH for {} ({} bytes to {})", IGD_SEARCH_TARGET, bytes_sent, target);

    let mut buf = [0u8; 2048];
    let (len, from) = socket.recv_from(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf[..len]);
    info!("Received SSDP response from {} ({} bytes)", from, len);
    debug!("Response content: {}", response);

    parse_ssdp_response(&response, from)
}

/// Create a UDP socket for sending the M-SEARCH and receiving the reply
fn create_ssdp_socket() -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_reuse_address(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&addr.into())?;

    // Responses come back unicast; the TTL only bounds the multicast request
    socket.set_multicast_ttl_v4(2)?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    debug!("SSDP socket bound to: {}", socket.local_addr()?);
    Ok(socket)
}

fn build_msearch() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, SSDP_MX, IGD_SEARCH_TARGET
    )
}

/// Parse a header value from an SSDP response (case-insensitive name)
fn parse_ssdp_header(response: &str, header: &str) -> Option<String> {
    response.lines().skip(1).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(header) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

fn parse_ssdp_response(response: &str, from: SocketAddr) -> Result<SsdpResponse> {
    let location = parse_ssdp_header(response, "LOCATION")
        .filter(|l| !l.is_empty())
        .ok_or(IgdError::NoLocationHeader)?;

    Ok(SsdpResponse {
        location,
        st: parse_ssdp_header(response, "ST"),
        server: parse_ssdp_header(response, "SERVER"),
        from,
    })
}
