use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddrV4;
use std::str::FromStr;
use thiserror::Error;

/// Description attached to a mapping when the caller gives none
pub const DEFAULT_DESCRIPTION: &str = "natmap";

/// Lease duration used when the caller gives none (seconds, 0 = indefinite)
pub const DEFAULT_TTL_SECS: u32 = 1800;

/// The resolved WAN connection service of a gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayHandle {
    pub service_type: String,
    /// Always absolute (http or https)
    pub control_url: String,
}

/// One side (public or private) of a port mapping
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortEndpoint {
    /// `None` means unspecified (wildcard remote host, or the local address)
    #[serde(default)]
    pub host: Option<String>,
    pub port: u16,
}

impl PortEndpoint {
    pub fn new(host: Option<String>, port: u16) -> Self {
        Self {
            host: host
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
            port,
        }
    }

    /// Host as sent on the wire (empty string when unspecified)
    pub fn host_or_empty(&self) -> &str {
        self.host.as_deref().unwrap_or("")
    }
}

impl From<u16> for PortEndpoint {
    fn from(port: u16) -> Self {
        Self { host: None, port }
    }
}

impl From<SocketAddrV4> for PortEndpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            host: Some(addr.ip().to_string()),
            port: addr.port(),
        }
    }
}

impl From<(String, u16)> for PortEndpoint {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(Some(host), port)
    }
}

impl From<(&str, u16)> for PortEndpoint {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(Some(host.to_string()), port)
    }
}

/// Error type for endpoint strings that are not a port or `host:port`
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("empty endpoint")]
    Empty,
    #[error("invalid port number: {0}")]
    InvalidPort(String),
}

fn parse_port(s: &str) -> Result<u16, EndpointError> {
    s.trim()
        .parse::<u16>()
        .map_err(|_| EndpointError::InvalidPort(s.trim().to_string()))
}

impl FromStr for PortEndpoint {
    type Err = EndpointError;

    /// Accepts `"8080"` or `"192.168.1.20:8080"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }

        match s.rsplit_once(':') {
            Some((host, port)) => Ok(Self::new(Some(host.to_string()), parse_port(port)?)),
            None => Ok(Self::from(parse_port(s)?)),
        }
    }
}

impl fmt::Display for PortEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}:{}", host, self.port),
            None => write!(f, "{}", self.port),
        }
    }
}

/// Transport protocol of a mapping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Wire form used in SOAP arguments
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for invalid protocol strings
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid protocol value: {0}")]
pub struct ParseProtocolError(pub String);

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            _ => Err(ParseProtocolError(s.to_string())),
        }
    }
}

/// A request to create or delete one mapping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingRequest {
    pub public: PortEndpoint,
    pub private: PortEndpoint,
    pub protocol: Protocol,
    pub description: String,
    /// Lease duration in seconds, 0 = indefinite
    pub ttl: u32,
}

impl MappingRequest {
    /// Map `public` to the same port on this host, TCP, default description and lease
    pub fn new(public: impl Into<PortEndpoint>) -> Self {
        let public = public.into();
        let private = PortEndpoint::from(public.port);
        Self {
            public,
            private,
            protocol: Protocol::default(),
            description: DEFAULT_DESCRIPTION.to_string(),
            ttl: DEFAULT_TTL_SECS,
        }
    }

    pub fn private(mut self, private: impl Into<PortEndpoint>) -> Self {
        self.private = private.into();
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        if !description.is_empty() {
            self.description = description;
        }
        self
    }

    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }
}

/// One entry of the gateway's mapping table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub public: PortEndpoint,
    pub private: PortEndpoint,
    /// Lower-case, as reported by the gateway ("tcp", "udp")
    pub protocol: String,
    pub enabled: bool,
    pub description: String,
    pub ttl: u32,
}

impl MappingRecord {
    /// Whether this record is the mapping `request` would create or delete
    pub fn matches(&self, request: &MappingRequest) -> bool {
        self.public.port == request.public.port
            && self.protocol.eq_ignore_ascii_case(request.protocol.as_str())
    }
}
