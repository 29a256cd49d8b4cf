//! Error types for gateway discovery and control

use std::time::Duration;
use thiserror::Error;

/// UPnP error code for "ConflictInMappingEntry"
pub const UPNP_CONFLICT_IN_MAPPING_ENTRY: &str = "718";

/// The `UPnPError` detail of a SOAP fault
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpnpFault {
    pub code: String,
    pub description: String,
}

impl std::fmt::Display for UpnpFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.description)
    }
}

/// Outcome of a SOAP action that did not succeed
#[derive(Debug, Error)]
pub enum SoapError {
    /// The gateway answered with a SOAP fault carrying UPnP detail
    #[error("service error: {0}")]
    Fault(UpnpFault),

    /// The gateway answered with a SOAP fault without UPnP detail
    #[error("SOAP fault: {fault_string}")]
    GenericFault { fault_string: String },

    #[error("SOAP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid SOAP response: {0}")]
    InvalidResponse(String),
}

impl SoapError {
    /// The UPnP error code, when the gateway gave one
    pub fn upnp_code(&self) -> Option<&str> {
        match self {
            SoapError::Fault(fault) => Some(fault.code.as_str()),
            _ => None,
        }
    }
}

/// Errors surfaced by the gateway client
#[derive(Debug, Error)]
pub enum IgdError {
    #[error("no SSDP response within {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("SSDP socket error: {0}")]
    DiscoveryTransport(#[from] std::io::Error),

    #[error("SSDP response has no LOCATION header")]
    NoLocationHeader,

    #[error("failed to fetch device description: {0}")]
    DescriptionFetch(#[source] reqwest::Error),

    #[error("invalid device description: {0}")]
    InvalidDeviceDescription(String),

    #[error("no WAN connection service found in device description")]
    ServiceNotFound,

    #[error("WAN connection service has no control URL")]
    ControlUrlMissing,

    #[error(transparent)]
    Soap(#[from] SoapError),

    #[error("mapping enumeration failed: {0}")]
    Enumeration(String),

    #[error("no usable local IPv4 address: {0}")]
    LocalAddress(String),
}

impl IgdError {
    /// The UPnP error code of a SOAP fault, if this is one
    pub fn upnp_code(&self) -> Option<&str> {
        match self {
            IgdError::Soap(soap) => soap.upnp_code(),
            _ => None,
        }
    }

    /// Whether the gateway refused because a conflicting entry exists
    pub fn is_conflict(&self) -> bool {
        self.upnp_code() == Some(UPNP_CONFLICT_IN_MAPPING_ENTRY)
    }
}

pub type Result<T> = std::result::Result<T, IgdError>;
