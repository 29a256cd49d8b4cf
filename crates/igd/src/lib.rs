/// UPnP Internet Gateway Device port-mapping client
///
/// This crate provides:
/// - SSDP discovery of the gateway
/// - Device description parsing and WAN connection service lookup
/// - SOAP control (AddPortMapping, DeletePortMapping, GetExternalIPAddress,
///   GetGenericPortMappingEntry)
/// - `GatewayClient`, which caches the gateway and applies the retry and
///   enumeration policies
pub mod client;
pub mod description;
pub mod error;
pub mod net;
pub mod soap;
pub mod ssdp;
pub mod xml;

pub use client::{GatewayClient, GatewayLocator, SsdpLocator};
pub use description::{resolve_service, DescriptionResolver, DeviceDescription, DeviceNode, ServiceEntry};
pub use error::{IgdError, Result, SoapError, UpnpFault};
pub use soap::{HttpSoapTransport, SoapArgs, SoapTransport, DEFAULT_SOAP_TIMEOUT};
pub use ssdp::{SsdpDiscoverer, SsdpResponse};

pub use natmap_core::*;
