/// Device description parsing and WAN connection service lookup
///
/// The description is parsed into a `DeviceNode` tree first; the service
/// search is then a plain depth-first walk over that tree.

use crate::error::{IgdError, Result};
use crate::xml::{self, Element};
use natmap_core::GatewayHandle;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info};

/// WAN connection services that accept port-mapping actions, in priority order
pub const WAN_SERVICE_TYPES: [&str; 2] = [
    "urn:schemas-upnp-org:service:WANIPConnection:1",
    "urn:schemas-upnp-org:service:WANPPPConnection:1",
];

/// UPnP service entry of a device's `serviceList`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    pub service_type: String,
    pub service_id: String,
    pub control_url: String,
    pub scpd_url: String,
}

/// A `device` element with its services and embedded devices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNode {
    pub device_type: String,
    pub friendly_name: String,
    pub services: Vec<ServiceEntry>,
    pub devices: Vec<DeviceNode>,
}

impl DeviceNode {
    fn from_element(device: &Element) -> Self {
        let services = device
            .child("serviceList")
            .map(|list| {
                list.children_named("service")
                    .map(|s| ServiceEntry {
                        service_type: s.child_text("serviceType").unwrap_or_default().to_string(),
                        service_id: s.child_text("serviceId").unwrap_or_default().to_string(),
                        control_url: s.child_text("controlURL").unwrap_or_default().to_string(),
                        scpd_url: s.child_text("SCPDURL").unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let devices = device
            .child("deviceList")
            .map(|list| list.children_named("device").map(DeviceNode::from_element).collect())
            .unwrap_or_default();

        Self {
            device_type: device.child_text("deviceType").unwrap_or_default().to_string(),
            friendly_name: device.child_text("friendlyName").unwrap_or_default().to_string(),
            services,
            devices,
        }
    }

    /// First service whose type is in `types`, depth-first in document order
    ///
    /// A device's own services are checked (in `types` priority order) before
    /// any of its embedded devices.
    pub fn find_service(&self, types: &[&str]) -> Option<&ServiceEntry> {
        let mut stack = vec![self];
        while let Some(device) = stack.pop() {
            let hit = types
                .iter()
                .find_map(|t| device.services.iter().find(|s| s.service_type == *t));
            if let Some(service) = hit {
                debug!(
                    "Found {} on device {:?}",
                    service.service_type, device.friendly_name
                );
                return Some(service);
            }
            stack.extend(device.devices.iter().rev());
        }
        None
    }
}

/// A parsed root device description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub url_base: Option<String>,
    pub device: DeviceNode,
}

impl DeviceDescription {
    pub fn parse(xml_text: &str) -> Result<Self> {
        let root = xml::parse(xml_text)
            .map_err(|e| IgdError::InvalidDeviceDescription(e.to_string()))?;

        let device = root
            .child("device")
            .ok_or_else(|| IgdError::InvalidDeviceDescription("missing root device".to_string()))?;

        Ok(Self {
            url_base: root
                .child_text("URLBase")
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            device: DeviceNode::from_element(device),
        })
    }
}

/// Find the WAN connection service in a description and make its control URL absolute
pub fn resolve_service(xml_text: &str, location: &str) -> Result<GatewayHandle> {
    let description = DeviceDescription::parse(xml_text)?;

    let service = description
        .device
        .find_service(&WAN_SERVICE_TYPES)
        .ok_or(IgdError::ServiceNotFound)?;

    if service.control_url.is_empty() {
        return Err(IgdError::ControlUrlMissing);
    }

    let base = description.url_base.as_deref().unwrap_or(location);
    let control_url = resolve_url(base, &service.control_url)?;

    Ok(GatewayHandle {
        service_type: service.service_type.clone(),
        control_url,
    })
}

/// Resolve a potentially relative URL against a base URL
fn resolve_url(base: &str, url: &str) -> Result<String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(url.to_string());
    }

    let base = Url::parse(base)
        .map_err(|e| IgdError::InvalidDeviceDescription(format!("bad base URL {}: {}", base, e)))?;
    let joined = base
        .join(url)
        .map_err(|e| IgdError::InvalidDeviceDescription(format!("bad control URL {}: {}", url, e)))?;

    Ok(joined.to_string())
}

/// Fetches device descriptions over HTTP
#[derive(Debug, Clone)]
pub struct DescriptionResolver {
    client: reqwest::Client,
}

impl Default for DescriptionResolver {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl DescriptionResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Use a client with a request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(IgdError::DescriptionFetch)?;
        Ok(Self::new(client))
    }

    /// Fetch the description at `location` and resolve its WAN connection service
    pub async fn resolve(&self, location: &str) -> Result<GatewayHandle> {
        debug!("Fetching device description from: {}", location);

        let xml_text = self
            .client
            .get(location)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(IgdError::DescriptionFetch)?
            .text()
            .await
            .map_err(IgdError::DescriptionFetch)?;

        let gateway = resolve_service(&xml_text, location)?;
        info!(
            "Resolved gateway service {} at {}",
            gateway.service_type, gateway.control_url
        );
        Ok(gateway)
    }
}
