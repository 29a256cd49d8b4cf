/// Gateway client: discovery cache plus the port-mapping operations
///
/// The first operation runs SSDP discovery and resolves the WAN connection
/// service; the resulting `GatewayHandle` is cached and reused until
/// `clear_cache` is called. A stale handle is never replaced behind the
/// caller's back: it shows up as a SOAP or transport error instead.

use crate::description::DescriptionResolver;
use crate::error::{IgdError, Result};
use crate::net;
use crate::soap::{HttpSoapTransport, SoapArgs, SoapTransport};
use crate::ssdp::{SsdpDiscoverer, DEFAULT_DISCOVERY_TIMEOUT};
use crate::xml::Element;
use async_trait::async_trait;
use natmap_core::{
    apply_query, GatewayHandle, MappingQuery, MappingRecord, MappingRequest, PortEndpoint,
    PortMapper,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// Gateways that never report the end of their table would otherwise loop forever
const MAX_MAPPING_ENTRIES: u32 = 4096;

/// Finds the gateway's WAN connection service
#[async_trait]
pub trait GatewayLocator: Send + Sync {
    async fn locate(&self) -> Result<GatewayHandle>;
}

/// SSDP discovery followed by device description resolution
#[derive(Debug, Clone, Default)]
pub struct SsdpLocator {
    discoverer: SsdpDiscoverer,
    resolver: DescriptionResolver,
}

impl SsdpLocator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            discoverer: SsdpDiscoverer::new(timeout),
            resolver: DescriptionResolver::default(),
        }
    }

    pub fn with_discoverer(mut self, discoverer: SsdpDiscoverer) -> Self {
        self.discoverer = discoverer;
        self
    }

    pub fn with_resolver(mut self, resolver: DescriptionResolver) -> Self {
        self.resolver = resolver;
        self
    }
}

#[async_trait]
impl GatewayLocator for SsdpLocator {
    async fn locate(&self) -> Result<GatewayHandle> {
        let response = self.discoverer.discover().await?;
        info!("Found gateway at {} ({})", response.location, response.from);
        self.resolver.resolve(&response.location).await
    }
}

/// UPnP IGD port-mapping client for a single gateway
pub struct GatewayClient {
    gateway: RwLock<Option<GatewayHandle>>,
    locator: Arc<dyn GatewayLocator>,
    transport: Arc<dyn SoapTransport>,
    local_address: Option<Ipv4Addr>,
}

impl Default for GatewayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayClient {
    /// Client with the default 3 s discovery timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_DISCOVERY_TIMEOUT)
    }

    /// Client whose SSDP search waits `timeout` for an answer
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            gateway: RwLock::new(None),
            locator: Arc::new(SsdpLocator::new(timeout)),
            transport: Arc::new(HttpSoapTransport::default()),
            local_address: None,
        }
    }

    /// Replace how the gateway is found
    pub fn with_locator(mut self, locator: impl GatewayLocator + 'static) -> Self {
        self.locator = Arc::new(locator);
        self
    }

    /// Replace how SOAP actions are sent
    pub fn with_transport(mut self, transport: impl SoapTransport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Use `addr` instead of autodetecting this host's address
    pub fn with_local_address(mut self, addr: Ipv4Addr) -> Self {
        self.local_address = Some(addr);
        self
    }

    /// Forget the cached gateway
    pub async fn clear_cache(&self) {
        *self.gateway.write().await = None;
    }

    /// The cached gateway, or a freshly discovered one
    pub async fn resolve_gateway(&self) -> Result<GatewayHandle> {
        let cached = self.gateway.read().await.clone();
        if let Some(gateway) = cached {
            return Ok(gateway);
        }

        let gateway = self.locator.locate().await?;
        *self.gateway.write().await = Some(gateway.clone());
        Ok(gateway)
    }

    fn local_address(&self) -> Result<Ipv4Addr> {
        match self.local_address {
            Some(addr) => Ok(addr),
            None => net::local_ipv4(),
        }
    }

    async fn run(&self, action: &str, args: &[(&'static str, String)]) -> Result<Element> {
        let gateway = self.resolve_gateway().await?;
        Ok(self.transport.invoke(&gateway, action, args).await?)
    }

    /// Create a mapping, replacing a conflicting one (UPnP error 718) once
    pub async fn map_port(&self, request: &MappingRequest) -> Result<()> {
        self.resolve_gateway().await?;

        let internal_client = match &request.private.host {
            Some(host) => host.clone(),
            None => self.local_address()?.to_string(),
        };

        let args: SoapArgs = vec![
            ("NewRemoteHost", request.public.host_or_empty().to_string()),
            ("NewExternalPort", request.public.port.to_string()),
            ("NewProtocol", request.protocol.as_str().to_string()),
            ("NewInternalPort", request.private.port.to_string()),
            ("NewInternalClient", internal_client),
            ("NewEnabled", "1".to_string()),
            ("NewPortMappingDescription", request.description.clone()),
            ("NewLeaseDuration", request.ttl.to_string()),
        ];

        match self.run("AddPortMapping", &args).await {
            Err(e) if e.is_conflict() => {
                warn!(
                    "Mapping {}/{} conflicts with an existing entry, replacing it",
                    request.public, request.protocol
                );
                if let Err(e) = self.unmap_port(request).await {
                    debug!("Removing the conflicting mapping failed: {}", e);
                }
                self.run("AddPortMapping", &args).await?;
            }
            result => {
                result?;
            }
        }

        info!(
            "Mapped {}/{} -> {}:{} ({}s)",
            request.public,
            request.protocol,
            args[4].1,
            request.private.port,
            request.ttl
        );
        Ok(())
    }

    /// Delete a mapping
    pub async fn unmap_port(&self, request: &MappingRequest) -> Result<()> {
        let args: SoapArgs = vec![
            ("NewRemoteHost", request.public.host_or_empty().to_string()),
            ("NewExternalPort", request.public.port.to_string()),
            ("NewProtocol", request.protocol.as_str().to_string()),
        ];

        self.run("DeletePortMapping", &args).await?;
        info!("Unmapped {}/{}", request.public, request.protocol);
        Ok(())
    }

    /// The gateway's external address, `None` when the response has none
    pub async fn external_ip(&self) -> Result<Option<String>> {
        let body = self.run("GetExternalIPAddress", &[]).await?;
        Ok(body.find("NewExternalIPAddress").map(|e| e.text.clone()))
    }

    /// Enumerate the mapping table and apply `query`
    ///
    /// Failures during enumeration end the list instead of failing the call.
    pub async fn mappings(&self, query: &MappingQuery) -> Result<Vec<MappingRecord>> {
        let gateway = self.resolve_gateway().await?;
        let records = self.enumerate(&gateway).await;

        let detected = if query.needs_local_address() {
            match self.local_address() {
                Ok(addr) => Some(IpAddr::V4(addr)),
                Err(e) => {
                    warn!("Cannot filter mappings by local address: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(apply_query(records, query, detected))
    }

    async fn enumerate(&self, gateway: &GatewayHandle) -> Vec<MappingRecord> {
        let mut records = Vec::new();

        for index in 0..MAX_MAPPING_ENTRIES {
            let args: SoapArgs = vec![("NewPortMappingIndex", index.to_string())];
            let entry = self
                .transport
                .invoke(gateway, "GetGenericPortMappingEntry", &args)
                .await
                .map_err(IgdError::from)
                .and_then(|body| parse_mapping_entry(&body));

            match entry {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    debug!("Entry {} is not a GetGenericPortMappingEntryResponse", index);
                    break;
                }
                // Some gateways number their entries from 1
                Err(e) if index == 0 => {
                    debug!("Entry 0 failed ({}), retrying from 1", e);
                }
                Err(e) => {
                    debug!("Mapping enumeration ended at entry {}: {}", index, e);
                    break;
                }
            }
        }

        debug!("Enumerated {} mapping(s)", records.len());
        records
    }
}

/// Parse one `GetGenericPortMappingEntry` response body
///
/// `Ok(None)` when the body does not hold that response at all.
fn parse_mapping_entry(body: &Element) -> Result<Option<MappingRecord>> {
    let Some(entry) = body
        .first_child()
        .filter(|e| e.name == "GetGenericPortMappingEntryResponse")
    else {
        return Ok(None);
    };

    let text = |name: &str| entry.child_text(name).unwrap_or_default().to_string();
    let port = |name: &str| {
        let value = text(name);
        value
            .parse::<u16>()
            .map_err(|_| IgdError::Enumeration(format!("invalid {}: {:?}", name, value)))
    };

    let lease = text("NewLeaseDuration");
    let lease = lease
        .parse::<u32>()
        .map_err(|_| IgdError::Enumeration(format!("invalid NewLeaseDuration: {:?}", lease)))?;

    Ok(Some(MappingRecord {
        public: PortEndpoint::new(Some(text("NewRemoteHost")), port("NewExternalPort")?),
        private: PortEndpoint::new(Some(text("NewInternalClient")), port("NewInternalPort")?),
        protocol: text("NewProtocol").to_lowercase(),
        enabled: text("NewEnabled") == "1",
        description: text("NewPortMappingDescription"),
        ttl: lease,
    }))
}

#[async_trait]
impl PortMapper for GatewayClient {
    type Error = IgdError;

    async fn map_port(&self, request: &MappingRequest) -> Result<()> {
        GatewayClient::map_port(self, request).await
    }

    async fn unmap_port(&self, request: &MappingRequest) -> Result<()> {
        GatewayClient::unmap_port(self, request).await
    }

    async fn external_ip(&self) -> Result<Option<String>> {
        GatewayClient::external_ip(self).await
    }

    async fn mappings(&self, query: &MappingQuery) -> Result<Vec<MappingRecord>> {
        GatewayClient::mappings(self, query).await
    }

    async fn clear_cache(&self) {
        GatewayClient::clear_cache(self).await
    }
}
