use crate::filter::MappingQuery;
use crate::models::{MappingRecord, MappingRequest};
use async_trait::async_trait;

/// Trait for NAT port-mapping backends (UPnP IGD today)
#[async_trait]
pub trait PortMapper: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create (or replace) a mapping on the gateway
    async fn map_port(&self, request: &MappingRequest) -> Result<(), Self::Error>;

    /// Delete a mapping from the gateway
    async fn unmap_port(&self, request: &MappingRequest) -> Result<(), Self::Error>;

    /// The gateway's external address, if it reports one
    async fn external_ip(&self) -> Result<Option<String>, Self::Error>;

    /// Enumerate the gateway's mapping table, filtered by `query`
    async fn mappings(&self, query: &MappingQuery) -> Result<Vec<MappingRecord>, Self::Error>;

    /// Forget the resolved gateway so the next call discovers again
    async fn clear_cache(&self);
}
