use anyhow::{Context, Result};
use natmap_igd::{MappingRequest, PortMapper, Protocol};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// `<proto>://<ip>:<port>`
pub fn external_url(protocol: Protocol, ip: &str, port: u16) -> String {
    format!("{}://{}:{}", protocol.as_str().to_lowercase(), ip, port)
}

/// Hold a mapping until `shutdown` resolves
///
/// Maps the request, prints the external URL, re-checks the external address
/// every `recheck` and removes the mapping on the way out. Returns the last
/// external address seen.
pub async fn run_mapping<M, F>(
    mapper: &M,
    request: &MappingRequest,
    recheck: Duration,
    shutdown: F,
) -> Result<Option<String>>
where
    M: PortMapper,
    F: Future<Output = ()>,
{
    mapper
        .map_port(request)
        .await
        .with_context(|| format!("Failed to map port {}", request.public))?;
    info!("Mapped {} -> {} ({})", request.public, request.private, request.protocol);

    // The mapping exists from here on, so nothing below may return before the unmap
    let mut current = match mapper.external_ip().await {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Failed to read external IP: {}", e);
            None
        }
    };
    match &current {
        Some(ip) => println!("{}", external_url(request.protocol, ip, request.public.port)),
        None => warn!("Gateway did not report an external IP"),
    }

    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(recheck);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                match mapper.external_ip().await {
                    Ok(ip) if ip != current => {
                        info!("External IP changed: {:?} -> {:?}", current, ip);
                        if let Some(ip) = &ip {
                            println!("{}", external_url(request.protocol, ip, request.public.port));
                        }
                        current = ip;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("External IP check failed: {}", e),
                }
            }
        }
    }

    info!("Removing mapping for {}", request.public);
    mapper
        .unmap_port(request)
        .await
        .with_context(|| format!("Failed to unmap port {}", request.public))?;

    Ok(current)
}
