/// SOAP control for the gateway's WAN connection service
///
/// Builds SOAP 1.1 envelopes for IGD actions, posts them to the control URL
/// and sorts the answer into success (the SOAP `Body`), a UPnP fault with
/// code and description, a fault without detail, or a transport failure.

use crate::error::{SoapError, UpnpFault};
use crate::xml::{self, Element};
use async_trait::async_trait;
use natmap_core::GatewayHandle;
use std::time::Duration;
use tracing::{debug, warn};

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SOAP_ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// HTTP timeout for SOAP calls unless the caller brings its own client
pub const DEFAULT_SOAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Action arguments in wire order
pub type SoapArgs = Vec<(&'static str, String)>;

/// Something that can run an IGD action against a gateway
#[async_trait]
pub trait SoapTransport: Send + Sync {
    /// Invoke `action` and return the SOAP `Body` element of the response
    async fn invoke(
        &self,
        gateway: &GatewayHandle,
        action: &str,
        args: &[(&'static str, String)],
    ) -> Result<Element, SoapError>;
}

/// SOAP over HTTP POST with reqwest
#[derive(Debug, Clone)]
pub struct HttpSoapTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl Default for HttpSoapTransport {
    fn default() -> Self {
        match reqwest::Client::builder().timeout(DEFAULT_SOAP_TIMEOUT).build() {
            Ok(client) => Self {
                client,
                timeout: Some(DEFAULT_SOAP_TIMEOUT),
            },
            Err(e) => {
                warn!("Failed to build SOAP client with timeout, using defaults: {}", e);
                Self::new(reqwest::Client::new())
            }
        }
    }
}

impl HttpSoapTransport {
    /// Use `client` as is; its own timeout settings apply
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, SoapError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            timeout: Some(timeout),
        })
    }

    /// Request timeout, when this transport configured one
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl SoapTransport for HttpSoapTransport {
    async fn invoke(
        &self,
        gateway: &GatewayHandle,
        action: &str,
        args: &[(&'static str, String)],
    ) -> Result<Element, SoapError> {
        let body = build_envelope(&gateway.service_type, action, args);
        let soap_action = format!("\"{}#{}\"", gateway.service_type, action);

        debug!("Sending SOAP action: {}", soap_action);
        debug!("To URL: {}", gateway.control_url);
        debug!("Body: {}", body);

        let response = self
            .client
            .post(&gateway.control_url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPAction", soap_action)
            .body(body)
            .send()
            .await?;

        // Faults come back as HTTP 500, so the body is read whatever the status
        let status = response.status();
        let response_text = response.text().await?;
        debug!("SOAP response ({}): {}", status, response_text);

        classify_response(&response_text)
    }
}

/// Build the SOAP envelope for `action`, escaping argument values
pub fn build_envelope(service_type: &str, action: &str, args: &[(&'static str, String)]) -> String {
    let arguments: String = args
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", xml::escape(value)))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="{}" s:encodingStyle="{}">
  <s:Body>
    <u:{action} xmlns:u="{}">{arguments}</u:{action}>
  </s:Body>
</s:Envelope>"#,
        SOAP_ENVELOPE_NS,
        SOAP_ENCODING_STYLE,
        xml::escape(service_type),
    )
}

/// Turn a response body into the SOAP `Body` element or a fault
pub fn classify_response(text: &str) -> Result<Element, SoapError> {
    let envelope = xml::parse(text).map_err(|e| SoapError::InvalidResponse(e.to_string()))?;

    if let Some(fault) = envelope.find_ns(SOAP_ENVELOPE_NS, "Fault") {
        return Err(match fault.find("UPnPError") {
            Some(detail) => SoapError::Fault(UpnpFault {
                code: detail.child_text("errorCode").unwrap_or_default().to_string(),
                description: detail
                    .child_text("errorDescription")
                    .unwrap_or_default()
                    .to_string(),
            }),
            None => SoapError::GenericFault {
                fault_string: fault.child_text("faultstring").unwrap_or_default().to_string(),
            },
        });
    }

    envelope
        .find_ns(SOAP_ENVELOPE_NS, "Body")
        .cloned()
        .ok_or_else(|| SoapError::InvalidResponse("missing SOAP Body".to_string()))
}
