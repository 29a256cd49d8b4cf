//! Mock Internet Gateway Device for integration tests
//!
//! Serves a device description and a WANIPConnection control endpoint over
//! HTTP (axum), keeps a mapping table in memory and records every action it
//! receives. A loopback UDP responder stands in for SSDP.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use natmap_igd::xml;
use natmap_igd::{DescriptionResolver, GatewayHandle, GatewayLocator, MappingRecord, PortEndpoint};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub const WAN_IP_SERVICE: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

/// Mutable gateway state shared with the HTTP handlers
#[derive(Debug, Default)]
pub struct GatewayState {
    pub mappings: Vec<MappingRecord>,
    /// Action names in the order they arrived
    pub calls: Vec<String>,
    /// Index of the first mapping entry (0 on most gateways, 1 on some)
    pub first_index: u32,
    /// Answer the next AddPortMapping with error 718
    pub conflict_once: bool,
    /// Answer every AddPortMapping with this UPnP error code
    pub add_error: Option<String>,
    pub external_ip: Option<String>,
    /// Answer SOAP calls with a fault that has no UPnP detail
    pub generic_fault: bool,
    /// Stall every SOAP answer this long
    pub delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MockState {
    inner: Arc<Mutex<GatewayState>>,
}

impl MockState {
    pub fn with<R>(&self, f: impl FnOnce(&mut GatewayState) -> R) -> R {
        let mut state = self.inner.lock().unwrap();
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, action: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.as_str() == action).count())
    }
}

/// A running mock gateway
pub struct MockGateway {
    pub addr: SocketAddr,
    pub state: MockState,
    handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Self {
        let state = MockState::default();
        state.with(|s| s.external_ip = Some("1.2.3.4".to_string()));

        let app = Router::new()
            .route("/rootDesc.xml", get(description))
            .route("/ctl/IPConn", post(control))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, handle }
    }

    pub fn location(&self) -> String {
        format!("http://{}/rootDesc.xml", self.addr)
    }

    pub fn control_url(&self) -> String {
        format!("http://{}/ctl/IPConn", self.addr)
    }

    pub fn add_mapping(&self, port: u16, host: &str, description: &str) {
        self.state.with(|s| {
            s.mappings.push(MappingRecord {
                public: PortEndpoint::from(port),
                private: PortEndpoint::from((host, port)),
                protocol: "tcp".to_string(),
                enabled: true,
                description: description.to_string(),
                ttl: 0,
            })
        });
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn description() -> Response {
    let xml = format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>
    <friendlyName>Mock Router</friendlyName>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:Layer3Forwarding:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:L3Forwarding1</serviceId>
        <controlURL>/ctl/L3F</controlURL>
        <SCPDURL>/L3F.xml</SCPDURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
        <deviceList>
          <device>
            <deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:1</deviceType>
            <serviceList>
              <service>
                <serviceType>{}</serviceType>
                <serviceId>urn:upnp-org:serviceId:WANIPConn1</serviceId>
                <controlURL>/ctl/IPConn</controlURL>
                <SCPDURL>/WANIPCn.xml</SCPDURL>
              </service>
            </serviceList>
          </device>
        </deviceList>
      </device>
    </deviceList>
  </device>
</root>"#,
        WAN_IP_SERVICE
    );

    ([(header::CONTENT_TYPE, "text/xml")], xml).into_response()
}

fn envelope(inner: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>{}</s:Body>
</s:Envelope>"#,
        inner
    )
}

fn ok(action: &str, fields: &[(&str, String)]) -> Response {
    let fields: String = fields
        .iter()
        .map(|(k, v)| format!("<{k}>{v}</{k}>"))
        .collect();
    let body = envelope(&format!(
        r#"<u:{action}Response xmlns:u="{WAN_IP_SERVICE}">{fields}</u:{action}Response>"#
    ));
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn upnp_fault(code: &str, description: &str) -> Response {
    let body = envelope(&format!(
        r#"<s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring>
<detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>{code}</errorCode><errorDescription>{description}</errorDescription></UPnPError></detail>
</s:Fault>"#
    ));
    (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn generic_fault() -> Response {
    let body = envelope("<s:Fault><faultcode>s:Server</faultcode><faultstring>Internal Error</faultstring></s:Fault>");
    (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

async fn control(State(state): State<MockState>, headers: HeaderMap, body: String) -> Response {
    let soap_action = headers
        .get("SOAPAction")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim_matches('"')
        .to_string();
    let Some((service, action)) = soap_action.split_once('#') else {
        return (StatusCode::BAD_REQUEST, "missing SOAPAction").into_response();
    };
    assert_eq!(service, WAN_IP_SERVICE);

    if let Some(delay) = state.with(|s| s.delay) {
        tokio::time::sleep(delay).await;
    }

    let envelope = xml::parse(&body).expect("request envelope is well-formed");
    let request = envelope.find(action).expect("action element present").clone();
    let arg = |name: &str| request.child_text(name).unwrap_or_default().to_string();

    state.with(|s| {
        s.calls.push(action.to_string());

        if s.generic_fault {
            return generic_fault();
        }

        match action {
            "AddPortMapping" => {
                if s.conflict_once {
                    s.conflict_once = false;
                    return upnp_fault("718", "ConflictInMappingEntry");
                }
                if let Some(code) = &s.add_error {
                    return upnp_fault(code, "ActionFailed");
                }

                let port: u16 = arg("NewExternalPort").parse().unwrap();
                let protocol = arg("NewProtocol").to_lowercase();
                s.mappings
                    .retain(|m| !(m.public.port == port && m.protocol == protocol));
                s.mappings.push(MappingRecord {
                    public: PortEndpoint::new(Some(arg("NewRemoteHost")), port),
                    private: PortEndpoint::new(
                        Some(arg("NewInternalClient")),
                        arg("NewInternalPort").parse().unwrap(),
                    ),
                    protocol,
                    enabled: arg("NewEnabled") == "1",
                    description: arg("NewPortMappingDescription"),
                    ttl: arg("NewLeaseDuration").parse().unwrap(),
                });
                ok(action, &[])
            }
            "DeletePortMapping" => {
                let port: u16 = arg("NewExternalPort").parse().unwrap();
                let protocol = arg("NewProtocol").to_lowercase();
                let before = s.mappings.len();
                s.mappings
                    .retain(|m| !(m.public.port == port && m.protocol == protocol));
                if s.mappings.len() == before {
                    return upnp_fault("714", "NoSuchEntryInArray");
                }
                ok(action, &[])
            }
            "GetExternalIPAddress" => match &s.external_ip {
                Some(ip) => ok(action, &[("NewExternalIPAddress", ip.clone())]),
                None => ok(action, &[]),
            },
            "GetGenericPortMappingEntry" => {
                let index: u32 = arg("NewPortMappingIndex").parse().unwrap();
                let entry = index
                    .checked_sub(s.first_index)
                    .and_then(|i| s.mappings.get(i as usize));
                match entry {
                    Some(m) => ok(
                        action,
                        &[
                            ("NewRemoteHost", m.public.host_or_empty().to_string()),
                            ("NewExternalPort", m.public.port.to_string()),
                            ("NewProtocol", m.protocol.to_uppercase()),
                            ("NewInternalPort", m.private.port.to_string()),
                            ("NewInternalClient", m.private.host_or_empty().to_string()),
                            ("NewEnabled", if m.enabled { "1" } else { "0" }.to_string()),
                            ("NewPortMappingDescription", m.description.clone()),
                            ("NewLeaseDuration", m.ttl.to_string()),
                        ],
                    ),
                    None => upnp_fault("713", "SpecifiedArrayIndexInvalid"),
                }
            }
            _ => upnp_fault("401", "Invalid Action"),
        }
    })
}

/// Locator that skips SSDP and resolves the mock's description directly
pub struct DirectLocator {
    location: String,
    resolver: DescriptionResolver,
    pub lookups: Arc<AtomicUsize>,
}

impl DirectLocator {
    pub fn new(location: String) -> Self {
        Self {
            location,
            resolver: DescriptionResolver::default(),
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl GatewayLocator for DirectLocator {
    async fn locate(&self) -> natmap_igd::Result<GatewayHandle> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.resolver.resolve(&self.location).await
    }
}

/// Loopback stand-in for the SSDP multicast group
///
/// Answers every M-SEARCH with `reply` (when set) and counts searches.
pub struct SsdpResponder {
    pub addr: SocketAddr,
    pub searches: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl SsdpResponder {
    pub async fn start(reply: Option<String>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let searches = Arc::new(AtomicUsize::new(0));

        let counter = searches.clone();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let request = String::from_utf8_lossy(&buf[..len]).to_string();
                if !request.starts_with("M-SEARCH * HTTP/1.1") {
                    continue;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(reply) = &reply {
                    let _ = socket.send_to(reply.as_bytes(), from).await;
                }
            }
        });

        Self {
            addr,
            searches,
            handle,
        }
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

impl Drop for SsdpResponder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An SSDP search response pointing at `location`
pub fn ssdp_reply(location: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age=120\r\n\
         ST: urn:schemas-upnp-org:device:InternetGatewayDevice:1\r\n\
         USN: uuid:mock-igd::urn:schemas-upnp-org:device:InternetGatewayDevice:1\r\n\
         EXT:\r\n\
         SERVER: MockOS/1.0 UPnP/1.1 MockIGD/1.0\r\n\
         Location: {}\r\n\
         \r\n",
        location
    )
}
