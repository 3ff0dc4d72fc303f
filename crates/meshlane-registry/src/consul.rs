//! Consul-compatible HTTP registry adapter.
//!
//! Speaks the agent and health endpoints of the Consul HTTP API over a
//! fresh HTTP/1.1 connection per request. Every request, connection
//! setup included, is bounded by the configured timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, trace};
use url::form_urlencoded;

use meshlane_core::config::RegistryConfig;
use meshlane_core::{CheckRecord, CheckStatus, InstanceRecord, InstanceSpec};

use crate::client::RegistryClient;
use crate::error::{RegistryError, RegistryResult};

const TOKEN_HEADER: &str = "x-consul-token";
const USER_AGENT: &str = "meshlane/0.1";

/// Registry client for a Consul agent reachable at `address`.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    address: String,
    timeout: Duration,
    token: Option<String>,
    datacenter: Option<String>,
}

impl HttpRegistry {
    /// Create a client for the agent at `address` (host:port).
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            token: None,
            datacenter: None,
        }
    }

    /// Build a client from the `[registry]` config section.
    pub fn from_config(config: &RegistryConfig) -> Self {
        let mut client = Self::new(config.address.clone(), config.timeout());
        client.token = config.token.clone();
        client.datacenter = config.datacenter.clone();
        client
    }

    /// Send an ACL token with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Scope queries to a datacenter.
    pub fn with_datacenter(mut self, dc: impl Into<String>) -> Self {
        self.datacenter = Some(dc.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Build `path?query`, appending the datacenter when configured.
    fn uri(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            query.append_pair(key, value);
        }
        if let Some(dc) = &self.datacenter {
            query.append_pair("dc", dc);
        }
        let query = query.finish();
        if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        }
    }

    /// Perform one request and return the status and full body.
    async fn send(
        &self,
        method: Method,
        uri: String,
        body: Option<Vec<u8>>,
    ) -> RegistryResult<(StatusCode, Bytes)> {
        trace!(%method, %uri, "registry request");

        let exchange = async {
            let stream = TcpStream::connect(&self.address)
                .await
                .map_err(|e| RegistryError::Transport(format!("connect {}: {e}", self.address)))?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| RegistryError::Transport(format!("handshake: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "registry connection closed with error");
                }
            });

            let mut builder = Request::builder()
                .method(method)
                .uri(&uri)
                .header(header::HOST, &self.address)
                .header(header::USER_AGENT, USER_AGENT);
            if let Some(token) = &self.token {
                builder = builder.header(TOKEN_HEADER, token);
            }
            if body.is_some() {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
            }

            let req = builder
                .body(Full::new(Bytes::from(body.unwrap_or_default())))
                .map_err(|e| RegistryError::Transport(format!("build request: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| RegistryError::Transport(format!("request: {e}")))?;

            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| RegistryError::Transport(format!("read body: {e}")))?
                .to_bytes();

            Ok::<_, RegistryError>((status, bytes))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Timeout(self.timeout)),
        }
    }

    /// PUT with no interesting response body.
    async fn put(&self, uri: String, body: Option<Vec<u8>>, what: &str) -> RegistryResult<()> {
        let (status, bytes) = self.send(Method::PUT, uri, body).await?;
        expect_success(status, &bytes, what)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn query_passing_checks(&self, service: &str) -> RegistryResult<Vec<CheckRecord>> {
        let uri = self.uri(
            &format!("/v1/health/checks/{}", segment(service)),
            &[("filter", "Status == \"passing\"")],
        );
        let (status, bytes) = self.send(Method::GET, uri, None).await?;
        expect_success(status, &bytes, &format!("service {service}"))?;

        let checks: Vec<WireCheck> = decode(&bytes)?;
        // Older agents ignore `filter`; re-apply it here.
        Ok(checks
            .into_iter()
            .map(WireCheck::into_record)
            .filter(|c| c.status == CheckStatus::Passing)
            .collect())
    }

    async fn fetch_instance(&self, service_id: &str) -> RegistryResult<InstanceRecord> {
        let uri = self.uri(&format!("/v1/agent/service/{}", segment(service_id)), &[]);
        let (status, bytes) = self.send(Method::GET, uri, None).await?;
        expect_success(status, &bytes, &format!("instance {service_id}"))?;

        let service: WireService = decode(&bytes)?;
        service.into_record()
    }

    async fn set_check_failing(&self, check_id: &str, note: &str) -> RegistryResult<()> {
        let uri = self.uri(
            &format!("/v1/agent/check/fail/{}", segment(check_id)),
            &[("note", note)],
        );
        self.put(uri, None, &format!("check {check_id}")).await
    }

    async fn set_check_passing(&self, check_id: &str, note: &str) -> RegistryResult<()> {
        let uri = self.uri(
            &format!("/v1/agent/check/pass/{}", segment(check_id)),
            &[("note", note)],
        );
        self.put(uri, None, &format!("check {check_id}")).await
    }

    async fn register_instance(&self, spec: &InstanceSpec) -> RegistryResult<()> {
        let body = serde_json::to_vec(&WireRegistration::from_spec(spec))
            .map_err(|e| RegistryError::Decode(format!("encode registration: {e}")))?;
        let uri = self.uri("/v1/agent/service/register", &[]);
        self.put(uri, Some(body), &format!("instance {}", spec.id)).await
    }

    async fn deregister_instance(&self, id: &str) -> RegistryResult<()> {
        let uri = self.uri(&format!("/v1/agent/service/deregister/{}", segment(id)), &[]);
        self.put(uri, None, &format!("instance {id}")).await
    }
}

/// Bytes escaped inside one path segment: everything outside RFC 3986
/// `pchar`, plus `/` and `%`.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

fn expect_success(status: StatusCode, body: &Bytes, what: &str) -> RegistryResult<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        return Err(RegistryError::NotFound(what.to_string()));
    }
    Err(RegistryError::Status {
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).trim().to_string(),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &Bytes) -> RegistryResult<T> {
    serde_json::from_slice(bytes).map_err(|e| RegistryError::Decode(e.to_string()))
}

// ── Wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(rename = "ServiceID", default)]
    service_id: String,
    #[serde(rename = "ServiceName", default)]
    service_name: String,
    #[serde(rename = "Status")]
    status: String,
}

impl WireCheck {
    fn into_record(self) -> CheckRecord {
        CheckRecord {
            status: CheckStatus::from_wire(&self.status),
            check_id: self.check_id,
            service_id: self.service_id,
            service_name: self.service_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port", default)]
    port: u16,
    #[serde(rename = "Meta", default)]
    meta: Option<BTreeMap<String, String>>,
}

impl WireService {
    /// An empty `Address` means "use the node's address", which the
    /// agent endpoint does not return, so such an instance cannot be
    /// dialled and is rejected.
    fn into_record(self) -> RegistryResult<InstanceRecord> {
        if self.address.trim().is_empty() {
            return Err(RegistryError::Decode(format!(
                "instance {} has no service address",
                self.id
            )));
        }
        Ok(InstanceRecord {
            id: self.id,
            service: self.service,
            address: self.address,
            port: self.port,
            meta: self.meta.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
struct WireRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Address")]
    address: &'a str,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Meta")]
    meta: &'a BTreeMap<String, String>,
    #[serde(rename = "Check")]
    check: WireCheckDefinition<'a>,
}

#[derive(Debug, Serialize)]
struct WireCheckDefinition<'a> {
    #[serde(rename = "CheckID")]
    check_id: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "Status")]
    status: &'static str,
}

impl<'a> WireRegistration<'a> {
    fn from_spec(spec: &'a InstanceSpec) -> Self {
        Self {
            id: &spec.id,
            name: &spec.name,
            address: &spec.address,
            port: spec.port,
            meta: &spec.meta,
            check: WireCheckDefinition {
                check_id: &spec.check.check_id,
                ttl: format!("{}s", spec.check.ttl.as_secs().max(1)),
                status: spec.check.status.as_str(),
            },
        }
    }
}
