//! Request Forwarder
//!
//! Relays request primitives whose target lives on another node of the
//! federation. The peer's registration record supplies its transport
//! addresses; the first registered address carries the request. The caller
//! always gets a response primitive back, so forwarding failures surface as
//! error responses rather than transport panics in the request path.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::addressing::{CseIdentity, TargetScope};
use crate::domain::ResourceStore;
use crate::error::{Error, Result};
use crate::metrics;
use crate::primitive::{Operation, RequestPrimitive, ResponsePrimitive, StatusCode};

/// Protocol release version stamped on relayed requests that carry none.
pub const DEFAULT_RELEASE_VERSION: &str = "2a";

// =============================================================================
// Forwarder
// =============================================================================

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct Forwarder {
    store: Arc<dyn ResourceStore>,
    identity: CseIdentity,
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        identity: CseIdentity,
        config: ForwarderConfig,
    ) -> Self {
        Self {
            store,
            identity,
            client: reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Relay a request whose resolved target is non-local. `peer_path` is the
    /// resolver's output: a peer-relative or absolute address.
    pub async fn forward(&self, req: &RequestPrimitive, peer_path: &str) -> ResponsePrimitive {
        match self.forward_inner(req, peer_path).await {
            Ok(response) => {
                metrics::FORWARDS_TOTAL.with_label_values(&["relayed"]).inc();
                response
            }
            Err(e) => {
                metrics::FORWARDS_TOTAL.with_label_values(&["failed"]).inc();
                warn!(target = %peer_path, error = %e, "forwarding failed");
                let status = match e {
                    Error::NotFound(_) => StatusCode::NotFound,
                    Error::NotImplemented(_) => StatusCode::NotImplemented,
                    _ => StatusCode::InternalServerError,
                };
                ResponsePrimitive::error(status, &req.request_id, e.to_string())
            }
        }
    }

    async fn forward_inner(
        &self,
        req: &RequestPrimitive,
        peer_path: &str,
    ) -> Result<ResponsePrimitive> {
        let peer_id = extract_peer_id(peer_path).ok_or_else(|| {
            Error::BadRequest(format!("cannot determine the peer for {}", peer_path))
        })?;

        let record = self
            .store
            .peer_record(&peer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no registration found for {}", peer_id)))?;

        let address = record.addresses.first().ok_or_else(|| {
            Error::BadRequest(format!("registration of {} carries no address", peer_id))
        })?;

        let originator = rewrite_originator(&req.originator, peer_path, &self.identity);

        if address.starts_with("http://") || address.starts_with("https://") {
            self.relay_http(req, peer_path, address, &originator).await
        } else if address.starts_with("mqtt://") {
            Err(Error::NotImplemented(format!(
                "mqtt relay to {} is not supported",
                peer_id
            )))
        } else {
            Err(Error::Forwarding(format!(
                "unsupported transport address {} registered by {}",
                address, peer_id
            )))
        }
    }

    async fn relay_http(
        &self,
        req: &RequestPrimitive,
        peer_path: &str,
        address: &str,
        originator: &str,
    ) -> Result<ResponsePrimitive> {
        // The peer serves its own tree, so the request line carries only the
        // cse-relative remainder of the target
        let url = format!(
            "{}{}",
            address.trim_end_matches('/'),
            peer_relative_path(peer_path)
        );
        let rvi = req
            .release_version
            .clone()
            .unwrap_or_else(|| DEFAULT_RELEASE_VERSION.to_string());

        debug!(url = %url, op = %req.operation, "relaying request");

        let mut builder = self
            .client
            .request(verb_for(req.operation), &url)
            .header("X-M2M-RI", format!("forwarding_{}", req.request_id))
            .header("X-M2M-Origin", originator)
            .header("X-M2M-RVI", &rvi)
            .header("Accept", "application/json");

        builder = match req.operation {
            Operation::Create => {
                let ty = req.resource_type.map(|t| t.code()).unwrap_or_default();
                builder.header("Content-Type", format!("application/json;ty={}", ty))
            }
            Operation::Update | Operation::Notify => {
                builder.header("Content-Type", "application/json")
            }
            Operation::Retrieve | Operation::Delete => builder,
        };

        if matches!(
            req.operation,
            Operation::Create | Operation::Update | Operation::Notify
        ) {
            if let Some(ref payload) = req.payload {
                builder = builder.json(payload);
            }
        }

        let response = builder.send().await.map_err(|e| {
            Error::Forwarding(format!("transport to {} failed: {}", peer_path, e))
        })?;

        Ok(map_relay_response(req, response).await)
    }
}

/// Map a relayed http response back into a response primitive. The peer's
/// headers win; the http status serves as a fallback.
async fn map_relay_response(
    req: &RequestPrimitive,
    response: reqwest::Response,
) -> ResponsePrimitive {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let status = header("x-m2m-rsc")
        .and_then(|v| v.parse::<u16>().ok())
        .and_then(StatusCode::from_code)
        .unwrap_or(if response.status().is_success() {
            StatusCode::Ok
        } else {
            StatusCode::InternalServerError
        });
    let request_id = header("x-m2m-ri").unwrap_or_else(|| req.request_id.clone());
    let release_version = header("x-m2m-rvi").or_else(|| req.release_version.clone());

    let payload = response.json::<Value>().await.ok();

    ResponsePrimitive {
        status,
        request_id,
        release_version,
        payload,
        source: None,
    }
}

/// Http verb carrying each operation on the wire.
pub fn verb_for(operation: Operation) -> Method {
    match operation {
        Operation::Create | Operation::Notify => Method::POST,
        Operation::Retrieve => Method::GET,
        Operation::Update => Method::PUT,
        Operation::Delete => Method::DELETE,
    }
}

/// Target path as the peer itself addresses it: the provider and peer id
/// segments are stripped, leaving the path below the peer's root.
pub fn peer_relative_path(peer_path: &str) -> String {
    let skip = match TargetScope::of(peer_path) {
        TargetScope::Absolute => 2,
        TargetScope::PeerRelative => 1,
        TargetScope::LocalRelative => 0,
    };
    let rest: Vec<&str> = peer_path
        .split('/')
        .filter(|s| !s.is_empty())
        .skip(skip)
        .collect();
    format!("/{}", rest.join("/"))
}

/// Extract the peer id (with its leading `/`) from a resolver output path.
pub fn extract_peer_id(peer_path: &str) -> Option<String> {
    let segments: Vec<&str> = peer_path.split('/').filter(|s| !s.is_empty()).collect();
    match TargetScope::of(peer_path) {
        // `//provider/peer/...`: the provider segment comes first
        TargetScope::Absolute => segments.get(1).map(|s| format!("/{}", s)),
        TargetScope::PeerRelative => segments.first().map(|s| format!("/{}", s)),
        TargetScope::LocalRelative => None,
    }
}

/// Qualify a node-relative originator before it leaves this node. Marker
/// `C` gets the local node id prefix; marker `S` gets the provider prefix.
/// Already-qualified originators pass through unchanged.
pub fn rewrite_originator(originator: &str, peer_path: &str, identity: &CseIdentity) -> String {
    if originator.starts_with('/') {
        return originator.to_string();
    }
    match originator.chars().next() {
        Some('C') => match TargetScope::of(peer_path) {
            TargetScope::Absolute => {
                format!("{}{}/{}", identity.sp_id, identity.cse_id, originator)
            }
            _ => format!("{}/{}", identity.cse_id, originator),
        },
        Some('S') => format!("{}/{}", identity.sp_id, originator),
        _ => originator.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
