//! Transport capability interface. The dispatcher only sees [`Transport`]
//! trait objects grouped in a [`TransportSet`]; the concrete HTTP-backed
//! implementations live in [`crate::http`].

use std::sync::Arc;

use parking_lot::Mutex;

use funnelcube_core::config::TrackerConfig;
use funnelcube_core::error::TransportError;

pub const HEADER_CLIENT_ID: &str = "X-Client-ID";
pub const HEADER_CLIENT_SECRET: &str = "X-Client-Secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Unload-safe, fire-once delivery. Carries the body only.
    Beacon,
    /// Asynchronous request that keeps going through page teardown.
    AsyncHttp,
    /// Synchronous request for hosts without an async runtime.
    LegacyHttp,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Beacon => "beacon",
            TransportKind::AsyncHttp => "async_http",
            TransportKind::LegacyHttp => "legacy_http",
        }
    }
}

/// Where and as whom events are delivered. Fixed at `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

impl DeliveryTarget {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            endpoint: config.track_endpoint(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }
}

/// One event, serialised, addressed to the track endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub body: String,
}

impl DeliveryRequest {
    pub fn new(target: &DeliveryTarget, body: String) -> Self {
        Self {
            endpoint: target.endpoint.clone(),
            client_id: target.client_id.clone(),
            client_secret: target.client_secret.clone(),
            body,
        }
    }

    /// Auth headers sent by the HTTP tiers (content type is set separately).
    pub fn auth_headers(&self) -> [(&'static str, &str); 2] {
        [
            (HEADER_CLIENT_ID, self.client_id.as_str()),
            (HEADER_CLIENT_SECRET, self.client_secret.as_str()),
        ]
    }
}

/// A delivery primitive. `send` must not block on the network unless the
/// transport is the legacy tier; `Ok` means the request was handed off.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn send(&self, request: &DeliveryRequest) -> Result<(), TransportError>;
}

/// The primitives available in this environment.
#[derive(Clone, Default)]
pub struct TransportSet {
    pub beacon: Option<Arc<dyn Transport>>,
    pub async_http: Option<Arc<dyn Transport>>,
    pub legacy_http: Option<Arc<dyn Transport>>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_beacon(mut self, transport: Arc<dyn Transport>) -> Self {
        self.beacon = Some(transport);
        self
    }

    pub fn with_async_http(mut self, transport: Arc<dyn Transport>) -> Self {
        self.async_http = Some(transport);
        self
    }

    pub fn with_legacy_http(mut self, transport: Arc<dyn Transport>) -> Self {
        self.legacy_http = Some(transport);
        self
    }

    pub fn kinds(&self) -> Vec<TransportKind> {
        [&self.beacon, &self.async_http, &self.legacy_http]
            .into_iter()
            .flatten()
            .map(|t| t.kind())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.beacon.is_none() && self.async_http.is_none() && self.legacy_http.is_none()
    }
}

impl std::fmt::Debug for TransportSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// In-memory transport that records every request, for tests and dry runs.
pub struct CaptureTransport {
    kind: TransportKind,
    reject: bool,
    requests: Mutex<Vec<DeliveryRequest>>,
}

impl CaptureTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            reject: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A transport that records nothing and refuses every request, like a
    /// beacon whose queue is full.
    pub fn rejecting(kind: TransportKind) -> Self {
        Self {
            reject: true,
            ..Self::new(kind)
        }
    }

    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Parsed JSON bodies of every captured request, in send order.
    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| serde_json::from_str(&r.body).ok())
            .collect()
    }

    /// `event` field of every captured body, in send order.
    pub fn event_names(&self) -> Vec<String> {
        self.bodies()
            .iter()
            .filter_map(|b| b["event"].as_str().map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

impl Transport for CaptureTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&self, request: &DeliveryRequest) -> Result<(), TransportError> {
        if self.reject {
            return Err(TransportError::Rejected(self.kind.as_str()));
        }
        self.requests.lock().push(request.clone());
        Ok(())
    }
}
