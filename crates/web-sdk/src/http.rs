//! HTTP-backed transports and capability detection.
//!
//! - [`BeaconTransport`]: bounded hand-off queue drained by a background task,
//!   so enqueueing survives the caller going away. Body only, no auth headers.
//! - [`KeepaliveTransport`]: one spawned async request per event, with auth
//!   headers. Results are logged, never awaited by the caller.
//! - [`LegacyHttpTransport`]: blocking request for hosts with no async runtime.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

use funnelcube_core::config::DispatchConfig;
use funnelcube_core::error::{TrackerResult, TransportError};

use crate::transport::{DeliveryRequest, Transport, TransportKind, TransportSet};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Check the environment once and build the transports it supports: inside
/// a tokio runtime, beacon + keepalive; otherwise the blocking legacy tier.
pub fn detect_transports(dispatch: &DispatchConfig) -> TrackerResult<TransportSet> {
    let timeout = Duration::from_millis(dispatch.request_timeout_ms);
    match Handle::try_current() {
        Ok(handle) => {
            let beacon = BeaconTransport::spawn(&handle, dispatch.beacon_queue_capacity, timeout)?;
            let keepalive = KeepaliveTransport::new(handle, timeout)?;
            info!("async runtime detected; using beacon and keepalive transports");
            Ok(TransportSet::new()
                .with_beacon(std::sync::Arc::new(beacon))
                .with_async_http(std::sync::Arc::new(keepalive)))
        }
        Err(_) => {
            let legacy = LegacyHttpTransport::new(timeout)?;
            info!("no async runtime; using blocking legacy transport");
            Ok(TransportSet::new().with_legacy_http(std::sync::Arc::new(legacy)))
        }
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    TransportError::Request(e.to_string())
}

fn record_failure(kind: TransportKind, error: &TransportError) {
    metrics::counter!("tracker.transport_errors").increment(1);
    debug!(transport = kind.as_str(), error = %error, "event delivery failed");
}

// ─── Beacon ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct BeaconPayload {
    endpoint: String,
    body: String,
}

pub struct BeaconTransport {
    sender: mpsc::Sender<BeaconPayload>,
}

impl BeaconTransport {
    /// Start the background sender on `runtime`. At most `capacity` payloads
    /// wait in the queue; beyond that `send` reports a rejection.
    pub fn spawn(runtime: &Handle, capacity: usize, timeout: Duration) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(request_error)?;
        let (sender, mut receiver) = mpsc::channel::<BeaconPayload>(capacity.max(1));

        runtime.spawn(async move {
            while let Some(payload) = receiver.recv().await {
                let result = client
                    .post(&payload.endpoint)
                    .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                    .body(payload.body)
                    .send()
                    .await;
                match result {
                    Ok(response) if response.status().is_success() => {
                        metrics::counter!("tracker.events_sent").increment(1);
                    }
                    Ok(response) => record_failure(
                        TransportKind::Beacon,
                        &TransportError::Status(response.status().as_u16()),
                    ),
                    Err(e) => record_failure(TransportKind::Beacon, &request_error(e)),
                }
            }
            debug!("beacon queue closed");
        });

        Ok(Self { sender })
    }
}

impl Transport for BeaconTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Beacon
    }

    fn send(&self, request: &DeliveryRequest) -> Result<(), TransportError> {
        let payload = BeaconPayload {
            endpoint: request.endpoint.clone(),
            body: request.body.clone(),
        };
        self.sender.try_send(payload).map_err(|e| {
            debug!(error = %e, "beacon payload not enqueued");
            TransportError::Rejected(TransportKind::Beacon.as_str())
        })
    }
}

// ─── Keepalive ──────────────────────────────────────────────────────────────

pub struct KeepaliveTransport {
    client: reqwest::Client,
    runtime: Handle,
}

impl KeepaliveTransport {
    pub fn new(runtime: Handle, timeout: Duration) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(request_error)?;
        Ok(Self { client, runtime })
    }
}

impl Transport for KeepaliveTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::AsyncHttp
    }

    fn send(&self, request: &DeliveryRequest) -> Result<(), TransportError> {
        let mut builder = self
            .client
            .post(&request.endpoint)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(request.body.clone());
        for (name, value) in request.auth_headers() {
            builder = builder.header(name, value);
        }

        self.runtime.spawn(async move {
            match builder.send().await {
                Ok(response) if response.status().is_success() => {
                    metrics::counter!("tracker.events_sent").increment(1);
                }
                Ok(response) => record_failure(
                    TransportKind::AsyncHttp,
                    &TransportError::Status(response.status().as_u16()),
                ),
                Err(e) => record_failure(TransportKind::AsyncHttp, &request_error(e)),
            }
        });
        Ok(())
    }
}

// ─── Legacy ─────────────────────────────────────────────────────────────────

/// Blocking transport for hosts without an async runtime. Sends issued from
/// inside a runtime (the flush timer) block the calling worker until done.
pub struct LegacyHttpTransport {
    client: reqwest::blocking::Client,
}

impl LegacyHttpTransport {
    pub fn new(timeout: Duration) -> TrackerResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(request_error)?;
        Ok(Self { client })
    }
}

impl Transport for LegacyHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LegacyHttp
    }

    fn send(&self, request: &DeliveryRequest) -> Result<(), TransportError> {
        let mut builder = self
            .client
            .post(&request.endpoint)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(request.body.clone());
        for (name, value) in request.auth_headers() {
            builder = builder.header(name, value);
        }

        let send = move || builder.send().map(|response| response.status());
        // reqwest's blocking client panics on a thread that is driving a
        // runtime, so a call from async context goes through a plain thread.
        let status = if Handle::try_current().is_ok() {
            std::thread::scope(|scope| scope.spawn(send).join())
                .map_err(|_| TransportError::Request("legacy request thread panicked".into()))?
        } else {
            send()
        }
        .map_err(request_error)?;

        if status.is_success() {
            metrics::counter!("tracker.events_sent").increment(1);
            Ok(())
        } else {
            Err(TransportError::Status(status.as_u16()))
        }
    }
}
