//! Batch dispatcher — sends a flushed batch one event per request through
//! the transport tier, beacon first when the page is going away.

use tracing::{debug, warn};

use funnelcube_core::error::TransportError;
use funnelcube_core::types::TrackedEvent;

use crate::transport::{DeliveryRequest, DeliveryTarget, TransportKind, TransportSet};

/// Why a batch is being flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached its size threshold.
    Threshold,
    /// The recurring flush timer fired.
    Timer,
    /// The page is being hidden or torn down.
    Lifecycle,
    /// The host called `flush()`.
    Manual,
}

impl FlushTrigger {
    pub fn prefers_beacon(self) -> bool {
        matches!(self, FlushTrigger::Lifecycle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Threshold => "threshold",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Lifecycle => "lifecycle",
            FlushTrigger::Manual => "manual",
        }
    }
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub via_beacon: usize,
    pub via_async_http: usize,
    pub via_legacy_http: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn handed_off(&self) -> usize {
        self.via_beacon + self.via_async_http + self.via_legacy_http
    }

    fn record(&mut self, kind: TransportKind) {
        match kind {
            TransportKind::Beacon => self.via_beacon += 1,
            TransportKind::AsyncHttp => self.via_async_http += 1,
            TransportKind::LegacyHttp => self.via_legacy_http += 1,
        }
    }
}

pub struct Dispatcher {
    transports: TransportSet,
}

impl Dispatcher {
    pub fn new(transports: TransportSet) -> Self {
        Self { transports }
    }

    pub fn transports(&self) -> &TransportSet {
        &self.transports
    }

    /// Send every event independently, in order. Failures are counted and
    /// logged; nothing is retried.
    pub fn dispatch(
        &self,
        target: &DeliveryTarget,
        events: Vec<TrackedEvent>,
        trigger: FlushTrigger,
    ) -> DispatchReport {
        let mut report = DispatchReport {
            attempted: events.len(),
            ..Default::default()
        };

        for event in &events {
            let body = match serde_json::to_string(event) {
                Ok(body) => body,
                Err(e) => {
                    warn!(event_id = %event.event_id(), error = %e, "failed to serialise event");
                    report.failed += 1;
                    continue;
                }
            };
            let request = DeliveryRequest::new(target, body);

            match self.send_one(&request, trigger) {
                Ok(kind) => report.record(kind),
                Err(e) => {
                    metrics::counter!("tracker.transport_errors").increment(1);
                    debug!(
                        event_id = %event.event_id(),
                        error = %e,
                        "event dropped"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            trigger = trigger.as_str(),
            attempted = report.attempted,
            handed_off = report.handed_off(),
            failed = report.failed,
            "batch dispatched"
        );
        report
    }

    fn send_one(
        &self,
        request: &DeliveryRequest,
        trigger: FlushTrigger,
    ) -> Result<TransportKind, TransportError> {
        if trigger.prefers_beacon() {
            if let Some(beacon) = &self.transports.beacon {
                match beacon.send(request) {
                    Ok(()) => return Ok(TransportKind::Beacon),
                    Err(e) => {
                        metrics::counter!("tracker.beacon_rejected").increment(1);
                        debug!(error = %e, "beacon rejected; falling back to http");
                    }
                }
            }
        }

        if let Some(http) = &self.transports.async_http {
            return http.send(request).map(|()| http.kind());
        }
        if let Some(legacy) = &self.transports.legacy_http {
            return legacy.send(request).map(|()| legacy.kind());
        }
        Err(TransportError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CaptureTransport;
    use chrono::Utc;
    use funnelcube_core::config::TrackerConfig;
    use funnelcube_core::types::{EventDraft, PageContext, Properties};
    use std::sync::Arc;

    fn events(n: usize) -> Vec<TrackedEvent> {
        (0..n)
            .map(|i| {
                EventDraft {
                    name: format!("e{i}"),
                    properties: Properties::new(),
                    page: PageContext::default(),
                    timestamp: Utc::now(),
                    event_id: format!("id-{i}"),
                    user: None,
                }
                .seal("fc_00000000", "s")
            })
            .collect()
    }

    fn target() -> DeliveryTarget {
        DeliveryTarget::from_config(&TrackerConfig::new("c1", "s1", "https://x"))
    }

    #[test]
    fn test_lifecycle_prefers_beacon() {
        let beacon = Arc::new(CaptureTransport::new(TransportKind::Beacon));
        let http = Arc::new(CaptureTransport::new(TransportKind::AsyncHttp));
        let dispatcher = Dispatcher::new(
            TransportSet::new()
                .with_beacon(beacon.clone())
                .with_async_http(http.clone()),
        );

        let report = dispatcher.dispatch(&target(), events(3), FlushTrigger::Lifecycle);
        assert_eq!(report.via_beacon, 3);
        assert_eq!(beacon.event_names(), vec!["e0", "e1", "e2"]);
        assert_eq!(http.count(), 0);
    }

    #[test]
    fn test_steady_state_skips_beacon() {
        let beacon = Arc::new(CaptureTransport::new(TransportKind::Beacon));
        let http = Arc::new(CaptureTransport::new(TransportKind::AsyncHttp));
        let dispatcher = Dispatcher::new(
            TransportSet::new()
                .with_beacon(beacon.clone())
                .with_async_http(http.clone()),
        );

        for trigger in [FlushTrigger::Timer, FlushTrigger::Threshold, FlushTrigger::Manual] {
            dispatcher.dispatch(&target(), events(1), trigger);
        }
        assert_eq!(beacon.count(), 0);
        assert_eq!(http.count(), 3);

        let request = &http.requests()[0];
        assert_eq!(request.endpoint, "https://x/track/");
        assert_eq!(request.client_id, "c1");
        assert_eq!(request.client_secret, "s1");
    }

    #[test]
    fn test_rejected_beacon_falls_back_to_http() {
        let http = Arc::new(CaptureTransport::new(TransportKind::AsyncHttp));
        let dispatcher = Dispatcher::new(
            TransportSet::new()
                .with_beacon(Arc::new(CaptureTransport::rejecting(TransportKind::Beacon)))
                .with_async_http(http.clone()),
        );

        let report = dispatcher.dispatch(&target(), events(2), FlushTrigger::Lifecycle);
        assert_eq!(report.via_async_http, 2);
        assert_eq!(http.count(), 2);
    }

    #[test]
    fn test_legacy_used_only_without_async_http() {
        let legacy = Arc::new(CaptureTransport::new(TransportKind::LegacyHttp));
        let dispatcher = Dispatcher::new(TransportSet::new().with_legacy_http(legacy.clone()));
        let report = dispatcher.dispatch(&target(), events(2), FlushTrigger::Lifecycle);
        assert_eq!(report.via_legacy_http, 2);

        let http = Arc::new(CaptureTransport::new(TransportKind::AsyncHttp));
        let legacy = Arc::new(CaptureTransport::new(TransportKind::LegacyHttp));
        let dispatcher = Dispatcher::new(
            TransportSet::new()
                .with_async_http(http.clone())
                .with_legacy_http(legacy.clone()),
        );
        dispatcher.dispatch(&target(), events(2), FlushTrigger::Manual);
        assert_eq!(http.count(), 2);
        assert_eq!(legacy.count(), 0);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let dispatcher = Dispatcher::new(
            TransportSet::new()
                .with_async_http(Arc::new(CaptureTransport::rejecting(TransportKind::AsyncHttp))),
        );
        let report = dispatcher.dispatch(&target(), events(4), FlushTrigger::Manual);
        assert_eq!(report.attempted, 4);
        assert_eq!(report.failed, 4);

        let report = Dispatcher::new(TransportSet::new()).dispatch(
            &target(),
            events(1),
            FlushTrigger::Timer,
        );
        assert_eq!(report.failed, 1);
    }
}
