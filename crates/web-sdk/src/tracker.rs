//! The public tracker: an explicit instance owning configuration, identity,
//! the pre-init queue, and the current batch.
//!
//! States are Uninitialized → Initialized, once. Every public method is safe
//! in either state and runs through [`guard`], so the host never sees an
//! error or a panic from the SDK; failures only show up in the logs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use funnelcube_core::config::{DispatchConfig, TrackerConfig};
use funnelcube_core::error::{TrackerError, TrackerResult};
use funnelcube_core::types::{
    EventDraft, PageContext, Properties, TrackedEvent, UserIdentity, SDK_VERSION,
};

use crate::dispatcher::{DispatchReport, Dispatcher, FlushTrigger};
use crate::host::Host;
use crate::identity::{compute_device_id, IdGenerator};
use crate::navigation::{
    detect_outgoing, screen_view_properties, ClickPath, LifecycleSignal, NavigationKind,
    OUTGOING_LINK_EVENT, SCREEN_VIEW_EVENT,
};
use crate::queue::{Batch, PendingCall, PreInitQueue};
use crate::transport::{DeliveryTarget, TransportSet};

const IDENTIFY_EVENT: &str = "identify";

/// Cheap to clone; clones share the same tracker.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    host: Arc<dyn Host>,
    dispatcher: Dispatcher,
    ids: IdGenerator,
    dispatch_config: DispatchConfig,
    state: Mutex<TrackerState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct TrackerState {
    session: Option<Session>,
    user: Option<UserIdentity>,
    pending: PreInitQueue,
    batch: Batch,
    last_path: Option<String>,
}

/// Everything fixed by a successful `init`.
struct Session {
    config: Arc<TrackerConfig>,
    target: Arc<DeliveryTarget>,
    device_id: String,
    session_id: String,
}

/// A batch taken out of the tracker, ready to go to the dispatcher once the
/// state lock is released.
struct Outgoing {
    target: Arc<DeliveryTarget>,
    events: Vec<TrackedEvent>,
    trigger: FlushTrigger,
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Run a public entry point, logging instead of propagating any error or
/// panic.
fn guard<T>(operation: &'static str, f: impl FnOnce() -> TrackerResult<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(TrackerError::Config(message))) => {
            error!(operation, error = %message, "invalid tracker configuration");
            None
        }
        Ok(Err(e)) => {
            warn!(operation, error = %e, "tracker call failed");
            None
        }
        Err(_) => {
            warn!(operation, "tracker call panicked");
            None
        }
    }
}

impl Tracker {
    pub fn new(host: Arc<dyn Host>, transports: TransportSet) -> Self {
        Self::with_settings(host, transports, DispatchConfig::default(), IdGenerator::detect())
    }

    pub fn with_settings(
        host: Arc<dyn Host>,
        transports: TransportSet,
        dispatch_config: DispatchConfig,
        ids: IdGenerator,
    ) -> Self {
        let batch = Batch::new(dispatch_config.batch_size);
        Self {
            inner: Arc::new(TrackerInner {
                host,
                dispatcher: Dispatcher::new(transports),
                ids,
                dispatch_config,
                state: Mutex::new(TrackerState {
                    session: None,
                    user: None,
                    pending: PreInitQueue::new(),
                    batch,
                    last_path: None,
                }),
                timer: Mutex::new(None),
            }),
        }
    }

    // ─── Public API ─────────────────────────────────────────────────────────

    /// Configure the tracker and start delivering. A config missing
    /// `clientId`, `clientSecret` or `apiUrl` is logged and ignored; a second
    /// call after success does nothing.
    pub fn init(&self, config: TrackerConfig) {
        guard("init", || self.try_init(config));
    }

    /// Record an event. Ignored when `name` is empty.
    pub fn track(&self, name: &str, properties: Properties) {
        guard("track", || self.try_track(name, properties));
    }

    /// Attach a user to this and every later event until [`reset`](Self::reset).
    /// Ignored when `user_id` is empty.
    pub fn identify(&self, user_id: &str, traits: Properties) {
        guard("identify", || self.try_identify(user_id, traits));
    }

    /// Send everything buffered now, without the beacon.
    pub fn flush(&self) {
        guard("flush", || self.flush_with(FlushTrigger::Manual).map(|_| ()));
    }

    /// Forget the user and start a new session. Buffered events are kept.
    pub fn reset(&self) {
        guard("reset", || {
            self.try_reset();
            Ok(())
        });
    }

    /// Page visibility/teardown signal from the host.
    pub fn on_lifecycle(&self, signal: LifecycleSignal) {
        guard("on_lifecycle", || self.try_lifecycle(signal));
    }

    /// SPA history change from the host, reported after the URL changed.
    pub fn on_navigate(&self, kind: NavigationKind) {
        guard("on_navigate", || self.try_navigate(kind));
    }

    /// Click from the host, for outgoing-link tracking.
    pub fn on_click(&self, path: &ClickPath) {
        guard("on_click", || self.try_click(path));
    }

    // ─── Read-only state ────────────────────────────────────────────────────

    pub fn version(&self) -> &'static str {
        SDK_VERSION
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    pub fn device_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.device_id.clone())
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.session_id.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.state.lock().user.as_ref().map(|u| u.user_id.clone())
    }

    /// Events in the current batch.
    pub fn buffered_count(&self) -> usize {
        self.inner.state.lock().batch.len()
    }

    /// Calls waiting for `init`.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn has_flush_timer(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn try_init(&self, config: TrackerConfig) -> TrackerResult<()> {
        let mut outgoing = Vec::new();
        let auto_track_page_views;
        {
            let mut state = self.inner.state.lock();
            if state.session.is_some() {
                info!("tracker already initialised; ignoring init");
                return Ok(());
            }
            config.validate()?;

            let device_id = compute_device_id(&self.inner.host.device_signals());
            let session_id = self.inner.ids.random_id();
            auto_track_page_views = config.auto_track_page_views;
            info!(
                device_id = %device_id,
                session_id = %session_id,
                endpoint = %config.track_endpoint(),
                auto_track_page_views,
                auto_track_outgoing = config.auto_track_outgoing,
                "tracker initialised"
            );
            state.session = Some(Session {
                target: Arc::new(DeliveryTarget::from_config(&config)),
                config: Arc::new(config),
                device_id,
                session_id,
            });

            let pending = state.pending.drain();
            if !pending.is_empty() {
                debug!(count = pending.len(), "replaying calls made before init");
            }
            for call in pending {
                let next = match call {
                    PendingCall::Event(draft) => self.accept(&mut state, draft),
                    PendingCall::Flush => take_batch(&mut state, FlushTrigger::Manual),
                };
                outgoing.extend(next);
            }
        }

        for batch in outgoing {
            self.transmit(batch);
        }
        self.start_timer();
        if auto_track_page_views {
            self.track_page_view(None)?;
        }
        Ok(())
    }

    fn try_track(&self, name: &str, properties: Properties) -> TrackerResult<()> {
        if name.is_empty() {
            debug!("track called without an event name; ignoring");
            return Ok(());
        }
        let page = self.inner.host.page();
        self.record(name, properties, page);
        Ok(())
    }

    fn try_identify(&self, user_id: &str, traits: Properties) -> TrackerResult<()> {
        if user_id.is_empty() {
            debug!("identify called without a user id; ignoring");
            return Ok(());
        }
        let page = self.inner.host.page();
        let outgoing = {
            let mut state = self.inner.state.lock();
            state.user = Some(UserIdentity {
                user_id: user_id.to_string(),
                traits,
            });
            let draft = self.draft(&state, IDENTIFY_EVENT, Properties::new(), page);
            self.accept(&mut state, draft)
        };
        debug!(user_id, "user identified");
        if let Some(batch) = outgoing {
            self.transmit(batch);
        }
        Ok(())
    }

    fn try_reset(&self) {
        let mut state = self.inner.state.lock();
        state.user = None;
        let new_session = self.inner.ids.random_id();
        if let Some(session) = state.session.as_mut() {
            session.session_id = new_session;
            info!(session_id = %session.session_id, "tracker reset; new session");
        }
    }

    fn try_lifecycle(&self, signal: LifecycleSignal) -> TrackerResult<()> {
        if !signal.triggers_flush() || !self.is_initialized() {
            return Ok(());
        }
        debug!(signal = ?signal, "lifecycle flush");
        self.flush_with(FlushTrigger::Lifecycle).map(|_| ())
    }

    fn try_navigate(&self, kind: NavigationKind) -> TrackerResult<()> {
        let enabled = self
            .config()
            .map(|c| c.auto_track_page_views)
            .unwrap_or(false);
        if !enabled {
            return Ok(());
        }
        self.track_page_view(Some(kind))
    }

    fn try_click(&self, path: &ClickPath) -> TrackerResult<()> {
        let enabled = self
            .config()
            .map(|c| c.auto_track_outgoing)
            .unwrap_or(false);
        if !enabled {
            return Ok(());
        }
        let page = self.inner.host.page();
        if let Some(link) = detect_outgoing(&page, path)? {
            debug!(host = %link.host, "outgoing link clicked");
            self.record(OUTGOING_LINK_EVENT, link.properties(), page);
        }
        Ok(())
    }

    /// Emit a `screen_view` unless path+query matches the last one recorded.
    fn track_page_view(&self, kind: Option<NavigationKind>) -> TrackerResult<()> {
        let page = self.inner.host.page();
        let key = page.path_and_query();
        let outgoing = {
            let mut state = self.inner.state.lock();
            if state.last_path.as_deref() == Some(key.as_str()) {
                debug!(path = %key, "same path as last page view; skipping");
                return Ok(());
            }
            state.last_path = Some(key);
            let draft = self.draft(&state, SCREEN_VIEW_EVENT, screen_view_properties(&page), page);
            self.accept(&mut state, draft)
        };
        debug!(navigation = kind.map(NavigationKind::as_str), "page view recorded");
        if let Some(batch) = outgoing {
            self.transmit(batch);
        }
        Ok(())
    }

    fn config(&self) -> Option<Arc<TrackerConfig>> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.config.clone())
    }

    fn record(&self, name: &str, properties: Properties, page: PageContext) {
        let outgoing = {
            let mut state = self.inner.state.lock();
            let draft = self.draft(&state, name, properties, page);
            self.accept(&mut state, draft)
        };
        if let Some(batch) = outgoing {
            self.transmit(batch);
        }
    }

    fn draft(
        &self,
        state: &TrackerState,
        name: &str,
        properties: Properties,
        page: PageContext,
    ) -> EventDraft {
        EventDraft {
            name: name.to_string(),
            properties,
            page,
            timestamp: Utc::now(),
            event_id: self.inner.ids.random_id(),
            user: state.user.clone(),
        }
    }

    /// Queue the draft before `init`, otherwise seal it into the batch. Returns
    /// the batch when it just reached the size threshold.
    fn accept(&self, state: &mut TrackerState, draft: EventDraft) -> Option<Outgoing> {
        let Some(session) = state.session.as_ref() else {
            state.pending.push(PendingCall::Event(draft));
            return None;
        };
        let event = draft.seal(&session.device_id, &session.session_id);
        metrics::counter!("tracker.events_enqueued").increment(1);
        if state.batch.push(event) {
            take_batch(state, FlushTrigger::Threshold)
        } else {
            None
        }
    }

    fn flush_with(&self, trigger: FlushTrigger) -> TrackerResult<Option<DispatchReport>> {
        let outgoing = {
            let mut state = self.inner.state.lock();
            if state.session.is_none() {
                if trigger == FlushTrigger::Manual {
                    state.pending.push(PendingCall::Flush);
                }
                return Ok(None);
            }
            take_batch(&mut state, trigger)
        };
        Ok(outgoing.map(|batch| self.transmit(batch)))
    }

    fn transmit(&self, outgoing: Outgoing) -> DispatchReport {
        info!(
            count = outgoing.events.len(),
            trigger = outgoing.trigger.as_str(),
            "flushing tracker batch"
        );
        self.inner
            .dispatcher
            .dispatch(&outgoing.target, outgoing.events, outgoing.trigger)
    }

    fn start_timer(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime; periodic flush disabled, call flush() explicitly");
            return;
        };

        let period = Duration::from_millis(self.inner.dispatch_config.flush_interval_ms.max(1));
        let weak: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        *timer = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let tracker = Tracker { inner };
                guard("flush_timer", || tracker.flush_with(FlushTrigger::Timer).map(|_| ()));
            }
        }));
    }
}

fn take_batch(state: &mut TrackerState, trigger: FlushTrigger) -> Option<Outgoing> {
    let session = state.session.as_ref()?;
    if state.batch.is_empty() {
        return None;
    }
    let target = session.target.clone();
    Some(Outgoing {
        target,
        events: state.batch.take(),
        trigger,
    })
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("version", &SDK_VERSION)
            .field("initialized", &self.is_initialized())
            .field("transports", self.inner.dispatcher.transports())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DeviceSignals, StaticHost};
    use crate::transport::{CaptureTransport, TransportKind};
    use serde_json::json;

    fn signals() -> DeviceSignals {
        DeviceSignals {
            screen_width: 1440,
            screen_height: 900,
            color_depth: 24,
            timezone: Some("UTC".into()),
            utc_offset_minutes: 0,
            language: "en-US".into(),
            platform: "Linux x86_64".into(),
            hardware_concurrency: 4,
        }
    }

    fn setup() -> (Tracker, Arc<CaptureTransport>) {
        let host = Arc::new(StaticHost::new(
            PageContext::from_url("https://app.example.com/", "Home", "").unwrap(),
            signals(),
        ));
        let http = Arc::new(CaptureTransport::new(TransportKind::AsyncHttp));
        let tracker = Tracker::new(host, TransportSet::new().with_async_http(http.clone()));
        (tracker, http)
    }

    fn config() -> TrackerConfig {
        TrackerConfig::new("c1", "s1", "https://x").with_auto_track_page_views(false)
    }

    fn props(value: serde_json::Value) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_invalid_config_leaves_tracker_uninitialised() {
        let (tracker, _) = setup();
        tracker.init(TrackerConfig::new("c1", "", "https://x"));
        assert!(!tracker.is_initialized());
        assert!(tracker.device_id().is_none());

        tracker.init(config());
        assert!(tracker.is_initialized());
    }

    #[test]
    fn test_second_init_is_noop() {
        let (tracker, _) = setup();
        tracker.init(config());
        let session = tracker.session_id();
        tracker.init(TrackerConfig::new("other", "other", "https://y"));
        assert_eq!(tracker.session_id(), session);
        assert_eq!(tracker.config().unwrap().client_id, "c1");
    }

    #[test]
    fn test_empty_name_and_user_ignored() {
        let (tracker, _) = setup();
        tracker.init(config());
        tracker.track("", Properties::new());
        tracker.identify("", Properties::new());
        assert_eq!(tracker.buffered_count(), 0);
        assert!(tracker.user_id().is_none());
    }

    #[test]
    fn test_identify_attaches_user_until_reset() {
        let (tracker, http) = setup();
        tracker.init(config());
        tracker.identify("u-1", props(json!({"plan": "pro"})));
        tracker.track("clicked", Properties::new());
        let device = tracker.device_id();
        let session = tracker.session_id();

        tracker.reset();
        tracker.track("after_reset", Properties::new());
        tracker.flush();

        let bodies = http.bodies();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["event"], "identify");
        assert_eq!(bodies[1]["user_id"], "u-1");
        assert_eq!(bodies[1]["user_traits"]["plan"], "pro");
        assert!(bodies[2].get("user_id").is_none());
        assert!(bodies[2].get("user_traits").is_none());

        assert_eq!(tracker.device_id(), device);
        assert_ne!(tracker.session_id(), session);
        assert_eq!(bodies[2]["session_id"], json!(tracker.session_id().unwrap()));
    }

    #[test]
    fn test_reset_keeps_batch() {
        let (tracker, _) = setup();
        tracker.init(config());
        tracker.track("a", Properties::new());
        tracker.reset();
        assert_eq!(tracker.buffered_count(), 1);
    }

    #[test]
    fn test_flush_before_init_is_queued() {
        let (tracker, http) = setup();
        tracker.track("a", Properties::new());
        tracker.flush();
        tracker.track("b", Properties::new());
        assert_eq!(tracker.pending_count(), 3);
        assert_eq!(http.count(), 0);

        tracker.init(config());
        // "a" went out with the queued flush, "b" is still buffered.
        assert_eq!(http.event_names(), vec!["a"]);
        assert_eq!(tracker.buffered_count(), 1);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_lifecycle_ignored_before_init() {
        let (tracker, http) = setup();
        tracker.track("a", Properties::new());
        tracker.on_lifecycle(LifecycleSignal::PageHide);
        assert_eq!(http.count(), 0);
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn test_no_timer_without_runtime() {
        let (tracker, _) = setup();
        tracker.init(config());
        assert!(!tracker.has_flush_timer());
    }

    #[tokio::test]
    async fn test_init_twice_starts_one_timer() {
        let (tracker, _) = setup();
        tracker.init(config());
        assert!(tracker.has_flush_timer());
        // each timer task holds one weak reference
        assert_eq!(Arc::weak_count(&tracker.inner), 1);
        tracker.init(config());
        assert_eq!(Arc::weak_count(&tracker.inner), 1);
    }

    #[test]
    fn test_guard_swallows_errors_and_panics() {
        assert_eq!(guard("ok", || Ok(1)), Some(1));
        assert_eq!(
            guard::<()>("err", || Err(TrackerError::Config("bad".into()))),
            None
        );
        assert_eq!(guard::<()>("panic", || panic!("boom")), None);
    }
}
