//! FunnelCube tracking SDK — event buffering, cookie-less identity, and
//! tiered best-effort delivery for the tracking snippet.
//!
//! # Modules
//!
//! - [`tracker`] — Public API (`init`, `track`, `identify`, `flush`, `reset`)
//! - [`queue`] — Pre-init queue and the flush batch
//! - [`identity`] — Device fingerprint and random ids
//! - [`dispatcher`] — Flush triggers and the beacon → async → legacy tier
//! - [`transport`] — Transport capability interface and a capture transport
//! - [`http`] — reqwest-backed transports and environment detection
//! - [`navigation`] — Lifecycle signals, SPA navigation, outgoing links
//! - [`host`] — Host environment seam
//! - [`embed`] — Stub-queue replay and duplicate-load guard

pub mod dispatcher;
pub mod embed;
pub mod host;
pub mod http;
pub mod identity;
pub mod navigation;
pub mod queue;
pub mod tracker;
pub mod transport;

pub use dispatcher::{Dispatcher, FlushTrigger};
pub use embed::{ScriptSlot, StubSnippet};
pub use host::{DeviceSignals, Host, StaticHost};
pub use http::detect_transports;
pub use identity::{compute_device_id, IdGenerator};
pub use navigation::{ClickPath, ElementInfo, LifecycleSignal, NavigationKind};
pub use tracker::Tracker;
pub use transport::{CaptureTransport, Transport, TransportKind, TransportSet};
