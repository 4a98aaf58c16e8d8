//! Host-page embedding: replaying the inline snippet's stub queue and
//! guarding against the script being loaded twice.

use serde_json::Value;
use tracing::{debug, info, warn};

use funnelcube_core::config::TrackerConfig;
use funnelcube_core::error::{TrackerError, TrackerResult};
use funnelcube_core::types::Properties;

use crate::tracker::Tracker;

/// One `[methodName, ...args]` tuple recorded by the snippet.
#[derive(Debug, Clone, PartialEq)]
pub struct StubCall {
    pub method: String,
    pub args: Vec<Value>,
}

/// The stub object left behind by the inline snippet (`{"q": [...]}`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StubSnippet {
    calls: Vec<StubCall>,
}

impl StubSnippet {
    pub fn new(calls: Vec<StubCall>) -> Self {
        Self { calls }
    }

    pub fn from_json(raw: &str) -> TrackerResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Accepts either the stub object with a `q` array or the bare array.
    /// Entries that are not `[string, ...]` are skipped.
    pub fn from_value(value: Value) -> TrackerResult<Self> {
        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut object) => match object.remove("q") {
                Some(Value::Array(entries)) => entries,
                Some(_) => {
                    return Err(TrackerError::Internal(anyhow::anyhow!(
                        "stub queue `q` is not an array"
                    )))
                }
                None => Vec::new(),
            },
            _ => {
                return Err(TrackerError::Internal(anyhow::anyhow!(
                    "stub queue must be an array or an object with `q`"
                )))
            }
        };

        let calls = entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::Array(mut tuple) if !tuple.is_empty() => match tuple.remove(0) {
                    Value::String(method) => Some(StubCall { method, args: tuple }),
                    other => {
                        debug!(method = %other, "skipping stub call with non-string method");
                        None
                    }
                },
                other => {
                    debug!(entry = %other, "skipping malformed stub call");
                    None
                }
            })
            .collect();
        Ok(Self { calls })
    }

    pub fn calls(&self) -> &[StubCall] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Replay recorded calls in order against `tracker`, consuming the stub.
/// Unknown methods are ignored. Returns how many calls were applied.
pub fn replay(tracker: &Tracker, stub: StubSnippet) -> usize {
    let mut applied = 0;
    for call in stub.calls {
        if apply(tracker, &call) {
            applied += 1;
        } else {
            debug!(method = %call.method, "ignoring unknown stub method");
        }
    }
    info!(applied, "stub queue replayed");
    applied
}

fn apply(tracker: &Tracker, call: &StubCall) -> bool {
    let args = &call.args;
    match call.method.as_str() {
        "init" => {
            let raw = args.first().cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<TrackerConfig>(raw) {
                Ok(config) => tracker.init(config),
                Err(e) => warn!(error = %e, "stub init call has unusable options"),
            }
        }
        "track" => {
            let name = args.first().and_then(Value::as_str).unwrap_or_default();
            tracker.track(name, object_arg(args.get(1)));
        }
        "identify" => {
            let user_id = match args.first() {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => String::new(),
            };
            tracker.identify(&user_id, object_arg(args.get(1)));
        }
        "flush" => tracker.flush(),
        "reset" => tracker.reset(),
        _ => return false,
    }
    true
}

fn object_arg(value: Option<&Value>) -> Properties {
    value
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// The slot a loaded SDK occupies on the host page. Loading into an occupied
/// slot is a no-op, so a duplicated script tag never double-initialises.
#[derive(Debug, Default)]
pub struct ScriptSlot {
    tracker: Option<Tracker>,
    stub: Option<StubSnippet>,
}

impl ScriptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot holding calls recorded by the inline snippet.
    pub fn with_stub(stub: StubSnippet) -> Self {
        Self {
            tracker: None,
            stub: Some(stub),
        }
    }

    /// Install the tracker built by `factory` and replay the stub queue, or
    /// return the tracker already loaded.
    pub fn load<F>(&mut self, factory: F) -> &Tracker
    where
        F: FnOnce() -> Tracker,
    {
        let loaded = self.is_loaded();
        if loaded {
            info!("tracker already loaded; skipping");
        }
        let stub = if loaded { None } else { self.stub.take() };
        let tracker = self.tracker.get_or_insert_with(factory);
        if let Some(stub) = stub {
            replay(tracker, stub);
        }
        tracker
    }

    pub fn tracker(&self) -> Option<&Tracker> {
        self.tracker.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.tracker.is_some()
    }
}
