//! Event buffers: the pre-init queue that holds calls made before `init`,
//! and the batch that accumulates sealed events between flushes.

use std::collections::VecDeque;

use funnelcube_core::types::{EventDraft, TrackedEvent};

/// A call recorded before the tracker was initialised.
#[derive(Debug, Clone)]
pub enum PendingCall {
    Event(EventDraft),
    Flush,
}

/// FIFO of calls made before `init`. Drained exactly once.
#[derive(Debug, Default)]
pub struct PreInitQueue {
    calls: VecDeque<PendingCall>,
}

impl PreInitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: PendingCall) {
        self.calls.push_back(call);
    }

    /// Remove and return every queued call in the order it was made.
    pub fn drain(&mut self) -> Vec<PendingCall> {
        self.calls.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Sealed events awaiting transmission.
#[derive(Debug)]
pub struct Batch {
    events: Vec<TrackedEvent>,
    threshold: usize,
}

impl Batch {
    pub fn new(threshold: usize) -> Self {
        Self {
            events: Vec::with_capacity(threshold),
            threshold: threshold.max(1),
        }
    }

    /// Append an event. Returns `true` once the batch has reached its
    /// size threshold and should be flushed.
    pub fn push(&mut self, event: TrackedEvent) -> bool {
        self.events.push(event);
        self.events.len() >= self.threshold
    }

    /// Swap the current contents out, leaving an empty batch in place.
    pub fn take(&mut self) -> Vec<TrackedEvent> {
        std::mem::replace(&mut self.events, Vec::with_capacity(self.threshold))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
