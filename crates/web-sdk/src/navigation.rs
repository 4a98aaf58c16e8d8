//! Page-lifecycle and navigation hooks the host forwards to the tracker, plus
//! outgoing-link detection for click tracking.

use serde_json::json;
use tracing::debug;

use funnelcube_core::error::TrackerResult;
use funnelcube_core::types::{PageContext, Properties};

pub const SCREEN_VIEW_EVENT: &str = "screen_view";
pub const OUTGOING_LINK_EVENT: &str = "outgoing_link";
pub const MAX_LINK_TEXT_CHARS: usize = 200;

/// Page visibility and teardown signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    VisibilityHidden,
    VisibilityVisible,
    PageHide,
    BeforeUnload,
}

impl LifecycleSignal {
    /// Whether this signal means the page may be going away.
    pub fn triggers_flush(self) -> bool {
        !matches!(self, LifecycleSignal::VisibilityVisible)
    }
}

/// History changes in a single-page app. The host reports these after the
/// URL has changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    PushState,
    ReplaceState,
    PopState,
}

impl NavigationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NavigationKind::PushState => "push_state",
            NavigationKind::ReplaceState => "replace_state",
            NavigationKind::PopState => "pop_state",
        }
    }
}

/// Properties of a `screen_view` event.
pub fn screen_view_properties(page: &PageContext) -> Properties {
    let mut properties = Properties::new();
    properties.insert("path".into(), json!(page.path));
    properties.insert("url".into(), json!(page.url));
    properties.insert("title".into(), json!(page.title));
    properties
}

/// One element on the path from a click target up to the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub tag: String,
    pub href: Option<String>,
    pub text: String,
}

impl ElementInfo {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            href: None,
            text: String::new(),
        }
    }

    pub fn anchor(href: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: "a".into(),
            href: Some(href.into()),
            text: text.into(),
        }
    }

    fn is_link(&self) -> bool {
        self.tag.eq_ignore_ascii_case("a") && self.href.is_some()
    }
}

/// Click target followed by its ancestors, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickPath {
    elements: Vec<ElementInfo>,
}

impl ClickPath {
    pub fn new(elements: Vec<ElementInfo>) -> Self {
        Self { elements }
    }

    /// The closest enclosing anchor that has an `href`.
    pub fn nearest_anchor(&self) -> Option<&ElementInfo> {
        self.elements.iter().find(|e| e.is_link())
    }
}

/// A click on a link leaving the current site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingLink {
    pub url: String,
    pub host: String,
    pub text: String,
}

impl OutgoingLink {
    pub fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert("url".into(), json!(self.url));
        properties.insert("host".into(), json!(self.host));
        properties.insert("text".into(), json!(self.text));
        properties
    }
}

/// Resolve the clicked link against the current page and report it if its
/// hostname differs from the page's.
pub fn detect_outgoing(page: &PageContext, path: &ClickPath) -> TrackerResult<Option<OutgoingLink>> {
    let Some(anchor) = path.nearest_anchor() else {
        return Ok(None);
    };
    let Some(href) = anchor.href.as_deref() else {
        return Ok(None);
    };

    let base = url::Url::parse(&page.url)?;
    let target = match base.join(href) {
        Ok(target) => target,
        Err(e) => {
            debug!(href, error = %e, "ignoring unparseable link");
            return Ok(None);
        }
    };

    let Some(host) = target.host_str() else {
        return Ok(None);
    };
    if Some(host) == base.host_str() {
        return Ok(None);
    }

    Ok(Some(OutgoingLink {
        url: target.to_string(),
        host: host.to_string(),
        text: truncate_chars(anchor.text.trim(), MAX_LINK_TEXT_CHARS),
    }))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
