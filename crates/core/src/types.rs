//! Tracked event model and the JSON shape POSTed to `{apiUrl}/track/`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Version stamped into every event as `sdk_version`.
pub const SDK_VERSION: &str = "1.0.0";

/// Caller-supplied event properties and user traits.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Snapshot of the page an event was recorded on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    pub path: String,
    pub title: String,
    pub referrer: String,
}

impl PageContext {
    /// Build a page snapshot from an absolute URL, deriving `path`.
    pub fn from_url(
        url: &str,
        title: impl Into<String>,
        referrer: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        let parsed = url::Url::parse(url)?;
        Ok(Self {
            url: parsed.to_string(),
            path: parsed.path().to_string(),
            title: title.into(),
            referrer: referrer.into(),
        })
    }

    /// Path plus query string; the key navigation tracking dedups on.
    pub fn path_and_query(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(parsed) => match parsed.query() {
                Some(query) => format!("{}?{}", parsed.path(), query),
                None => parsed.path().to_string(),
            },
            Err(_) => self.path.clone(),
        }
    }
}

/// User identity attached by `identify` until `reset`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserIdentity {
    pub user_id: String,
    pub traits: Properties,
}

/// Everything about an event that is known at call time. Device and session
/// ids are stamped by [`EventDraft::seal`] once the tracker is initialised.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub name: String,
    pub properties: Properties,
    pub page: PageContext,
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
    pub user: Option<UserIdentity>,
}

impl EventDraft {
    pub fn seal(self, device_id: &str, session_id: &str) -> TrackedEvent {
        let (user_id, user_traits) = match self.user {
            Some(user) => (Some(user.user_id), Some(user.traits)),
            None => (None, None),
        };
        TrackedEvent {
            name: self.name,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            event_id: self.event_id,
            device_id: device_id.to_string(),
            session_id: session_id.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            page: self.page,
            properties: self.properties,
            user_id,
            user_traits,
        }
    }
}

/// A fully built event. Fields are read-only once sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEvent {
    #[serde(rename = "event")]
    name: String,
    timestamp: String,
    event_id: String,
    device_id: String,
    session_id: String,
    sdk_version: String,
    page: PageContext,
    properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_traits: Option<Properties>,
}

impl TrackedEvent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn sdk_version(&self) -> &str {
        &self.sdk_version
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn user_traits(&self) -> Option<&Properties> {
        self.user_traits.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(user: Option<UserIdentity>) -> EventDraft {
        let mut properties = Properties::new();
        properties.insert("plan".into(), serde_json::json!("pro"));
        EventDraft {
            name: "signup".into(),
            properties,
            page: PageContext::from_url("https://example.com/pricing?ref=nav", "Pricing", "")
                .unwrap(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap(),
            event_id: "7f1c8c3e-2b1a-4c5d-9e8f-0a1b2c3d4e5f".into(),
            user,
        }
    }

    #[test]
    fn test_seal_without_user_omits_user_fields() {
        let event = draft(None).seal("fc_deadbeef", "session-1");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "signup");
        assert_eq!(json["timestamp"], "2024-03-01T12:30:05.000Z");
        assert_eq!(json["device_id"], "fc_deadbeef");
        assert_eq!(json["session_id"], "session-1");
        assert_eq!(json["sdk_version"], SDK_VERSION);
        assert_eq!(json["page"]["path"], "/pricing");
        assert_eq!(json["properties"]["plan"], "pro");
        assert!(json.get("user_id").is_none());
        assert!(json.get("user_traits").is_none());
    }

    #[test]
    fn test_seal_with_user() {
        let mut traits = Properties::new();
        traits.insert("email".into(), serde_json::json!("a@b.co"));
        let event = draft(Some(UserIdentity {
            user_id: "u-42".into(),
            traits,
        }))
        .seal("fc_deadbeef", "session-1");

        assert_eq!(event.user_id(), Some("u-42"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["user_traits"]["email"], "a@b.co");
    }

    #[test]
    fn test_path_and_query() {
        let page = PageContext::from_url("https://example.com/a/b?x=1#frag", "", "").unwrap();
        assert_eq!(page.path, "/a/b");
        assert_eq!(page.path_and_query(), "/a/b?x=1");

        let page = PageContext {
            url: "not a url".into(),
            path: "/fallback".into(),
            ..Default::default()
        };
        assert_eq!(page.path_and_query(), "/fallback");
    }
}
