//! Host environment seam — where the tracker reads the current page and the
//! device characteristics that feed the fingerprint.

use funnelcube_core::types::PageContext;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Device and browser characteristics used by the cookie-less fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignals {
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u32,
    /// IANA zone name, e.g. `Europe/Berlin`. `None` when the host cannot tell.
    pub timezone: Option<String>,
    /// Minutes to add to local time to reach UTC (positive west of Greenwich).
    pub utc_offset_minutes: i32,
    pub language: String,
    pub platform: String,
    pub hardware_concurrency: u32,
}

impl DeviceSignals {
    /// Timezone component of the fingerprint: the zone name, or the UTC
    /// offset when no name is available.
    pub fn timezone_signal(&self) -> String {
        match self.timezone.as_deref() {
            Some(zone) if !zone.is_empty() => zone.to_string(),
            _ => self.utc_offset_minutes.to_string(),
        }
    }

    /// Best-effort signals for a process with no screen (CLI, server-side).
    pub fn from_process() -> Self {
        let language = std::env::var("LANG")
            .ok()
            .and_then(|lang| lang.split('.').next().map(|tag| tag.replace('_', "-")))
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| "en-US".to_string());
        let timezone = std::env::var("TZ").ok().filter(|tz| !tz.is_empty());
        let local_offset_secs = chrono::Local::now().offset().local_minus_utc();

        Self {
            screen_width: 0,
            screen_height: 0,
            color_depth: 0,
            timezone,
            utc_offset_minutes: -local_offset_secs / 60,
            language,
            platform: std::env::consts::OS.to_string(),
            hardware_concurrency: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
        }
    }
}

/// What the tracker needs from the embedding environment.
pub trait Host: Send + Sync {
    /// The page as it is right now.
    fn page(&self) -> PageContext;

    fn device_signals(&self) -> DeviceSignals;
}

/// In-memory host whose page the embedder updates on navigation.
pub struct StaticHost {
    page: RwLock<PageContext>,
    signals: DeviceSignals,
}

impl StaticHost {
    pub fn new(page: PageContext, signals: DeviceSignals) -> Self {
        Self {
            page: RwLock::new(page),
            signals,
        }
    }

    pub fn set_page(&self, page: PageContext) {
        *self.page.write() = page;
    }

    /// Move to `url` (absolute or relative to the current page), keeping the
    /// previous URL as referrer.
    pub fn navigate(&self, url: &str, title: &str) -> Result<(), url::ParseError> {
        let mut page = self.page.write();
        let target = match url::Url::parse(&page.url) {
            Ok(base) => base.join(url)?,
            Err(_) => url::Url::parse(url)?,
        };
        *page = PageContext {
            url: target.to_string(),
            path: target.path().to_string(),
            title: title.to_string(),
            referrer: page.url.clone(),
        };
        Ok(())
    }
}

impl Host for StaticHost {
    fn page(&self) -> PageContext {
        self.page.read().clone()
    }

    fn device_signals(&self) -> DeviceSignals {
        self.signals.clone()
    }
}
