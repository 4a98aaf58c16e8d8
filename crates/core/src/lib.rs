pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, DispatchConfig, TrackerConfig};
pub use error::{TrackerError, TrackerResult, TransportError};
pub use types::{EventDraft, PageContext, Properties, TrackedEvent, UserIdentity, SDK_VERSION};
