//! Cookie-less identity: a deterministic device fingerprint and random
//! UUID-shaped ids for sessions and events.
//!
//! Nothing here reads or writes persistent storage. The fingerprint is a
//! best-effort, collision-tolerant FNV-1a hash, not a security identifier.

use rand::Rng;
use uuid::Uuid;

use crate::host::DeviceSignals;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Prefix marking an id as a FunnelCube device fingerprint.
pub const DEVICE_ID_PREFIX: &str = "fc_";

const SIGNAL_DELIMITER: &str = "|";
const UUID_TEMPLATE: &str = "xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx";

/// 32-bit FNV-1a over raw bytes.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Fingerprint the device. Same signals always give the same id; changing
/// any one signal changes it.
pub fn compute_device_id(signals: &DeviceSignals) -> String {
    let joined = [
        signals.screen_width.to_string(),
        signals.screen_height.to_string(),
        signals.color_depth.to_string(),
        signals.timezone_signal(),
        signals.language.clone(),
        signals.platform.clone(),
        signals.hardware_concurrency.to_string(),
    ]
    .join(SIGNAL_DELIMITER);

    format!("{DEVICE_ID_PREFIX}{:08x}", fnv1a_32(joined.as_bytes()))
}

/// Source of random ids. `Secure` draws from the OS generator; `Fallback`
/// assembles the same shape from a per-character pseudo-random hex digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenerator {
    Secure,
    Fallback,
}

impl IdGenerator {
    /// Pick the best generator the platform offers.
    pub fn detect() -> Self {
        IdGenerator::Secure
    }

    /// A UUID-v4-shaped string: 36 chars, hyphens at 8, 13, 18 and 23.
    pub fn random_id(self) -> String {
        match self {
            IdGenerator::Secure => Uuid::new_v4().to_string(),
            IdGenerator::Fallback => fallback_uuid(),
        }
    }
}

fn fallback_uuid() -> String {
    let mut rng = rand::thread_rng();
    UUID_TEMPLATE
        .chars()
        .map(|c| match c {
            'x' => hex_digit(rng.gen_range(0..16)),
            // variant nibble: 10xx
            'y' => hex_digit(rng.gen_range(0..4) | 0x8),
            other => other,
        })
        .collect()
}

fn hex_digit(value: u32) -> char {
    char::from_digit(value, 16).unwrap_or('0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> DeviceSignals {
        DeviceSignals {
            screen_width: 2560,
            screen_height: 1440,
            color_depth: 30,
            timezone: Some("America/New_York".into()),
            utc_offset_minutes: 300,
            language: "en-US".into(),
            platform: "MacIntel".into(),
            hardware_concurrency: 10,
        }
    }

    fn assert_uuid_shaped(id: &str) {
        assert_eq!(id.len(), 36, "{id}");
        for (i, c) in id.chars().enumerate() {
            if [8, 13, 18, 23].contains(&i) {
                assert_eq!(c, '-', "{id}");
            } else {
                assert!(c.is_ascii_hexdigit() && !c.is_ascii_uppercase(), "{id}");
            }
        }
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn test_device_id_is_deterministic() {
        let a = compute_device_id(&signals());
        let b = compute_device_id(&signals());
        assert_eq!(a, b);
        assert!(a.starts_with(DEVICE_ID_PREFIX));
        assert_eq!(a.len(), DEVICE_ID_PREFIX.len() + 8);
    }

    #[test]
    fn test_device_id_changes_with_any_signal() {
        let base = compute_device_id(&signals());

        let mut s = signals();
        s.screen_width = 1920;
        assert_ne!(compute_device_id(&s), base);

        let mut s = signals();
        s.hardware_concurrency = 8;
        assert_ne!(compute_device_id(&s), base);

        let mut s = signals();
        s.timezone = None;
        assert_ne!(compute_device_id(&s), base);

        let mut s = signals();
        s.language = "en-GB".into();
        assert_ne!(compute_device_id(&s), base);
    }

    #[test]
    fn test_random_ids_are_uuid_shaped() {
        for generator in [IdGenerator::Secure, IdGenerator::Fallback] {
            for _ in 0..200 {
                assert_uuid_shaped(&generator.random_id());
            }
        }
    }

    #[test]
    fn test_fallback_ids_carry_version_and_variant() {
        for _ in 0..200 {
            let id = IdGenerator::Fallback.random_id();
            assert_eq!(&id[14..15], "4");
            assert!(matches!(&id[19..20], "8" | "9" | "a" | "b"), "{id}");
        }
    }

    #[test]
    fn test_random_ids_are_unique() {
        let a = IdGenerator::Fallback.random_id();
        let b = IdGenerator::Fallback.random_id();
        assert_ne!(a, b);
        assert_ne!(IdGenerator::Secure.random_id(), IdGenerator::Secure.random_id());
    }
}
