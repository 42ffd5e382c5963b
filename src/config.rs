//! Library-level configuration surface (spec.md §6).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How aggressively a [`crate::enumerator::DeviceEnumerator`] probes
/// candidate devices (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMode {
    Passive,
    Safe,
    Full,
}

impl Default for DetectionMode {
    fn default() -> Self {
        DetectionMode::Safe
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub detect_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    #[serde(with = "duration_millis")]
    pub card_removal_timeout: Duration,
    pub validation: bool,
    pub ignore_paths: Vec<String>,
    pub usb_blocklist: Vec<String>,
    pub detection_mode: DetectionMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            detect_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            card_removal_timeout: Duration::from_millis(300),
            validation: false,
            ignore_paths: Vec::new(),
            usb_blocklist: Vec::new(),
            detection_mode: DetectionMode::default(),
        }
    }
}

/// `serde` has no native `Duration` support; this mirrors the
/// millisecond-integer convention used across the pack's serde-based
/// configuration structs.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
