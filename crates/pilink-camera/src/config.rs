//! Tunables for the camera layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and retry policy for utility calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture attempts before giving up on a busy device
    pub max_attempts: u32,
    /// Wait between attempts when the USB device is claimed
    #[serde(with = "duration_ms")]
    pub busy_backoff: Duration,
    /// Pause after `--reset` so the next operation finds the camera idle
    #[serde(with = "duration_ms")]
    pub settle_delay: Duration,
    /// `--auto-detect` attempts before a query is abandoned
    pub detect_attempts: u32,
    #[serde(with = "duration_ms")]
    pub detect_delay: Duration,
    /// Upper bound on `--get-config` queries
    #[serde(with = "duration_ms")]
    pub query_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            busy_backoff: Duration::from_secs(5),
            settle_delay: Duration::from_secs(8),
            detect_attempts: 3,
            detect_delay: Duration::from_secs(2),
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl CaptureConfig {
    /// Same policy with every delay zeroed (tests, dry runs).
    pub fn immediate() -> Self {
        Self {
            busy_backoff: Duration::ZERO,
            settle_delay: Duration::ZERO,
            detect_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// A named camera setting and the utility config path behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingPath {
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub path: String,
}

/// Ordered label → config-path table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsMap(Vec<SettingPath>);

impl Default for SettingsMap {
    fn default() -> Self {
        Self(vec![
            SettingPath {
                label: "shutterSpeed".into(),
                aliases: vec!["Shutter Speed".into()],
                path: "/main/capturesettings/shutterspeed".into(),
            },
            SettingPath {
                label: "iso".into(),
                aliases: vec!["ISO".into()],
                path: "/main/imgsettings/iso".into(),
            },
        ])
    }
}

impl SettingsMap {
    pub fn new(entries: Vec<SettingPath>) -> Self {
        Self(entries)
    }

    pub fn entries(&self) -> &[SettingPath] {
        &self.0
    }

    /// Resolve a label, alias or raw config path (`/main/...`).
    pub fn resolve<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if let Some(entry) = self
            .0
            .iter()
            .find(|e| e.label == name || e.aliases.iter().any(|a| a == name))
        {
            return Some(entry.path.as_str());
        }
        name.starts_with('/').then_some(name)
    }
}

/// `Duration` ⇄ integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
