//! Persisted audio settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Output speaker layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixType {
    /// Use whatever the device reports
    #[default]
    AutoDetect,
    Mono,
    Stereo,
    Quad,
    FiveOne,
    SevenOne,
}

impl MixType {
    /// Requested channel count, with 0 meaning "the device's own count".
    pub fn requested_channels(self) -> usize {
        match self {
            MixType::AutoDetect => 0,
            MixType::Mono => 1,
            MixType::Stereo => 2,
            MixType::Quad => 4,
            MixType::FiveOne => 6,
            MixType::SevenOne => 8,
        }
    }

    /// Channel count to mix for, resolving [`MixType::AutoDetect`] against the device.
    ///
    /// A device layout with no matching mix type falls back to stereo.
    pub fn channel_count(self, device_channels: usize) -> usize {
        match self {
            MixType::AutoDetect => {
                MixType::from_channel_count(device_channels).requested_channels()
            }
            other => other.requested_channels(),
        }
    }

    /// The layout for a channel count. Unsupported counts fall back to stereo.
    pub fn from_channel_count(channels: usize) -> MixType {
        match channels {
            1 => MixType::Mono,
            2 => MixType::Stereo,
            4 => MixType::Quad,
            6 => MixType::FiveOne,
            8 => MixType::SevenOne,
            _ => MixType::Stereo,
        }
    }
}

/// Device buffering preference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Latency {
    #[default]
    Low,
    High,
}

impl Latency {
    /// Device buffer size in frames.
    pub fn buffer_frames(self) -> u32 {
        match self {
            Latency::Low => 256,
            Latency::High => 1024,
        }
    }
}

/// Audio settings as stored on disk.
///
/// ```toml
/// system_volume = 1.0
/// mix_type = "AutoDetect"
/// min_volume_threshold = 0.015
/// latency = "Low"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Master volume, linear
    pub system_volume: f32,
    pub mix_type: MixType,
    /// Sounds quieter than this are virtualized
    pub min_volume_threshold: f32,
    pub latency: Latency,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            system_volume: 1.0,
            mix_type: MixType::AutoDetect,
            min_volume_threshold: 0.015,
            latency: Latency::Low,
        }
    }
}

impl AudioSettings {
    /// Load settings from a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::read_file(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let settings: AudioSettings = toml::from_str(toml_str)?;
        Ok(settings.sanitized())
    }

    /// Save settings to a TOML file, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::write_file(parent, e))?;
            }
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| Error::write_file(path, e))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Clamp out-of-range values: volume and threshold to ≥ 0, NaN to the default.
    pub fn sanitized(mut self) -> Self {
        let defaults = AudioSettings::default();
        if self.system_volume.is_nan() {
            self.system_volume = defaults.system_volume;
        }
        if self.min_volume_threshold.is_nan() {
            self.min_volume_threshold = defaults.min_volume_threshold;
        }
        self.system_volume = self.system_volume.max(0.0);
        self.min_volume_threshold = self.min_volume_threshold.max(0.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = AudioSettings::default();
        assert_eq!(s.system_volume, 1.0);
        assert_eq!(s.mix_type, MixType::AutoDetect);
        assert_eq!(s.min_volume_threshold, 0.015);
        assert_eq!(s.latency, Latency::Low);
    }

    #[test]
    fn missing_keys_take_defaults_and_negatives_clamp() {
        let s = AudioSettings::from_toml("system_volume = -2.0\nlatency = \"High\"\n").unwrap();
        assert_eq!(s.system_volume, 0.0);
        assert_eq!(s.latency, Latency::High);
        assert_eq!(s.min_volume_threshold, 0.015);
    }

    #[test]
    fn unknown_mix_type_is_a_parse_error() {
        let err = AudioSettings::from_toml("mix_type = \"Hexaphonic\"\n").unwrap_err();
        assert!(matches!(err, Error::TomlParse(_)));
    }

    #[test]
    fn channel_counts() {
        assert_eq!(MixType::AutoDetect.channel_count(6), 6);
        assert_eq!(MixType::AutoDetect.channel_count(3), 2);
        assert_eq!(MixType::Mono.channel_count(8), 1);
        assert_eq!(MixType::SevenOne.channel_count(2), 8);
        assert_eq!(MixType::from_channel_count(5), MixType::Stereo);
    }
}
