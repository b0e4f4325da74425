//! Synthesis configuration
//!
//! Voice, rate, volume and pitch for one synthesis job. Values are
//! validated on construction so the wire layer never sees an expression
//! the service would reject.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default voice used when the caller does not pick one.
pub const DEFAULT_VOICE: &str = "en-US-EmmaMultilingualNeural";

/// Short voice names like `en-US-AriaNeural`, optionally with a region
/// suffix folded into the name (`zh-CN-shaanxi-XiaoniNeural`).
static SHORT_VOICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]{2,})-([A-Z]{2,})-(.+Neural)$").unwrap());

/// The full form the service expects on the wire.
static FULL_VOICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Microsoft Server Speech Text to Speech Voice \(.+,.+\)$").unwrap()
});

static RATE_OR_VOLUME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]\d+%$").unwrap());
static PITCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]\d+Hz$").unwrap());

/// Configuration for one synthesis job
///
/// Immutable for the lifetime of the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Voice identifier in the service's full form
    pub voice: String,

    /// Speaking-rate expression, e.g. `+0%`
    #[serde(default = "default_rate")]
    pub rate: String,

    /// Volume expression, e.g. `+0%`
    #[serde(default = "default_volume")]
    pub volume: String,

    /// Pitch expression, e.g. `+0Hz`
    #[serde(default = "default_pitch")]
    pub pitch: String,
}

fn default_rate() -> String {
    "+0%".to_string()
}
fn default_volume() -> String {
    "+0%".to_string()
}
fn default_pitch() -> String {
    "+0Hz".to_string()
}

impl SpeechConfig {
    /// Create a configuration for `voice` with neutral prosody.
    ///
    /// Short names (`en-US-AriaNeural`) are expanded to the full form the
    /// service expects; full-form names are accepted as-is.
    pub fn new(voice: &str) -> Result<Self> {
        Ok(Self {
            voice: normalize_voice(voice)?,
            rate: default_rate(),
            volume: default_volume(),
            pitch: default_pitch(),
        })
    }

    /// Set the speaking-rate expression (`[+-]N%`).
    pub fn with_rate(mut self, rate: &str) -> Result<Self> {
        validate("rate", rate, &RATE_OR_VOLUME)?;
        self.rate = rate.to_string();
        Ok(self)
    }

    /// Set the volume expression (`[+-]N%`).
    pub fn with_volume(mut self, volume: &str) -> Result<Self> {
        validate("volume", volume, &RATE_OR_VOLUME)?;
        self.volume = volume.to_string();
        Ok(self)
    }

    /// Set the pitch expression (`[+-]NHz`).
    pub fn with_pitch(mut self, pitch: &str) -> Result<Self> {
        validate("pitch", pitch, &PITCH)?;
        self.pitch = pitch.to_string();
        Ok(self)
    }

    /// Re-validate every field, for configurations built by deserialization.
    pub fn validate(&self) -> Result<()> {
        if !FULL_VOICE.is_match(&self.voice) {
            return Err(Error::config(
                "voice",
                format!("'{}' is not a recognized voice name", self.voice),
            ));
        }
        validate("rate", &self.rate, &RATE_OR_VOLUME)?;
        validate("volume", &self.volume, &RATE_OR_VOLUME)?;
        validate("pitch", &self.pitch, &PITCH)?;
        Ok(())
    }
}

fn validate(field: &'static str, value: &str, pattern: &Regex) -> Result<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(Error::config(field, format!("'{value}' does not match the expected form")))
    }
}

/// Expand a short voice name to the full wire form and validate it.
fn normalize_voice(voice: &str) -> Result<String> {
    let voice = voice.trim();
    if voice.is_empty() {
        return Err(Error::config("voice", "voice must not be empty"));
    }

    let full = match SHORT_VOICE.captures(voice) {
        Some(caps) => {
            let lang = &caps[1];
            let mut region = caps[2].to_string();
            let mut name = caps[3].to_string();
            // A dash inside the name is a region suffix, e.g.
            // zh-CN-shaanxi-XiaoniNeural -> (zh-CN-shaanxi, XiaoniNeural)
            if let Some(idx) = name.find('-') {
                region = format!("{}-{}", region, &name[..idx]);
                name = name[idx + 1..].to_string();
            }
            format!("Microsoft Server Speech Text to Speech Voice ({lang}-{region}, {name})")
        }
        None => voice.to_string(),
    };

    if !FULL_VOICE.is_match(&full) {
        return Err(Error::config(
            "voice",
            format!("'{voice}' is not a recognized voice name"),
        ));
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_voice_expansion() {
        let config = SpeechConfig::new("en-US-AriaNeural").unwrap();
        assert_eq!(
            config.voice,
            "Microsoft Server Speech Text to Speech Voice (en-US, AriaNeural)"
        );
    }

    #[test]
    fn test_regional_voice_expansion() {
        let config = SpeechConfig::new("zh-CN-shaanxi-XiaoniNeural").unwrap();
        assert_eq!(
            config.voice,
            "Microsoft Server Speech Text to Speech Voice (zh-CN-shaanxi, XiaoniNeural)"
        );
    }

    #[test]
    fn test_full_voice_accepted() {
        let full = "Microsoft Server Speech Text to Speech Voice (cy-GB, NiaNeural)";
        let config = SpeechConfig::new(full).unwrap();
        assert_eq!(config.voice, full);
    }

    #[test]
    fn test_invalid_voice_rejected() {
        assert!(SpeechConfig::new("").is_err());
        assert!(SpeechConfig::new("not-a-voice").is_err());
    }

    #[test]
    fn test_prosody_validation() {
        let config = SpeechConfig::new("en-US-AriaNeural").unwrap();
        let config = config.with_rate("+10%").unwrap();
        let config = config.with_volume("-25%").unwrap();
        let config = config.with_pitch("+5Hz").unwrap();
        assert_eq!(config.rate, "+10%");
        assert_eq!(config.volume, "-25%");
        assert_eq!(config.pitch, "+5Hz");

        let config = SpeechConfig::new("en-US-AriaNeural").unwrap();
        assert!(config.clone().with_rate("10%").is_err());
        assert!(config.clone().with_volume("+10").is_err());
        assert!(config.with_pitch("+5%").is_err());
    }

    #[test]
    fn test_validate_after_deserialization() {
        let config: SpeechConfig =
            serde_json::from_str(r#"{"voice": "bogus"}"#).unwrap();
        assert!(config.validate().is_err());
    }
}
