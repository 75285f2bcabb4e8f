// src/config.rs - YAML configuration for the monitoring engine

use crate::classifier::{default_bands, VitalBands};
use crate::error::{Result, VitalError};
use crate::escalation::Profile;
use crate::reading::VitalType;
use crate::tone::ToneProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main vitalguard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Classification bands per vital type; absent types are not monitored
    #[serde(default = "default_bands")]
    pub thresholds: BTreeMap<VitalType, VitalBands>,

    /// Acoustic alarm configuration
    #[serde(default)]
    pub alarm: AlarmConfig,

    /// Audio output selection
    #[serde(default)]
    pub audio: AudioConfig,

    /// Escalation configuration
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Identity of the monitored person
    #[serde(default)]
    pub profile: Profile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: default_bands(),
            alarm: AlarmConfig::default(),
            audio: AudioConfig::default(),
            escalation: EscalationConfig::default(),
            profile: Profile::default(),
        }
    }
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (vital, bands) in &self.thresholds {
            bands.validate(*vital)?;
        }
        self.alarm.validate()?;
        self.audio.validate()?;
        self.escalation.validate()?;
        Ok(())
    }
}

// ============================================================================
// ALARM CONFIGURATION
// ============================================================================

/// Tone profiles of the acoustic alarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Tone for the Warning severity
    #[serde(default = "ToneProfile::warning")]
    pub warning: ToneProfile,

    /// Tone for the Emergency severity
    #[serde(default = "ToneProfile::emergency")]
    pub emergency: ToneProfile,

    /// Number of state transitions kept for inspection
    #[serde(default = "default_transition_log_capacity")]
    pub transition_log_capacity: usize,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            warning: ToneProfile::warning(),
            emergency: ToneProfile::emergency(),
            transition_log_capacity: default_transition_log_capacity(),
        }
    }
}

impl AlarmConfig {
    /// The Emergency tone has to be recognisably more urgent than the Warning
    /// tone: faster, higher and at least as harsh.
    pub fn validate(&self) -> Result<()> {
        self.warning.validate("warning")?;
        self.emergency.validate("emergency")?;

        if self.emergency.period_ms >= self.warning.period_ms {
            return Err(VitalError::Config(format!(
                "emergency tone must repeat faster than warning tone ({} ms >= {} ms)",
                self.emergency.period_ms, self.warning.period_ms
            )));
        }
        if self.emergency.frequency_hz <= self.warning.frequency_hz {
            return Err(VitalError::Config(format!(
                "emergency tone must be pitched higher than warning tone ({} Hz <= {} Hz)",
                self.emergency.frequency_hz, self.warning.frequency_hz
            )));
        }
        if self.emergency.waveform.harshness() < self.warning.waveform.harshness() {
            return Err(VitalError::Config(format!(
                "emergency waveform {:?} is softer than warning waveform {:?}",
                self.emergency.waveform, self.warning.waveform
            )));
        }
        if self.transition_log_capacity == 0 {
            return Err(VitalError::Config(
                "alarm.transition_log_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// AUDIO CONFIGURATION
// ============================================================================

/// Audio output the alarm loop plays through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum AudioConfig {
    /// Log every beep through tracing
    Log,

    /// Stream rendered f32 little-endian PCM to a file or pipe
    Pcm {
        path: PathBuf,
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
    },

    /// No audio output; the alarm stays silent
    None,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig::Log
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if let AudioConfig::Pcm { sample_rate, .. } = self {
            if *sample_rate < 1000 {
                return Err(VitalError::Config(format!(
                    "audio.sample_rate {} is too low for alarm tones",
                    sample_rate
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// ESCALATION CONFIGURATION
// ============================================================================

/// Dispatch channel used for escalation messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Messaging deep link handed to the platform URL opener
    DeepLink,

    /// SMS over the Twilio REST API
    Twilio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Number of most recent readings included in a message
    #[serde(default = "default_recent_readings")]
    pub recent_readings: usize,

    /// Destination used when the profile has no contact
    #[serde(default = "default_destination")]
    pub default_destination: String,

    #[serde(default = "default_channel")]
    pub channel: ChannelKind,

    /// Prefix of the messaging deep link
    #[serde(default = "default_link_base")]
    pub link_base: String,

    #[serde(default)]
    pub twilio: Option<TwilioConfig>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            recent_readings: default_recent_readings(),
            default_destination: default_destination(),
            channel: default_channel(),
            link_base: default_link_base(),
            twilio: None,
        }
    }
}

impl EscalationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.recent_readings == 0 {
            return Err(VitalError::Config(
                "escalation.recent_readings must be at least 1".into(),
            ));
        }
        if self.default_destination.trim().is_empty() {
            return Err(VitalError::Config(
                "escalation.default_destination must not be empty".into(),
            ));
        }
        if self.channel == ChannelKind::Twilio {
            if cfg!(not(feature = "twilio")) {
                return Err(VitalError::Config(
                    "escalation.channel 'twilio' requires the 'twilio' feature".into(),
                ));
            }
            if self.twilio.is_none() {
                return Err(VitalError::Config(
                    "escalation.channel 'twilio' requires an escalation.twilio section".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Twilio SMS credentials and sender
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwilioConfig {
    /// Account SID (from env var if not provided)
    #[serde(default)]
    pub account_sid: Option<String>,

    /// Auth token (from env var if not provided)
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Sender phone number (E.164 format)
    pub from_number: String,

    /// Webhook URL for delivery status updates
    #[serde(default)]
    pub status_callback_url: Option<String>,
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_transition_log_capacity() -> usize { 1000 }
fn default_sample_rate() -> u32 { 44_100 }
fn default_recent_readings() -> usize { 3 }
fn default_destination() -> String { "919999999999".to_string() }
fn default_channel() -> ChannelKind { ChannelKind::DeepLink }
fn default_link_base() -> String { "https://wa.me/".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone::Waveform;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.thresholds.len(), 3);
        assert!(!config.thresholds.contains_key(&VitalType::BloodGlucose));
        assert_eq!(config.alarm.emergency, ToneProfile::emergency());
        assert_eq!(config.audio, AudioConfig::Log);
        assert_eq!(config.escalation.recent_readings, 3);
        assert_eq!(config.escalation.default_destination, "919999999999");
        assert_eq!(config.escalation.channel, ChannelKind::DeepLink);
        assert_eq!(config.profile.display_name, "Patient");
    }

    #[test]
    fn test_thresholds_replace_defaults() {
        let yaml = r#"
thresholds:
  spo2:
    normal_low: 95
    emergency_low: 88
  blood_glucose:
    normal_low: 70
    normal_high: 180
    emergency_low: 54
    emergency_high: 250
audio:
  backend: none
profile:
  display_name: Aarav
  contact:
    name: Dr. Rao
    address: "+91 98765 43210"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.thresholds.len(), 2);
        assert!(!config.thresholds.contains_key(&VitalType::Temperature));
        assert_eq!(config.thresholds[&VitalType::SpO2].normal_low, Some(95.0));
        assert_eq!(config.audio, AudioConfig::None);
        assert_eq!(config.profile.display_name, "Aarav");
        assert_eq!(
            config.profile.contact.as_ref().map(|c| c.address.as_str()),
            Some("+91 98765 43210")
        );
    }

    #[test]
    fn test_pcm_backend() {
        let yaml = "audio:\n  backend: pcm\n  path: /tmp/alarm.f32\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.audio,
            AudioConfig::Pcm {
                path: PathBuf::from("/tmp/alarm.f32"),
                sample_rate: 44_100
            }
        );
    }

    #[test]
    fn test_emergency_tone_must_be_more_urgent() {
        let mut config = Config::default();
        config.alarm.emergency.period_ms = 1500;
        config.alarm.emergency.beep_ms = 300;
        assert!(matches!(config.validate(), Err(VitalError::Config(_))));

        let mut config = Config::default();
        config.alarm.emergency.frequency_hz = 440.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.alarm.emergency.waveform = Waveform::Sine;
        config.alarm.warning.waveform = Waveform::Square;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_bands_rejected() {
        let yaml = r#"
thresholds:
  heart_rate:
    normal_low: 90
    normal_high: 165
    emergency_low: 100
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(VitalError::Config(_))));
    }

    #[test]
    fn test_escalation_validation() {
        let mut config = Config::default();
        config.escalation.recent_readings = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.escalation.channel = ChannelKind::Twilio;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "escalation:\n  recent_readings: 5").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.escalation.recent_readings, 5);

        assert!(matches!(
            Config::from_file("/nonexistent/vitalguard.yaml"),
            Err(VitalError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            Config::from_yaml("thresholds: [1, 2"),
            Err(VitalError::Yaml(_))
        ));
    }
}
