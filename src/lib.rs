//! VITALGUARD - Vital-Sign Monitoring & Alert Engine
//!
//! The reactive core of a health-tracking application. Every new vital-sign
//! reading is classified against clinical bands, the aggregate severity
//! drives an audible alarm whose sound encodes urgency, and an Emergency can
//! be escalated to a caregiver contact.
//!
//! # Feature Flags
//!
//! - `twilio`: SMS escalation over the Twilio REST API
//!
//! # Examples
//!
//! ```rust
//! use vitalguard::{AlarmState, Config, Monitor, Reading, Severity};
//! use vitalguard::config::AudioConfig;
//!
//! let config = Config {
//!     audio: AudioConfig::None,
//!     ..Config::default()
//! };
//! let mut monitor = Monitor::new(&config)?;
//!
//! let state = monitor.record(Reading::spo2(93.0));
//! assert_eq!(state, AlarmState::Sounding(Severity::Warning));
//!
//! monitor.mute();
//! assert_eq!(monitor.state(), AlarmState::Muted(Severity::Warning));
//! # Ok::<(), vitalguard::VitalError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// CORE MODULES
// ============================================================================

/// Crate error type
pub mod error;

/// YAML configuration with defaults and validation
pub mod config;

/// Vital types and timestamped readings
pub mod reading;

/// Append-only reading store with a latest-per-vital index
pub mod store;

/// Severity classification
pub mod classifier;

/// Alarm tone profiles, synthesis and audio outputs
pub mod tone;

/// Alarm state machine and tone loop
pub mod alarm;

/// Emergency escalation messages and dispatch channels
pub mod escalation;

/// Reactive engine tying the pieces together
pub mod monitor;

// ============================================================================
// OPTIONAL MODULES
// ============================================================================

/// SMS escalation channel
#[cfg(feature = "twilio")]
#[cfg_attr(docsrs, doc(cfg(feature = "twilio")))]
pub mod twilio;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use alarm::{AlarmScheduler, AlarmState, AlarmTransition, TransitionCause};
pub use classifier::{Assessment, Classifier, Severity, VitalBands};
pub use config::Config;
pub use error::{Result, VitalError};
pub use escalation::{
    Contact, DispatchReceipt, EscalationChannel, EscalationMessage, EscalationOutcome, Escalator,
    Profile,
};
pub use monitor::{Escalation, Monitor, MonitorCommand, MonitorStats, MonitorStatus};
pub use reading::{Reading, VitalPayload, VitalType};
pub use store::{ReadingStore, StoreEvent};
pub use tone::{AudioBackend, ToneEvent, ToneOutput, ToneProfile, Waveform};

#[cfg(feature = "twilio")]
pub use twilio::TwilioSmsChannel;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// VITALGUARD version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize logging for embedders that have not set up a subscriber
///
/// Honors `RUST_LOG`, defaulting to `vitalguard=info`. Calling it more than
/// once is harmless.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vitalguard=info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_err() {
        // Already initialized
        return;
    }

    tracing::info!("VITALGUARD {} initialized", VERSION);
}
