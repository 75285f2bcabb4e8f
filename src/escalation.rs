// src/escalation.rs - Emergency escalation to a caregiver contact
//
// An escalation bundles the monitored person's identity, the current
// severity and the most recent readings into a plain-text message and hands
// it to a dispatch channel. Dispatch never touches the alarm state.

use crate::classifier::Severity;
use crate::config::{ChannelKind, EscalationConfig};
use crate::error::{Result, VitalError};
use crate::reading::Reading;
use crate::store::ReadingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Identity of the monitored person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Caregiver to escalate to
    #[serde(default)]
    pub contact: Option<Contact>,
}

fn default_display_name() -> String {
    "Patient".to_string()
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            contact: None,
        }
    }
}

impl Profile {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            contact: None,
        }
    }

    pub fn with_contact(mut self, contact: Contact) -> Self {
        self.contact = Some(contact);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,

    /// Phone number or channel-specific address
    pub address: String,
}

impl Contact {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }
}

/// A composed escalation, ready for dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationMessage {
    pub subject: String,
    pub severity: Severity,
    pub destination: String,

    /// True when no contact was configured and the placeholder was used
    pub destination_is_default: bool,

    /// Readings included in the body, newest first
    #[serde(skip)]
    pub readings: Vec<Arc<Reading>>,

    pub body: String,
    pub composed_at: DateTime<Utc>,
}

/// Build the message text for an escalation
///
/// `readings` must already be the N most recent readings, newest first.
pub fn compose(
    profile: &Profile,
    severity: Severity,
    readings: Vec<Arc<Reading>>,
    destination: String,
    destination_is_default: bool,
) -> EscalationMessage {
    let subject = format!(
        "{} ALERT for {}!",
        severity.label().to_uppercase(),
        profile.display_name
    );

    let mut body = format!("{}\nSeverity: {}\nLatest Vitals:\n", subject, severity);
    if readings.is_empty() {
        body.push_str("(no readings recorded)\n");
    }
    for reading in &readings {
        body.push_str(&format!(
            "- {} at {}\n",
            reading,
            reading.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    body.push_str("Please check the monitoring dashboard immediately.");

    EscalationMessage {
        subject,
        severity,
        destination,
        destination_is_default,
        readings,
        body,
        composed_at: Utc::now(),
    }
}

// ============================================================================
// DISPATCH CHANNELS
// ============================================================================

/// Confirmation returned by a channel after handing off a message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReceipt {
    pub channel: &'static str,
    pub destination: String,

    /// Channel-specific reference (URL opened, message SID, ...)
    pub reference: Option<String>,
    pub dispatched_at: DateTime<Utc>,
}

/// Outbound communication facility
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EscalationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn dispatch(&self, message: &EscalationMessage) -> Result<DispatchReceipt>;
}

/// Platform facility that opens a URL (browser, messaging app)
#[cfg_attr(test, mockall::automock)]
pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Logs the link instead of opening it
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLinkOpener;

impl LinkOpener for LogLinkOpener {
    fn open(&self, url: &str) -> Result<()> {
        info!("Escalation link: {}", url);
        Ok(())
    }
}

/// Encode a message into a messaging deep link
///
/// Only the digits of the destination are kept, the body is percent-encoded.
pub fn deep_link(base: &str, destination: &str, body: &str) -> String {
    let number: String = destination.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{}{}?text={}", base, number, urlencoding::encode(body))
}

/// Dispatches by opening a messaging deep link
pub struct DeepLinkChannel {
    base: String,
    opener: Arc<dyn LinkOpener>,
}

impl DeepLinkChannel {
    pub fn new(base: impl Into<String>, opener: Arc<dyn LinkOpener>) -> Self {
        Self {
            base: base.into(),
            opener,
        }
    }
}

#[async_trait]
impl EscalationChannel for DeepLinkChannel {
    fn name(&self) -> &'static str {
        "deep_link"
    }

    async fn dispatch(&self, message: &EscalationMessage) -> Result<DispatchReceipt> {
        if !message.destination.chars().any(|c| c.is_ascii_digit()) {
            return Err(VitalError::Dispatch(format!(
                "destination '{}' has no phone number",
                message.destination
            )));
        }
        let url = deep_link(&self.base, &message.destination, &message.body);
        self.opener.open(&url)?;

        Ok(DispatchReceipt {
            channel: self.name(),
            destination: message.destination.clone(),
            reference: Some(url),
            dispatched_at: Utc::now(),
        })
    }
}

/// Build the channel selected in configuration
pub fn channel_from_config(config: &EscalationConfig) -> Result<Arc<dyn EscalationChannel>> {
    match config.channel {
        ChannelKind::DeepLink => Ok(Arc::new(DeepLinkChannel::new(
            config.link_base.clone(),
            Arc::new(LogLinkOpener),
        ))),
        #[cfg(feature = "twilio")]
        ChannelKind::Twilio => {
            let twilio = config.twilio.clone().ok_or_else(|| {
                VitalError::Config("escalation.twilio section is required".into())
            })?;
            Ok(Arc::new(crate::twilio::TwilioSmsChannel::new(twilio)?))
        }
        #[cfg(not(feature = "twilio"))]
        ChannelKind::Twilio => Err(VitalError::Config(
            "escalation.channel 'twilio' requires the 'twilio' feature".into(),
        )),
    }
}

// ============================================================================
// ESCALATOR
// ============================================================================

/// Result of an escalation request
#[derive(Debug)]
pub struct EscalationOutcome {
    pub message: EscalationMessage,

    /// Background dispatch; `None` when no runtime was available to run it
    pub dispatch: Option<JoinHandle<Result<DispatchReceipt>>>,
}

/// Composes escalation messages and hands them to a channel
pub struct Escalator {
    channel: Arc<dyn EscalationChannel>,
    recent_readings: usize,
    default_destination: String,
}

impl Escalator {
    pub fn new(config: &EscalationConfig, channel: Arc<dyn EscalationChannel>) -> Self {
        Self {
            channel,
            recent_readings: config.recent_readings.max(1),
            default_destination: config.default_destination.clone(),
        }
    }

    pub fn from_config(config: &EscalationConfig) -> Result<Self> {
        Ok(Self::new(config, channel_from_config(config)?))
    }

    pub fn set_channel(&mut self, channel: Arc<dyn EscalationChannel>) {
        self.channel = channel;
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    /// Compose without dispatching
    ///
    /// Fails with [`VitalError::NotEmergency`] unless `severity` is Emergency.
    pub fn compose(
        &self,
        profile: &Profile,
        severity: Severity,
        store: &ReadingStore,
    ) -> Result<EscalationMessage> {
        if severity != Severity::Emergency {
            return Err(VitalError::NotEmergency(severity));
        }

        let (destination, is_default) = match &profile.contact {
            Some(contact) if !contact.address.trim().is_empty() => {
                (contact.address.clone(), false)
            }
            _ => (self.default_destination.clone(), true),
        };
        if is_default {
            warn!(
                "No contact configured for {}, escalating to default destination {}",
                profile.display_name, destination
            );
        }

        Ok(compose(
            profile,
            severity,
            store.recent(self.recent_readings),
            destination,
            is_default,
        ))
    }

    /// Compose and dispatch in the background
    pub fn escalate(
        &self,
        profile: &Profile,
        severity: Severity,
        store: &ReadingStore,
    ) -> Result<EscalationOutcome> {
        let message = self.compose(profile, severity, store)?;

        let dispatch = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let channel = Arc::clone(&self.channel);
                let outgoing = message.clone();
                Some(runtime.spawn(async move { dispatch_logged(channel, outgoing).await }))
            }
            Err(_) => {
                error!("No async runtime available, escalation was composed but not dispatched");
                None
            }
        };

        Ok(EscalationOutcome { message, dispatch })
    }

    /// Dispatch an already composed message and wait for the channel
    pub async fn send(&self, message: &EscalationMessage) -> Result<DispatchReceipt> {
        dispatch_logged(Arc::clone(&self.channel), message.clone()).await
    }
}

async fn dispatch_logged(
    channel: Arc<dyn EscalationChannel>,
    message: EscalationMessage,
) -> Result<DispatchReceipt> {
    match channel.dispatch(&message).await {
        Ok(receipt) => {
            info!(
                "Escalation dispatched via {} to {}",
                receipt.channel, receipt.destination
            );
            Ok(receipt)
        }
        Err(e) => {
            error!(
                "Escalation via {} to {} failed: {}",
                channel.name(),
                message.destination,
                e
            );
            Err(e)
        }
    }
}
