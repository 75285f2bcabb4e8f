// src/twilio.rs - SMS escalation channel over the Twilio REST API
use crate::config::TwilioConfig;
use crate::error::{Result, VitalError};
use crate::escalation::{DispatchReceipt, EscalationChannel, EscalationMessage};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

const API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio API response for messages
#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
    status: String,
}

pub struct TwilioSmsChannel {
    config: TwilioConfig,
    client: Client,
    account_sid: String,
    auth_token: String,
}

impl TwilioSmsChannel {
    pub fn new(config: TwilioConfig) -> Result<Self> {
        // Credentials from config or environment
        let account_sid = config
            .account_sid
            .clone()
            .or_else(|| std::env::var("TWILIO_ACCOUNT_SID").ok())
            .ok_or_else(|| VitalError::Config("TWILIO_ACCOUNT_SID not provided".into()))?;

        let auth_token = config
            .auth_token
            .clone()
            .or_else(|| std::env::var("TWILIO_AUTH_TOKEN").ok())
            .ok_or_else(|| VitalError::Config("TWILIO_AUTH_TOKEN not provided".into()))?;

        if !is_e164(&config.from_number) {
            return Err(VitalError::Config(format!(
                "Twilio from_number '{}' must be in E.164 format (e.g., +1234567890)",
                config.from_number
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            config,
            client,
            account_sid,
            auth_token,
        })
    }
}

/// `+` followed by 8 to 15 digits
fn is_e164(number: &str) -> bool {
    match number.strip_prefix('+') {
        Some(digits) => {
            (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Normalise a contact address to E.164, dropping spaces and dashes
fn to_e164(address: &str) -> Option<String> {
    let digits: String = address.chars().filter(|c| c.is_ascii_digit()).collect();
    let candidate = format!("+{}", digits);
    is_e164(&candidate).then_some(candidate)
}

#[async_trait]
impl EscalationChannel for TwilioSmsChannel {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn dispatch(&self, message: &EscalationMessage) -> Result<DispatchReceipt> {
        let to = to_e164(&message.destination).ok_or_else(|| {
            VitalError::Dispatch(format!(
                "destination '{}' is not a valid phone number",
                message.destination
            ))
        })?;

        let url = format!("{}/Accounts/{}/Messages.json", API_BASE, self.account_sid);

        let mut params = HashMap::new();
        params.insert("To", to.as_str());
        params.insert("From", self.config.from_number.as_str());
        params.insert("Body", message.body.as_str());
        if let Some(ref callback_url) = self.config.status_callback_url {
            params.insert("StatusCallback", callback_url.as_str());
        }

        debug!("Posting escalation SMS to {}", to);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let msg: MessageResponse = serde_json::from_str(&body)?;
            info!("SMS sent successfully: SID={}, Status={}", msg.sid, msg.status);
            Ok(DispatchReceipt {
                channel: self.name(),
                destination: to,
                reference: Some(msg.sid),
                dispatched_at: Utc::now(),
            })
        } else {
            error!("SMS send failed: Status={}, Body={}", status, body);
            Err(VitalError::Dispatch(format!("SMS send failed: {}", status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e164_validation() {
        assert!(is_e164("+14155550100"));
        assert!(!is_e164("14155550100"));
        assert!(!is_e164("+1415"));
        assert!(!is_e164("+1415555O100"));
    }

    #[test]
    fn test_contact_normalisation() {
        assert_eq!(to_e164("+91 98765-43210").as_deref(), Some("+919876543210"));
        assert_eq!(to_e164("919999999999").as_deref(), Some("+919999999999"));
        assert_eq!(to_e164("call me"), None);
    }

    #[test]
    fn test_channel_requires_valid_sender() {
        let config = TwilioConfig {
            account_sid: Some("AC123".into()),
            auth_token: Some("token".into()),
            from_number: "5550100".into(),
            status_callback_url: None,
        };
        assert!(matches!(
            TwilioSmsChannel::new(config),
            Err(VitalError::Config(_))
        ));
    }

    #[test]
    fn test_channel_with_explicit_credentials() {
        let config = TwilioConfig {
            account_sid: Some("AC123".into()),
            auth_token: Some("token".into()),
            from_number: "+14155550100".into(),
            status_callback_url: None,
        };
        let channel = TwilioSmsChannel::new(config).unwrap();
        assert_eq!(channel.name(), "twilio");
    }
}
