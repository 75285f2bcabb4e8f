// tests/common/mod.rs
//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use vitalguard::config::AudioConfig;
use vitalguard::tone::RecordingToneOutput;
use vitalguard::{
    Config, DispatchReceipt, EscalationChannel, EscalationMessage, Monitor, Result, ToneOutput,
    VitalError,
};

/// Escalation channel that keeps every message it is handed
#[derive(Default)]
pub struct RecordingChannel {
    messages: Mutex<Vec<EscalationMessage>>,
    fail: bool,
}

impl RecordingChannel {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<EscalationMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl EscalationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn dispatch(&self, message: &EscalationMessage) -> Result<DispatchReceipt> {
        self.messages.lock().push(message.clone());
        if self.fail {
            return Err(VitalError::Dispatch("channel offline".into()));
        }
        Ok(DispatchReceipt {
            channel: self.name(),
            destination: message.destination.clone(),
            reference: None,
            dispatched_at: Utc::now(),
        })
    }
}

/// A monitor wired to in-memory tone and escalation sinks
pub struct Harness {
    pub monitor: Monitor,
    pub tones: Arc<RecordingToneOutput>,
    pub channel: Arc<RecordingChannel>,
}

pub fn harness(config: &Config) -> Harness {
    let tones = Arc::new(RecordingToneOutput::new());
    let channel = Arc::new(RecordingChannel::default());

    let mut monitor = Monitor::new(config).expect("valid test configuration");
    let output = Arc::clone(&tones);
    monitor.set_audio_backend(Box::new(move || -> Result<Arc<dyn ToneOutput>> {
        let output: Arc<dyn ToneOutput> = output.clone();
        Ok(output)
    }));
    monitor.set_channel(channel.clone());

    Harness {
        monitor,
        tones,
        channel,
    }
}

pub fn default_harness() -> Harness {
    harness(&Config::default())
}

/// Configuration with audio disabled
pub fn silent_config() -> Config {
    Config {
        audio: AudioConfig::None,
        ..Config::default()
    }
}
