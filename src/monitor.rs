// src/monitor.rs - Reactive monitoring engine
//
// Wires the reading store to the classifier and the alarm scheduler. Every
// store event triggers one synchronous reclassification over the latest
// reading of each monitored vital; the scheduler turns the result into
// alarm state and tones.

use crate::alarm::{AlarmScheduler, AlarmState, AlarmTransition};
use crate::classifier::{Assessment, Classifier, Severity};
use crate::config::Config;
use crate::error::{Result, VitalError};
use crate::escalation::{EscalationChannel, EscalationOutcome, Escalator, Profile};
use crate::reading::{Reading, VitalType};
use crate::store::{ReadingStore, StoreEvent};
use crate::tone::AudioBackend;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Operator action delivered to a running monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    Mute,
    Escalate,
}

/// Snapshot of what the UI banner shows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub state: AlarmState,

    /// Current aggregate severity (tracked even while muted)
    pub severity: Severity,

    /// Vitals responsible for the current severity
    pub triggers: Vec<VitalType>,

    /// Whether a tone loop is actually producing sound
    pub audible: bool,

    pub can_mute: bool,
    pub can_escalate: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct MonitorStats {
    pub readings_processed: u64,
    pub alarms_started: u64,
    pub mutes: u64,
    pub escalations: u64,
    pub tone_loops_spawned: u64,
    pub transitions_recorded: usize,
    pub uptime_secs: u64,
}

pub struct Monitor {
    store: ReadingStore,
    events: mpsc::UnboundedReceiver<StoreEvent>,
    classifier: Classifier,
    scheduler: AlarmScheduler,
    escalator: Escalator,
    profile: Profile,
    assessment: Assessment,
    start_time: Instant,
    readings_processed: AtomicU64,
    alarms_started: AtomicU64,
    mutes: AtomicU64,
    escalations: AtomicU64,
}

impl Monitor {
    /// Create a monitor over a fresh, empty store
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_store(config, ReadingStore::new())
    }

    /// Create a monitor observing an existing store
    ///
    /// Readings already in the store are classified immediately.
    pub fn with_store(config: &Config, store: ReadingStore) -> Result<Self> {
        config.validate()?;

        let events = store.subscribe();
        let mut monitor = Self {
            store,
            events,
            classifier: Classifier::new(config.thresholds.clone()),
            scheduler: AlarmScheduler::new(&config.alarm, Box::new(config.audio.clone())),
            escalator: Escalator::from_config(&config.escalation)?,
            profile: config.profile.clone(),
            assessment: Assessment::default(),
            start_time: Instant::now(),
            readings_processed: AtomicU64::new(0),
            alarms_started: AtomicU64::new(0),
            mutes: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
        };

        let monitored: Vec<String> = monitor
            .classifier
            .monitored()
            .map(|vital| vital.to_string())
            .collect();
        info!(
            "Monitoring {} for {} ({} existing readings)",
            monitored.join(", "),
            monitor.profile.display_name,
            monitor.store.len()
        );

        if !monitor.store.is_empty() {
            monitor.reassess(true);
        }
        Ok(monitor)
    }

    pub fn set_channel(&mut self, channel: Arc<dyn EscalationChannel>) {
        self.escalator.set_channel(channel);
    }

    pub fn set_audio_backend(&mut self, backend: Box<dyn AudioBackend>) {
        self.scheduler.set_audio_backend(backend);
    }

    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Append a reading and process it before returning
    pub fn record(&mut self, reading: Reading) -> AlarmState {
        self.store.append(reading);
        self.process_pending();
        self.scheduler.state()
    }

    /// Handle every store event received so far; returns how many
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(&event);
            handled += 1;
        }
        handled
    }

    /// Reclassify after one store event
    pub fn handle_event(&mut self, event: &StoreEvent) -> Option<AlarmTransition> {
        self.readings_processed.fetch_add(1, Ordering::Relaxed);

        let fresh = event.became_latest
            && self.classifier.bands(event.reading.vital_type()).is_some();
        if event.reading.value().is_none() {
            warn!(
                "Ignoring malformed {} reading #{} ({})",
                event.reading.vital_type(),
                event.sequence,
                event.reading.payload().raw_value()
            );
        } else if !event.became_latest {
            debug!("Reading #{} is older than the latest {}", event.sequence, event.reading.vital_type());
        }

        self.reassess(fresh)
    }

    fn reassess(&mut self, fresh_evidence: bool) -> Option<AlarmTransition> {
        let latest = self.store.latest_snapshot();
        let assessment = self.classifier.assess(latest.iter().map(|reading| reading.as_ref()));

        if assessment.severity != self.assessment.severity {
            info!(
                "Severity {} -> {} (triggered by {:?})",
                self.assessment.severity, assessment.severity, assessment.triggers
            );
        }
        self.assessment = assessment;

        let transition = self
            .scheduler
            .on_assessment(self.assessment.severity, fresh_evidence);
        if let Some(ref t) = transition {
            if t.to.is_sounding() && !t.from.is_sounding() {
                self.alarms_started.fetch_add(1, Ordering::Relaxed);
            }
        }
        transition
    }

    /// Process store events and operator commands until `shutdown` completes,
    /// then tear down
    ///
    /// A closed command channel only stops command handling; readings keep
    /// flowing until the store side closes or `shutdown` fires.
    pub async fn run<F>(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<MonitorCommand>,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Monitor running");

        let mut commands_open = true;
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.handle_event(&event);
                    }
                    None => break,
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("Command channel closed");
                        commands_open = false;
                    }
                },
                _ = &mut shutdown => break,
            }
        }

        self.shutdown();
    }

    /// Apply one operator command; events already queued are handled first
    pub fn handle_command(&mut self, command: MonitorCommand) {
        self.process_pending();
        match command {
            MonitorCommand::Mute => {
                if !self.mute() {
                    warn!("Nothing to mute in state {}", self.state());
                }
            }
            MonitorCommand::Escalate => {
                if let Err(e) = self.escalate() {
                    error!("Escalation refused: {}", e);
                }
            }
        }
    }

    /// Mute the current alarm episode; `false` when nothing was sounding
    pub fn mute(&mut self) -> bool {
        let muted = self.scheduler.mute();
        if muted {
            self.mutes.fetch_add(1, Ordering::Relaxed);
        }
        muted
    }

    pub fn state(&self) -> AlarmState {
        self.scheduler.state()
    }

    pub fn assessment(&self) -> &Assessment {
        &self.assessment
    }

    pub fn is_audible(&self) -> bool {
        self.scheduler.is_audible()
    }

    pub fn transitions(&self) -> Vec<AlarmTransition> {
        self.scheduler.transitions()
    }

    pub fn status(&self) -> MonitorStatus {
        let state = self.scheduler.state();
        MonitorStatus {
            state,
            severity: self.assessment.severity,
            triggers: self.assessment.triggers.clone(),
            audible: self.scheduler.is_audible(),
            can_mute: state.can_mute(),
            can_escalate: self.assessment.severity == Severity::Emergency,
        }
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            readings_processed: self.readings_processed.load(Ordering::Relaxed),
            alarms_started: self.alarms_started.load(Ordering::Relaxed),
            mutes: self.mutes.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            tone_loops_spawned: self.scheduler.loops_spawned(),
            transitions_recorded: self.scheduler.transition_count(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Escalation affordance, offered only while the severity is Emergency
    pub fn escalation(&self) -> Option<Escalation<'_>> {
        (self.assessment.severity == Severity::Emergency).then_some(Escalation { monitor: self })
    }

    /// Escalate now; fails with [`VitalError::NotEmergency`] outside Emergency
    pub fn escalate(&self) -> Result<EscalationOutcome> {
        self.escalation()
            .ok_or(VitalError::NotEmergency(self.assessment.severity))?
            .send()
    }

    /// Stop the tone loop and return to Idle
    pub fn shutdown(&mut self) {
        info!("Monitor shutting down");
        self.scheduler.shutdown();
    }
}

/// Handle for an Emergency escalation
pub struct Escalation<'a> {
    monitor: &'a Monitor,
}

impl Escalation<'_> {
    /// Compose and dispatch in the background
    pub fn send(self) -> Result<EscalationOutcome> {
        let monitor = self.monitor;
        let outcome = monitor.escalator.escalate(
            &monitor.profile,
            monitor.assessment.severity,
            &monitor.store,
        )?;
        monitor.escalations.fetch_add(1, Ordering::Relaxed);
        info!(
            "Escalation for {} sent to {} via {}",
            monitor.profile.display_name,
            outcome.message.destination,
            monitor.escalator.channel_name()
        );
        Ok(outcome)
    }
}
