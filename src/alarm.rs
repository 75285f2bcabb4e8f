// File: src/alarm.rs
// Acoustic alarm state machine
//
// The scheduler turns aggregate severities into an AlarmState and owns the
// single repeating tone loop. States:
//
//   Idle ──alarming──▶ Sounding(s) ──mute──▶ Muted(s)
//     ▲                    │  ▲                 │
//     └──────Stable────────┘  └──fresh evidence─┘
//     ▲                                         │
//     └──────────────────Stable─────────────────┘

use crate::classifier::Severity;
use crate::config::AlarmConfig;
use crate::tone::{AudioBackend, ToneEvent, ToneOutput, ToneProfile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

// ==========================================
// SECTION 1: STATE AND TRANSITIONS
// ==========================================

/// State of the acoustic alarm as shown to the UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "severity", rename_all = "snake_case")]
pub enum AlarmState {
    /// No alarm; the aggregate severity is Stable
    #[default]
    Idle,

    /// The tone loop for this severity is (or should be) running
    Sounding(Severity),

    /// The caregiver silenced this episode; severity is still tracked
    Muted(Severity),
}

impl AlarmState {
    /// Severity carried by the state, Stable when idle
    pub fn severity(&self) -> Severity {
        match self {
            AlarmState::Idle => Severity::Stable,
            AlarmState::Sounding(s) | AlarmState::Muted(s) => *s,
        }
    }

    pub fn is_sounding(&self) -> bool {
        matches!(self, AlarmState::Sounding(_))
    }

    pub fn is_muted(&self) -> bool {
        matches!(self, AlarmState::Muted(_))
    }

    /// Whether the UI should offer the mute affordance
    pub fn can_mute(&self) -> bool {
        self.is_sounding()
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmState::Idle => f.write_str("Idle"),
            AlarmState::Sounding(s) => write!(f, "Sounding({})", s),
            AlarmState::Muted(s) => write!(f, "Muted({})", s),
        }
    }
}

/// What caused a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// A reclassification after a new reading
    Reading,

    /// An explicit mute request
    Mute,

    /// Engine teardown
    Teardown,
}

/// One entry of the transition log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmTransition {
    pub at: DateTime<Utc>,
    pub from: AlarmState,
    pub to: AlarmState,
    pub cause: TransitionCause,
}

/// Tone profile per alarming severity
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmTones {
    pub warning: ToneProfile,
    pub emergency: ToneProfile,
}

impl AlarmTones {
    pub fn for_severity(&self, severity: Severity) -> Option<&ToneProfile> {
        match severity {
            Severity::Stable => None,
            Severity::Warning => Some(&self.warning),
            Severity::Emergency => Some(&self.emergency),
        }
    }
}

impl Default for AlarmTones {
    fn default() -> Self {
        Self {
            warning: ToneProfile::warning(),
            emergency: ToneProfile::emergency(),
        }
    }
}

impl From<&AlarmConfig> for AlarmTones {
    fn from(config: &AlarmConfig) -> Self {
        Self {
            warning: config.warning.clone(),
            emergency: config.emergency.clone(),
        }
    }
}

// ==========================================
// SECTION 2: TONE LOOP
// ==========================================

/// Parameters the running loop plays with
#[derive(Debug, Clone, PartialEq)]
struct ToneParams {
    severity: Severity,
    profile: ToneProfile,
}

/// Handle to the single running tone loop
struct ToneLoop {
    severity: Severity,
    tx: watch::Sender<ToneParams>,
    handle: JoinHandle<()>,
}

impl ToneLoop {
    fn spawn(output: Arc<dyn ToneOutput>, params: ToneParams) -> Option<Self> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime available, {} alarm stays silent", params.severity);
                return None;
            }
        };

        let severity = params.severity;
        let (tx, rx) = watch::channel(params);
        let handle = runtime.spawn(run_tone_loop(output, rx));

        Some(Self {
            severity,
            tx,
            handle,
        })
    }

    fn cancel(self) {
        self.handle.abort();
    }
}

fn ticker_for(profile: &ToneProfile, immediate: bool) -> Interval {
    let period = profile.period();
    let mut ticker = if immediate {
        interval(period)
    } else {
        interval_at(Instant::now() + period, period)
    };
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Beep once immediately, then once per period, until aborted
///
/// A retune to a higher severity beeps immediately with the new profile; a
/// retune downwards waits one new period first.
async fn run_tone_loop(output: Arc<dyn ToneOutput>, mut rx: watch::Receiver<ToneParams>) {
    let mut params = rx.borrow_and_update().clone();
    let mut ticker = ticker_for(&params.profile, true);
    let mut sequence: u64 = 0;

    debug!("{} tone loop started", params.severity);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sequence += 1;
                let tone = ToneEvent::new(params.severity, &params.profile, sequence);
                if let Err(e) = output.play(&tone) {
                    warn!("Alarm tone #{} could not be played: {}", sequence, e);
                }
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = rx.borrow_and_update().clone();
                let rising = next.severity > params.severity;
                ticker = ticker_for(&next.profile, rising);
                debug!("Tone loop retuned {} -> {}", params.severity, next.severity);
                params = next;
            }
        }
    }

    debug!("{} tone loop ended after {} beeps", params.severity, sequence);
}

// ==========================================
// SECTION 3: SCHEDULER
// ==========================================

enum AudioSlot {
    Pending(Box<dyn AudioBackend>),
    Ready(Arc<dyn ToneOutput>),
    Unavailable,
}

/// Owner of the alarm state and of the single tone loop
///
/// All transitions are driven through [`AlarmScheduler::on_assessment`],
/// [`AlarmScheduler::mute`] and [`AlarmScheduler::shutdown`]. Repeated calls
/// with unchanged input are no-ops, so at most one loop ever runs.
pub struct AlarmScheduler {
    state: AlarmState,
    tones: AlarmTones,
    audio: AudioSlot,
    active: Option<ToneLoop>,
    transitions: VecDeque<AlarmTransition>,
    transition_capacity: usize,
    loops_spawned: u64,
}

impl AlarmScheduler {
    pub fn new(config: &AlarmConfig, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            state: AlarmState::Idle,
            tones: AlarmTones::from(config),
            audio: AudioSlot::Pending(backend),
            active: None,
            transitions: VecDeque::new(),
            transition_capacity: config.transition_log_capacity.max(1),
            loops_spawned: 0,
        }
    }

    /// Replace the audio backend; takes effect for the next loop started
    pub fn set_audio_backend(&mut self, backend: Box<dyn AudioBackend>) {
        self.audio = AudioSlot::Pending(backend);
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Severity of the loop currently producing tones
    pub fn active_tone(&self) -> Option<Severity> {
        self.active
            .as_ref()
            .filter(|tone_loop| !tone_loop.handle.is_finished())
            .map(|tone_loop| tone_loop.severity)
    }

    /// True while a tone loop is running
    pub fn is_audible(&self) -> bool {
        self.active_tone().is_some()
    }

    /// Number of tone loops started over the scheduler's lifetime
    pub fn loops_spawned(&self) -> u64 {
        self.loops_spawned
    }

    /// Recorded transitions, oldest first
    pub fn transitions(&self) -> Vec<AlarmTransition> {
        self.transitions.iter().cloned().collect()
    }

    /// Number of transitions currently held in the bounded log
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Apply a new aggregate severity
    ///
    /// `fresh_evidence` tells whether the assessment follows a reading that
    /// became the latest of a monitored vital; only such readings re-arm a
    /// muted alarm. Returns the transition taken, if any.
    pub fn on_assessment(
        &mut self,
        severity: Severity,
        fresh_evidence: bool,
    ) -> Option<AlarmTransition> {
        let next = match (self.state, severity) {
            (AlarmState::Idle, Severity::Stable) => return None,
            (_, Severity::Stable) => AlarmState::Idle,
            (AlarmState::Idle, s) => AlarmState::Sounding(s),
            (AlarmState::Sounding(current), s) if current == s => return None,
            (AlarmState::Sounding(_), s) => AlarmState::Sounding(s),
            (AlarmState::Muted(_), s) if fresh_evidence => AlarmState::Sounding(s),
            (AlarmState::Muted(current), s) if current == s => return None,
            (AlarmState::Muted(_), s) => AlarmState::Muted(s),
        };

        match next {
            AlarmState::Sounding(s) => self.sound(s),
            _ => self.silence(),
        }

        Some(self.transition(next, TransitionCause::Reading))
    }

    /// Mute the current episode
    ///
    /// Only valid while sounding; otherwise a no-op returning `false`.
    pub fn mute(&mut self) -> bool {
        match self.state {
            AlarmState::Sounding(s) => {
                self.silence();
                self.transition(AlarmState::Muted(s), TransitionCause::Mute);
                true
            }
            _ => {
                debug!("Mute ignored in state {}", self.state);
                false
            }
        }
    }

    /// Stop the loop and return to Idle
    pub fn shutdown(&mut self) {
        self.silence();
        if self.state != AlarmState::Idle {
            self.transition(AlarmState::Idle, TransitionCause::Teardown);
        }
    }

    /// Start or retune the loop for `severity`
    fn sound(&mut self, severity: Severity) {
        let profile = match self.tones.for_severity(severity) {
            Some(profile) => profile.clone(),
            None => return,
        };
        let params = ToneParams { severity, profile };

        if let Some(active) = self.active.as_mut() {
            if !active.handle.is_finished() {
                if active.severity != severity {
                    active.severity = severity;
                    active.tx.send_replace(params);
                }
                return;
            }
        }
        if let Some(stale) = self.active.take() {
            stale.cancel();
        }

        let output = match self.output() {
            Some(output) => output,
            None => return,
        };
        if let Some(tone_loop) = ToneLoop::spawn(output, params) {
            self.loops_spawned += 1;
            self.active = Some(tone_loop);
        }
    }

    fn silence(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Cancelling {} tone loop", active.severity);
            active.cancel();
        }
    }

    /// Acquire the audio output on first use; failures are permanent
    fn output(&mut self) -> Option<Arc<dyn ToneOutput>> {
        match std::mem::replace(&mut self.audio, AudioSlot::Unavailable) {
            AudioSlot::Ready(output) => {
                self.audio = AudioSlot::Ready(Arc::clone(&output));
                Some(output)
            }
            AudioSlot::Pending(backend) => match backend.open() {
                Ok(output) => {
                    debug!("Audio output acquired");
                    self.audio = AudioSlot::Ready(Arc::clone(&output));
                    Some(output)
                }
                Err(e) => {
                    warn!("Audio output unavailable, alarms will be silent: {}", e);
                    None
                }
            },
            AudioSlot::Unavailable => None,
        }
    }

    fn transition(&mut self, to: AlarmState, cause: TransitionCause) -> AlarmTransition {
        let record = AlarmTransition {
            at: Utc::now(),
            from: self.state,
            to,
            cause,
        };
        info!("Alarm {} -> {} ({:?})", record.from, record.to, cause);

        self.state = to;
        if self.transitions.len() >= self.transition_capacity {
            self.transitions.pop_front();
        }
        self.transitions.push_back(record.clone());
        record
    }
}

impl Drop for AlarmScheduler {
    fn drop(&mut self) {
        self.silence();
    }
}

impl fmt::Debug for AlarmScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmScheduler")
            .field("state", &self.state)
            .field("active_tone", &self.active_tone())
            .field("loops_spawned", &self.loops_spawned)
            .finish()
    }
}

// ==========================================
// SECTION 4: TESTS
// ==========================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, VitalError};
    use crate::tone::{RecordingToneOutput, Waveform};
    use std::time::Duration;
    use tokio::time::sleep;

    fn recording_scheduler() -> (AlarmScheduler, Arc<RecordingToneOutput>) {
        let recorder = Arc::new(RecordingToneOutput::new());
        let shared = Arc::clone(&recorder);
        let backend = move || -> Result<Arc<dyn ToneOutput>> {
            let output: Arc<dyn ToneOutput> = shared.clone();
            Ok(output)
        };
        let scheduler = AlarmScheduler::new(&AlarmConfig::default(), Box::new(backend));
        (scheduler, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_loop_beeps_fast_and_harsh() {
        let (mut scheduler, recorder) = recording_scheduler();

        scheduler.on_assessment(Severity::Emergency, true);
        assert_eq!(scheduler.state(), AlarmState::Sounding(Severity::Emergency));

        sleep(Duration::from_millis(1250)).await;
        let tones = recorder.tones();
        assert_eq!(tones.len(), 3);
        assert!(tones.iter().all(|t| t.waveform == Waveform::Sawtooth));
        assert!(tones.iter().all(|t| t.frequency_hz == 1200.0));
        assert_eq!(tones[2].sequence, 3);

        scheduler.shutdown();
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(recorder.count(), 3);
        assert_eq!(scheduler.state(), AlarmState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_start_keeps_one_loop() {
        let (mut scheduler, recorder) = recording_scheduler();

        assert!(scheduler.on_assessment(Severity::Warning, true).is_some());
        assert!(scheduler.on_assessment(Severity::Warning, true).is_none());
        assert!(scheduler.on_assessment(Severity::Warning, false).is_none());
        assert_eq!(scheduler.loops_spawned(), 1);

        sleep(Duration::from_millis(1300)).await;
        // one beep at start, one after a single warning period
        assert_eq!(recorder.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rising_severity_retunes_same_loop() {
        let (mut scheduler, recorder) = recording_scheduler();

        scheduler.on_assessment(Severity::Warning, true);
        sleep(Duration::from_millis(100)).await;
        scheduler.on_assessment(Severity::Emergency, true);
        sleep(Duration::from_millis(10)).await;

        let tones = recorder.tones();
        assert_eq!(tones.len(), 2);
        assert_eq!(tones[0].severity, Severity::Warning);
        assert_eq!(tones[1].severity, Severity::Emergency);
        assert_eq!(scheduler.loops_spawned(), 1);
        assert_eq!(scheduler.active_tone(), Some(Severity::Emergency));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_and_rearm() {
        let (mut scheduler, recorder) = recording_scheduler();

        scheduler.on_assessment(Severity::Warning, true);
        sleep(Duration::from_millis(10)).await;
        assert!(scheduler.mute());
        assert_eq!(scheduler.state(), AlarmState::Muted(Severity::Warning));
        assert!(!scheduler.is_audible());
        assert!(!scheduler.mute());

        sleep(Duration::from_millis(5000)).await;
        assert_eq!(recorder.count(), 1);

        // stale evidence keeps the episode muted
        assert!(scheduler.on_assessment(Severity::Warning, false).is_none());
        assert!(scheduler.state().is_muted());

        scheduler.on_assessment(Severity::Warning, true);
        assert_eq!(scheduler.state(), AlarmState::Sounding(Severity::Warning));
        assert_eq!(scheduler.loops_spawned(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_stops_alarm_from_any_state() {
        let (mut scheduler, _recorder) = recording_scheduler();

        scheduler.on_assessment(Severity::Emergency, true);
        scheduler.on_assessment(Severity::Stable, true);
        assert_eq!(scheduler.state(), AlarmState::Idle);
        assert!(!scheduler.is_audible());

        scheduler.on_assessment(Severity::Warning, true);
        scheduler.mute();
        scheduler.on_assessment(Severity::Stable, true);
        assert_eq!(scheduler.state(), AlarmState::Idle);

        let causes: Vec<TransitionCause> =
            scheduler.transitions().iter().map(|t| t.cause).collect();
        assert_eq!(
            causes,
            vec![
                TransitionCause::Reading,
                TransitionCause::Reading,
                TransitionCause::Reading,
                TransitionCause::Mute,
                TransitionCause::Reading,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_failure_is_silent_and_permanent() {
        let attempts = Arc::new(parking_lot::Mutex::new(0u32));
        let counter = Arc::clone(&attempts);
        let backend = move || -> Result<Arc<dyn ToneOutput>> {
            *counter.lock() += 1;
            Err(VitalError::AudioUnavailable("no sound card".into()))
        };
        let mut scheduler = AlarmScheduler::new(&AlarmConfig::default(), Box::new(backend));

        scheduler.on_assessment(Severity::Emergency, true);
        assert_eq!(scheduler.state(), AlarmState::Sounding(Severity::Emergency));
        assert!(!scheduler.is_audible());

        scheduler.on_assessment(Severity::Stable, true);
        scheduler.on_assessment(Severity::Warning, true);
        assert_eq!(scheduler.state(), AlarmState::Sounding(Severity::Warning));
        assert_eq!(*attempts.lock(), 1);
        assert_eq!(scheduler.loops_spawned(), 0);
    }

    #[test]
    fn test_without_runtime_state_still_transitions() {
        let (mut scheduler, recorder) = recording_scheduler();
        scheduler.on_assessment(Severity::Warning, true);
        assert_eq!(scheduler.state(), AlarmState::Sounding(Severity::Warning));
        assert!(!scheduler.is_audible());
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn test_transition_log_is_bounded() {
        let mut config = AlarmConfig::default();
        config.transition_log_capacity = 2;
        let mut scheduler = AlarmScheduler::new(&config, Box::new(crate::config::AudioConfig::None));

        scheduler.on_assessment(Severity::Warning, true);
        scheduler.on_assessment(Severity::Emergency, true);
        scheduler.on_assessment(Severity::Stable, true);

        let transitions = scheduler.transitions();
        assert_eq!(transitions.len(), 2);
        assert_eq!(scheduler.transition_count(), 2);
        assert_eq!(transitions[1].to, AlarmState::Idle);
    }
}
