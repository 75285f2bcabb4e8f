// src/tone.rs - Alarm tone parameters, synthesis and audio outputs
//
// Severity is encoded into the sound itself: the Warning tone repeats slowly
// with a soft waveform at a lower pitch, the Emergency tone repeats quickly
// with a harsh waveform at a higher pitch.

use crate::classifier::Severity;
use crate::config::AudioConfig;
use crate::error::{Result, VitalError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Length of the linear fade applied at both ends of a beep
const FADE_MS: u64 = 5;

// ============================================================================
// WAVEFORMS
// ============================================================================

/// Oscillator shape of a beep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

impl Waveform {
    /// Sample the waveform at `phase` (fraction of a cycle), range [-1, 1]
    pub fn sample(&self, phase: f64) -> f64 {
        let p = phase.rem_euclid(1.0);
        match self {
            Waveform::Sine => (TAU * p).sin(),
            Waveform::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * p - 1.0,
        }
    }

    /// Perceived harshness rank, driven by harmonic content
    pub fn harshness(&self) -> u8 {
        match self {
            Waveform::Sine => 0,
            Waveform::Triangle => 1,
            Waveform::Square => 2,
            Waveform::Sawtooth => 3,
        }
    }
}

// ============================================================================
// TONE PROFILES
// ============================================================================

/// Acoustic parameters of one severity's alarm loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneProfile {
    pub waveform: Waveform,

    /// Oscillator pitch
    pub frequency_hz: f64,

    /// Time between the starts of consecutive beeps
    pub period_ms: u64,

    /// Length of a single beep
    #[serde(default = "default_beep_ms")]
    pub beep_ms: u64,

    /// Output amplitude in (0, 1]
    #[serde(default = "default_gain")]
    pub gain: f64,
}

fn default_beep_ms() -> u64 { 300 }
fn default_gain() -> f64 { 0.1 }

impl ToneProfile {
    /// Slow, soft, low-pitched loop
    pub fn warning() -> Self {
        Self {
            waveform: Waveform::Sine,
            frequency_hz: 880.0,
            period_ms: 1200,
            beep_ms: default_beep_ms(),
            gain: default_gain(),
        }
    }

    /// Fast, harsh, high-pitched loop
    pub fn emergency() -> Self {
        Self {
            waveform: Waveform::Sawtooth,
            frequency_hz: 1200.0,
            period_ms: 500,
            beep_ms: default_beep_ms(),
            gain: default_gain(),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn beep_duration(&self) -> Duration {
        Duration::from_millis(self.beep_ms)
    }

    /// Check the profile on its own
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.period_ms == 0 || self.beep_ms == 0 {
            return Err(VitalError::Config(format!(
                "{} tone period and beep length must be non-zero",
                name
            )));
        }
        if self.beep_ms >= self.period_ms {
            return Err(VitalError::Config(format!(
                "{} tone beep ({} ms) must be shorter than its period ({} ms)",
                name, self.beep_ms, self.period_ms
            )));
        }
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(VitalError::Config(format!(
                "{} tone frequency must be positive, got {}",
                name, self.frequency_hz
            )));
        }
        if !(self.gain > 0.0 && self.gain <= 1.0) {
            return Err(VitalError::Config(format!(
                "{} tone gain must be in (0, 1], got {}",
                name, self.gain
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TONE EVENTS
// ============================================================================

/// One discrete beep emitted by the alarm loop
#[derive(Debug, Clone, PartialEq)]
pub struct ToneEvent {
    pub severity: Severity,
    pub waveform: Waveform,
    pub frequency_hz: f64,
    pub duration: Duration,
    pub gain: f64,

    /// Position of the beep within its loop (1-based)
    pub sequence: u64,
}

impl ToneEvent {
    pub fn new(severity: Severity, profile: &ToneProfile, sequence: u64) -> Self {
        Self {
            severity,
            waveform: profile.waveform,
            frequency_hz: profile.frequency_hz,
            duration: profile.beep_duration(),
            gain: profile.gain,
            sequence,
        }
    }

    /// Synthesize the beep as mono PCM samples
    ///
    /// A short linear fade at both ends keeps the beep free of clicks.
    pub fn render(&self, sample_rate: u32) -> Vec<f32> {
        let rate = sample_rate as f64;
        let total = (self.duration.as_secs_f64() * rate).round() as usize;
        let fade = ((FADE_MS as f64 / 1000.0) * rate).round().max(1.0) as usize;

        (0..total)
            .map(|n| {
                let t = n as f64 / rate;
                let envelope = {
                    let from_start = n as f64 / fade as f64;
                    let from_end = (total - n) as f64 / fade as f64;
                    from_start.min(from_end).min(1.0)
                };
                (self.waveform.sample(self.frequency_hz * t) * self.gain * envelope) as f32
            })
            .collect()
    }
}

// ============================================================================
// AUDIO OUTPUTS
// ============================================================================

/// Platform audio facility consuming tone events
///
/// Implementations must not block: a beep is handed off, not waited for.
#[cfg_attr(test, mockall::automock)]
pub trait ToneOutput: Send + Sync {
    fn play(&self, tone: &ToneEvent) -> Result<()>;
}

/// Acquires the single audio output on first use
pub trait AudioBackend: Send + Sync {
    fn open(&self) -> Result<Arc<dyn ToneOutput>>;
}

impl<F> AudioBackend for F
where
    F: Fn() -> Result<Arc<dyn ToneOutput>> + Send + Sync,
{
    fn open(&self) -> Result<Arc<dyn ToneOutput>> {
        self()
    }
}

impl AudioBackend for AudioConfig {
    fn open(&self) -> Result<Arc<dyn ToneOutput>> {
        match self {
            AudioConfig::Log => Ok(Arc::new(LogToneOutput)),
            AudioConfig::Pcm { path, sample_rate } => {
                Ok(Arc::new(PcmToneOutput::create(path, *sample_rate)?))
            }
            AudioConfig::None => Err(VitalError::AudioUnavailable(
                "audio output disabled in configuration".into(),
            )),
        }
    }
}

/// Writes each beep to the log instead of a speaker
#[derive(Debug, Default, Clone, Copy)]
pub struct LogToneOutput;

impl ToneOutput for LogToneOutput {
    fn play(&self, tone: &ToneEvent) -> Result<()> {
        info!(
            "BEEP #{} [{}] {:?} {:.0} Hz for {} ms",
            tone.sequence,
            tone.severity,
            tone.waveform,
            tone.frequency_hz,
            tone.duration.as_millis()
        );
        Ok(())
    }
}

/// Streams rendered beeps as raw little-endian f32 mono samples
///
/// Rendering and writing happen on a dedicated writer thread; `play` only
/// queues the event. Dropping the output drains the queue and joins the
/// thread.
pub struct PcmToneOutput {
    queue: Option<mpsc::UnboundedSender<ToneEvent>>,
    writer: Option<thread::JoinHandle<()>>,
}

impl PcmToneOutput {
    pub fn new(writer: Box<dyn Write + Send>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(VitalError::Config("PCM sample rate must be non-zero".into()));
        }
        let (queue, rx) = mpsc::unbounded_channel();
        let handle = thread::Builder::new()
            .name("vitalguard-pcm".into())
            .spawn(move || write_tones(writer, rx, sample_rate))?;

        Ok(Self {
            queue: Some(queue),
            writer: Some(handle),
        })
    }

    /// Open (truncate) a file sink
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        if sample_rate == 0 {
            return Err(VitalError::Config("PCM sample rate must be non-zero".into()));
        }
        let file = File::create(path)?;
        debug!("PCM alarm output opened at {} ({} Hz)", path.display(), sample_rate);
        Self::new(Box::new(BufWriter::new(file)), sample_rate)
    }
}

fn write_tones(
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::UnboundedReceiver<ToneEvent>,
    sample_rate: u32,
) {
    while let Some(tone) = rx.blocking_recv() {
        let samples = tone.render(sample_rate);
        let written = samples
            .iter()
            .try_for_each(|sample| writer.write_all(&sample.to_le_bytes()))
            .and_then(|_| writer.flush());
        if let Err(e) = written {
            warn!("PCM write failed for beep #{}: {}", tone.sequence, e);
        }
    }
    debug!("PCM writer stopped");
}

impl ToneOutput for PcmToneOutput {
    fn play(&self, tone: &ToneEvent) -> Result<()> {
        self.queue
            .as_ref()
            .and_then(|queue| queue.send(tone.clone()).ok())
            .ok_or_else(|| VitalError::AudioUnavailable("PCM writer has stopped".into()))
    }
}

impl Drop for PcmToneOutput {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                warn!("PCM writer thread panicked");
            }
        }
    }
}

/// Keeps every beep in memory, for headless front ends and tests
#[derive(Debug, Default)]
pub struct RecordingToneOutput {
    tones: Mutex<Vec<ToneEvent>>,
}

impl RecordingToneOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tones(&self) -> Vec<ToneEvent> {
        self.tones.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.tones.lock().len()
    }

    pub fn clear(&self) {
        self.tones.lock().clear();
    }
}

impl ToneOutput for RecordingToneOutput {
    fn play(&self, tone: &ToneEvent) -> Result<()> {
        self.tones.lock().push(tone.clone());
        Ok(())
    }
}
