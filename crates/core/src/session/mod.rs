//! Session lifecycle: one producer thread feeding the ring buffer, one
//! analysis thread draining it at a fixed cadence, and any number of render
//! threads reading the published state.

mod offline;
mod pipeline;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::SpectralAnalyzer,
    audio::{PcmSource, SourceSpec, StreamFormat},
    buffer::{sample_ring, RingConsumer, RingProducer},
    config::{AppConfig, StopPolicy},
    smoothing::SmoothedState,
    sync::{state_channel, StateReader},
    timeline::Cadence,
    Result, SpectraError,
};

pub use offline::{analyze_offline, analyze_offline_for, OfflineAnalysis};
pub use pipeline::AnalysisStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    Paused,
    /// The source stopped delivering; analysis continues on silence.
    Idle,
    Stopped,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Idle,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Paused => 2,
            Self::Idle => 3,
            Self::Stopped => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub windows: u64,
    pub low_confidence_windows: u64,
    pub ring_overflows: u64,
    pub dropped_samples: u64,
    pub producer_stalls: u64,
    pub cadence_slips: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    paused: AtomicBool,
    stop_producer: AtomicBool,
    stop_analysis: AtomicBool,
    windows: AtomicU64,
    low_confidence_windows: AtomicU64,
    ring_overflows: AtomicU64,
    dropped_samples: AtomicU64,
    producer_stalls: AtomicU64,
    producer_slips: AtomicU64,
    analysis_slips: AtomicU64,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

type Opened = Result<(StreamFormat, RingConsumer)>;

/// A running capture/analysis session.
///
/// Dropping the session stops it.
#[derive(Debug)]
pub struct Session {
    config: AppConfig,
    format: StreamFormat,
    shared: Arc<Shared>,
    reader: StateReader,
    producer: Option<JoinHandle<()>>,
    analysis: Option<JoinHandle<(AnalysisStage, RingConsumer)>>,
}

impl Session {
    /// Opens `source` and starts analysing it.
    pub fn start(config: &AppConfig, source: SourceSpec) -> Result<Self> {
        let audio = config.audio.clone();
        Self::start_with(config, move || source.open(&audio))
    }

    /// Starts a session over a custom source. `open` runs on the producer
    /// thread, which then owns the source for its whole life.
    pub fn start_with<F>(config: &AppConfig, open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn PcmSource>> + Send + 'static,
    {
        config.validate()?;
        let shared = Arc::new(Shared::default());
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Opened>(1);

        let producer = {
            let shared = Arc::clone(&shared);
            let audio = config.audio.clone();
            thread::Builder::new()
                .name("spectra-producer".into())
                .spawn(move || {
                    let source = match open() {
                        Ok(source) => source,
                        Err(err) => {
                            let _ = opened_tx.send(Err(err));
                            return;
                        }
                    };
                    let format = source.format();
                    let capacity = audio.ring_buffer_capacity * format.channel_count();
                    let (ring, consumer) = sample_ring(capacity, audio.overflow_policy);
                    if opened_tx.send(Ok((format, consumer))).is_err() {
                        return;
                    }
                    tracing::info!(source = %source.describe(), capacity, "producer started");
                    pump(source, ring, &shared, audio.pull_period_frames);
                })?
        };

        let opened = opened_rx
            .recv()
            .unwrap_or_else(|_| Err(SpectraError::msg("producer thread exited during open")));
        let (format, consumer) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                let _ = producer.join();
                return Err(err);
            }
        };

        let analyzer = match SpectralAnalyzer::new(&config.analysis, format) {
            Ok(analyzer) => analyzer,
            Err(err) => {
                shared.stop_producer.store(true, Ordering::Release);
                let _ = producer.join();
                return Err(err);
            }
        };
        let (publisher, reader) = state_channel(SmoothedState::idle(analyzer.layout().len()));
        let stage = AnalysisStage::new(analyzer, &config.smoothing, publisher);

        let analysis = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("spectra-analysis".into())
                .spawn(move || analyse(stage, consumer, &shared))
        };
        let analysis = match analysis {
            Ok(handle) => handle,
            Err(err) => {
                shared.stop_producer.store(true, Ordering::Release);
                let _ = producer.join();
                return Err(err.into());
            }
        };

        // The producer may already have hit end of stream.
        shared.transition(SessionState::Starting, SessionState::Running);
        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "session started"
        );

        Ok(Self {
            config: config.clone(),
            format,
            shared,
            reader,
            producer: Some(producer),
            analysis: Some(analysis),
        })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn reader(&self) -> StateReader {
        self.reader.clone()
    }

    pub fn stats(&self) -> SessionStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let shared = &self.shared;
        SessionStats {
            windows: load(&shared.windows),
            low_confidence_windows: load(&shared.low_confidence_windows),
            ring_overflows: load(&shared.ring_overflows),
            dropped_samples: load(&shared.dropped_samples),
            producer_stalls: load(&shared.producer_stalls),
            cadence_slips: load(&shared.producer_slips) + load(&shared.analysis_slips),
        }
    }

    /// Stops pulling from the source. Analysis keeps running on silence.
    pub fn pause(&self) -> bool {
        self.shared.paused.store(true, Ordering::Release);
        self.shared
            .transition(SessionState::Running, SessionState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.shared.paused.store(false, Ordering::Release);
        self.shared
            .transition(SessionState::Paused, SessionState::Running)
    }

    /// Halts the producer, then analysis, discards buffered audio and
    /// applies the configured stop policy. Idempotent.
    pub fn stop(&mut self) {
        if let Some(producer) = self.producer.take() {
            self.shared.stop_producer.store(true, Ordering::Release);
            if producer.join().is_err() {
                tracing::error!("producer thread panicked");
            }
        }

        if let Some(analysis) = self.analysis.take() {
            self.shared.stop_analysis.store(true, Ordering::Release);
            match analysis.join() {
                Ok((mut stage, mut ring)) => {
                    ring.clear();
                    match self.config.render.stop_policy {
                        StopPolicy::Reset => stage.reset(),
                        StopPolicy::Hold => {}
                    }
                }
                Err(_) => tracing::error!("analysis thread panicked"),
            }
            tracing::info!(stats = ?self.stats(), "session stopped");
        }

        self.shared.set_state(SessionState::Stopped);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer loop: pull, write, pace by the audio actually obtained.
fn pump(
    mut source: Box<dyn PcmSource>,
    mut ring: RingProducer,
    shared: &Shared,
    pull_period_frames: usize,
) {
    let format = source.format();
    let channels = format.channel_count();
    let pull_period = Duration::from_secs_f64(format.frames_to_seconds(pull_period_frames));
    let mut cadence = Cadence::new(pull_period);
    let mut pending: Vec<f32> = Vec::new();
    let mut was_paused = false;

    while !shared.stop_producer.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) {
            was_paused = true;
            cadence.set_period(pull_period);
            cadence.wait();
            continue;
        }
        if was_paused {
            was_paused = false;
            cadence.reset();
        }

        if pending.is_empty() {
            match source.pull(pull_period_frames * channels) {
                Ok(chunk) => pending = chunk,
                Err(err) => {
                    match &err {
                        SpectraError::SourceUnavailable(fault) if fault.is_recoverable() => {
                            tracing::warn!(%fault, "source unavailable, fading out")
                        }
                        _ => tracing::error!(%err, "source failed, fading out"),
                    }
                    shared.set_state(SessionState::Idle);
                    break;
                }
            }
        }

        let frames = pending.len() / channels;
        if !pending.is_empty() {
            if ring.write(&pending) {
                pending.clear();
            } else {
                shared.producer_stalls.fetch_add(1, Ordering::Relaxed);
            }
        }
        let stats = ring.stats();
        shared.ring_overflows.store(stats.overflows, Ordering::Relaxed);
        shared.dropped_samples.store(stats.dropped_samples, Ordering::Relaxed);

        let period = if frames > 0 {
            Duration::from_secs_f64(format.frames_to_seconds(frames))
        } else {
            pull_period
        };
        cadence.set_period(period);
        cadence.wait();
        shared.producer_slips.store(cadence.slips(), Ordering::Relaxed);
    }

    drop(source);
    tracing::debug!("producer exited");
}

/// Analysis loop: one window per tick until told to stop.
fn analyse(
    mut stage: AnalysisStage,
    mut ring: RingConsumer,
    shared: &Shared,
) -> (AnalysisStage, RingConsumer) {
    let period = Duration::from_secs_f32(stage.analyzer().window_seconds());
    let mut cadence = Cadence::new(period);

    while !shared.stop_analysis.load(Ordering::Acquire) {
        cadence.wait();
        match stage.step(&mut ring) {
            Ok(vector) => {
                shared.windows.fetch_add(1, Ordering::Relaxed);
                if vector.low_confidence {
                    shared
                        .low_confidence_windows
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => tracing::warn!(%err, "analysis step failed"),
        }
        shared.analysis_slips.store(cadence.slips(), Ordering::Relaxed);
    }

    (stage, ring)
}
