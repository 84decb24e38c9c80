//! Core library for the spectra audio visualiser.
//!
//! Audio flows one way through the crate: a [`PcmSource`] feeds a lock-free
//! ring buffer on the producer thread, the [`SpectralAnalyzer`] turns fixed
//! windows into feature vectors on the analysis thread, the
//! [`FeatureSmoother`] folds them into a [`SmoothedState`], and render
//! threads read that state through a [`RenderSynchronizer`] that maps it to
//! [`RenderParameters`] for a host-supplied [`SceneRenderer`].

pub mod analysis;
pub mod audio;
pub mod buffer;
pub mod config;
pub mod error;
pub mod mapping;
pub mod render;
pub mod session;
pub mod smoothing;
pub mod sync;
pub mod timeline;

pub use analysis::{AnalysisSummary, BandLayout, FeatureVector, SpectralAnalyzer};
pub use audio::{PcmSource, SourceSpec, StreamFormat};
pub use buffer::{sample_ring, RingConsumer, RingProducer, RingStats};
pub use config::{AppConfig, AudioConfig, OverflowPolicy, StopPolicy, VisualMode};
pub use error::{Result, SourceFault, SpectraError};
pub use mapping::{hsv_to_rgba, map_state, RenderParameters};
pub use render::{projection, BarGeometry, FrameLoop, FrameStats, SceneRenderer};
pub use session::{
    analyze_offline, analyze_offline_for, AnalysisStage, OfflineAnalysis, Session, SessionState,
    SessionStats,
};
pub use smoothing::{FeatureSmoother, SmoothedState, SmootherPhase};
pub use sync::{state_channel, RenderSynchronizer, StatePublisher, StateReader};
pub use timeline::Cadence;
