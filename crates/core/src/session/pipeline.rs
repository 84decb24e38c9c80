use crate::{
    analysis::{FeatureVector, SpectralAnalyzer},
    buffer::RingConsumer,
    config::SmoothingConfig,
    smoothing::{FeatureSmoother, SmoothedState},
    sync::{StatePublisher, StateReader},
    Result,
};

/// One tick of the analysis thread: read a window, analyse, smooth, publish.
///
/// Kept free of threads and clocks so the whole path can be stepped by hand.
#[derive(Debug)]
pub struct AnalysisStage {
    analyzer: SpectralAnalyzer,
    smoother: FeatureSmoother,
    publisher: StatePublisher,
}

impl AnalysisStage {
    pub fn new(
        analyzer: SpectralAnalyzer,
        smoothing: &SmoothingConfig,
        publisher: StatePublisher,
    ) -> Self {
        Self {
            analyzer,
            smoother: FeatureSmoother::new(smoothing),
            publisher,
        }
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    pub fn reader(&self) -> StateReader {
        self.publisher.reader()
    }

    /// Analyses the next window from `ring` and publishes the smoothed
    /// state. An empty or short ring yields a zero-padded, low-confidence
    /// window rather than an error.
    pub fn step(&mut self, ring: &mut RingConsumer) -> Result<FeatureVector> {
        let vector = self.analyzer.analyze_from(ring)?;
        let state = self.smoother.update(&vector).clone();
        self.publisher.publish(state);
        Ok(vector)
    }

    /// Clears analysis and smoothing history and publishes the idle state.
    pub fn reset(&mut self) {
        self.analyzer.reset();
        self.smoother.reset();
        self.publisher
            .publish(SmoothedState::idle(self.analyzer.layout().len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{PcmSource, StreamFormat, ToneSource},
        buffer::sample_ring,
        config::{AnalysisConfig, OverflowPolicy},
        sync::state_channel,
    };

    fn stage(format: StreamFormat) -> (AnalysisStage, StateReader) {
        let config = AnalysisConfig {
            window_size: 512,
            band_count: 16,
            ..Default::default()
        };
        let analyzer = SpectralAnalyzer::new(&config, format).unwrap();
        let (publisher, reader) = state_channel(SmoothedState::idle(16));
        (
            AnalysisStage::new(analyzer, &SmoothingConfig::default(), publisher),
            reader,
        )
    }

    #[test]
    fn step_publishes_smoothed_state() {
        let format = StreamFormat::new(48_000, 1);
        let (mut stage, reader) = stage(format);
        let (mut producer, mut consumer) = sample_ring(4096, OverflowPolicy::DropOldest);
        let mut tone = ToneSource::sine(format, 1000.0, 0.5);
        assert!(producer.write(&tone.pull(512).unwrap()));

        let vector = stage.step(&mut consumer).unwrap();
        assert!(!vector.low_confidence);
        let snapshot = reader.snapshot();
        assert_eq!(snapshot.updates, 1);
        assert_eq!(snapshot.energy, vector.energy);
        assert!(snapshot.energy > 0.0);
    }

    #[test]
    fn producer_stall_fades_to_silence() {
        let format = StreamFormat::new(48_000, 2);
        let (mut stage, reader) = stage(format);
        let (mut producer, mut consumer) = sample_ring(8192, OverflowPolicy::DropOldest);
        let mut tone = ToneSource::sine(format, 440.0, 0.8);
        for _ in 0..4 {
            assert!(producer.write(&tone.pull(1024).unwrap()));
            stage.step(&mut consumer).unwrap();
        }
        let mut previous = reader.snapshot().energy;
        assert!(previous > 0.1);

        // The producer stops delivering; analysis keeps its cadence.
        for _ in 0..100 {
            let vector = stage.step(&mut consumer).unwrap();
            assert!(vector.low_confidence);
            assert!(!vector.is_transient);
            let energy = reader.snapshot().energy;
            assert!(energy <= previous);
            previous = energy;
        }
        assert!(previous < 1e-3);
        assert_eq!(stage.analyzer().summary().low_confidence_windows, 100);
    }

    #[test]
    fn reset_publishes_idle() {
        let format = StreamFormat::new(48_000, 1);
        let (mut stage, reader) = stage(format);
        let (_producer, mut consumer) = sample_ring(1024, OverflowPolicy::DropOldest);
        stage.step(&mut consumer).unwrap();
        assert!(!reader.snapshot().is_idle());

        stage.reset();
        let snapshot = reader.snapshot();
        assert!(snapshot.is_idle());
        assert_eq!(snapshot.bands.len(), 16);
    }
}
