//! Spectral analysis: one window of PCM in, one [`FeatureVector`] out.

mod bands;
mod normalize;

use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{
    audio::StreamFormat,
    buffer::RingConsumer,
    config::{AnalysisConfig, WindowFunction},
    Result, SpectraError,
};

pub use bands::BandLayout;
use normalize::{scale, Normalizer};

const MAX_BEAT_HISTORY: usize = 32;

/// Summary of the analysis metadata accumulated so far.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub windows: u64,
    pub low_confidence_windows: u64,
    pub tempo_bpm: Option<f32>,
    pub duration_seconds: Option<f32>,
}

/// Features extracted from a single analysis window. Every value is
/// normalised to `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub sequence: u64,
    /// Centre of the window, in seconds since the stream started.
    pub time: f32,
    pub bands: Vec<f32>,
    pub energy: f32,
    /// Continuous transient strength.
    pub transient: f32,
    pub is_transient: bool,
    /// Normalised [0, 1] spectral centroid where 1.0 corresponds to the
    /// Nyquist frequency.
    pub spectral_centroid: f32,
    /// Set when the window had to be zero-padded.
    pub low_confidence: bool,
}

/// Turns fixed-size PCM windows into feature vectors.
///
/// Windowing, the real FFT, band reduction, normalisation and transient
/// detection all happen here. The analyzer owns its scratch buffers, so
/// steady-state analysis does not allocate apart from the output vector.
pub struct SpectralAnalyzer {
    config: AnalysisConfig,
    format: StreamFormat,
    layout: BandLayout,
    coefficients: Vec<f32>,
    magnitude_scale: f32,
    fft: FftResources,
    interleaved: Vec<f32>,
    magnitudes: Vec<f32>,
    raw_bands: Vec<f32>,
    band_norm: Normalizer,
    energy_norm: Normalizer,
    last_energy: f32,
    last_transient: Option<f32>,
    beat_timestamps: Vec<f32>,
    summary: AnalysisSummary,
    sequence: u64,
}

impl SpectralAnalyzer {
    pub fn new(config: &AnalysisConfig, format: StreamFormat) -> Result<Self> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(SpectraError::config(format!(
                "unusable stream format {format:?}"
            )));
        }
        let window_size = config.window_size;
        if !window_size.is_power_of_two() || window_size < 2 {
            return Err(SpectraError::config(format!(
                "window_size must be a power of two, got {window_size}"
            )));
        }
        if config.band_count == 0 || config.band_count > window_size / 2 {
            return Err(SpectraError::config(format!(
                "band_count must be in 1..={}, got {}",
                window_size / 2,
                config.band_count
            )));
        }

        let layout = BandLayout::new(
            config.band_scale,
            config.band_count,
            window_size,
            format.sample_rate,
            config.min_frequency,
        );
        let coefficients = window_coefficients(config.window_function, window_size);
        let coefficient_sum: f32 = coefficients.iter().sum();
        let magnitude_scale = if coefficient_sum > f32::EPSILON {
            2.0 / coefficient_sum
        } else {
            0.0
        };

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(window_size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        tracing::debug!(
            window_size,
            bands = config.band_count,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "spectral analyzer ready"
        );

        Ok(Self {
            band_norm: Normalizer::new(&config.normalization, config.silence_floor),
            energy_norm: Normalizer::new(&config.normalization, config.silence_floor),
            config: config.clone(),
            format,
            layout,
            coefficients,
            magnitude_scale,
            fft,
            interleaved: vec![0.0; window_size * format.channel_count()],
            magnitudes: vec![0.0; window_size / 2 + 1],
            raw_bands: vec![0.0; config.band_count],
            last_energy: 0.0,
            last_transient: None,
            beat_timestamps: Vec::new(),
            summary: AnalysisSummary {
                sample_rate: format.sample_rate,
                ..Default::default()
            },
            sequence: 0,
        })
    }

    /// Interleaved samples making up one window.
    pub fn window_samples(&self) -> usize {
        self.config.window_size * self.format.channel_count()
    }

    /// Wall-clock length of one window.
    pub fn window_seconds(&self) -> f32 {
        self.config.window_size as f32 / self.format.sample_rate as f32
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn layout(&self) -> &BandLayout {
        &self.layout
    }

    /// Returns metadata collected so far about the analysed stream.
    pub fn summary(&self) -> &AnalysisSummary {
        &self.summary
    }

    /// Clears the accumulated state while preserving configuration.
    pub fn reset(&mut self) {
        self.summary = AnalysisSummary {
            sample_rate: self.format.sample_rate,
            ..Default::default()
        };
        self.band_norm.reset();
        self.energy_norm.reset();
        self.last_energy = 0.0;
        self.last_transient = None;
        self.beat_timestamps.clear();
        self.sequence = 0;
    }

    /// Pulls exactly one window from the ring and analyses it. Missing
    /// samples are zero-padded and the vector is marked low-confidence.
    pub fn analyze_from(&mut self, ring: &mut RingConsumer) -> Result<FeatureVector> {
        let report = ring.read_into(&mut self.interleaved);
        self.process(report.filled)
    }

    /// Analyses an interleaved window directly. Shorter input is
    /// zero-padded; longer input is rejected.
    pub fn analyze(&mut self, samples: &[f32]) -> Result<FeatureVector> {
        if samples.len() > self.interleaved.len() {
            return Err(SpectraError::InvalidInput(
                "analysis input is longer than one window",
            ));
        }
        self.interleaved[..samples.len()].copy_from_slice(samples);
        self.interleaved[samples.len()..].fill(0.0);
        self.process(samples.len())
    }

    fn process(&mut self, filled: usize) -> Result<FeatureVector> {
        let window_size = self.config.window_size;
        let channels = self.format.channel_count();
        let mut corrupt = false;

        // Downmix to mono, window, and accumulate energy on the raw signal.
        // Non-finite samples are zeroed and taint the window.
        let mut sum_squares = 0.0_f32;
        for (index, frame) in self.interleaved.chunks_exact(channels).enumerate() {
            let mut mono = frame.iter().sum::<f32>() / channels as f32;
            if !mono.is_finite() {
                mono = 0.0;
                corrupt = true;
            }
            sum_squares += mono * mono;
            self.fft.input[index] = mono * self.coefficients[index];
        }
        let rms = (sum_squares / window_size as f32).sqrt();
        let low_confidence = corrupt || filled < self.interleaved.len();

        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.fft.spectrum) {
            *magnitude = bin.norm() * self.magnitude_scale;
        }

        self.layout
            .reduce_into(&self.magnitudes, &mut self.raw_bands);
        let loudest = self.raw_bands.iter().copied().fold(0.0_f32, f32::max);
        let reference = self.band_norm.observe(loudest);
        let bands = self
            .raw_bands
            .iter()
            .map(|value| scale(*value, reference))
            .collect();

        let energy = self.energy_norm.normalize(rms);
        let spectral_centroid = self.spectral_centroid();

        let window_seconds = self.window_seconds();
        let time = (self.sequence as f32 + 0.5) * window_seconds;
        let (transient, is_transient) = self.update_transients(time, energy);

        self.summary.windows += 1;
        if low_confidence {
            self.summary.low_confidence_windows += 1;
        }
        self.summary.duration_seconds = Some((self.sequence + 1) as f32 * window_seconds);

        let vector = FeatureVector {
            sequence: self.sequence,
            time,
            bands,
            energy,
            transient,
            is_transient,
            spectral_centroid,
            low_confidence,
        };
        self.sequence += 1;
        Ok(vector)
    }

    fn spectral_centroid(&self) -> f32 {
        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        for (i, magnitude) in self.magnitudes.iter().enumerate() {
            magnitude_sum += magnitude;
            weighted_sum += magnitude * i as f32;
        }

        if magnitude_sum <= f32::EPSILON {
            return 0.0;
        }
        let nyquist_bin = (self.magnitudes.len() - 1).max(1) as f32;
        (weighted_sum / magnitude_sum / nyquist_bin).clamp(0.0, 1.0)
    }

    fn update_transients(&mut self, timestamp: f32, energy: f32) -> (f32, bool) {
        let delta = (energy - self.last_energy).max(0.0);
        self.last_energy = energy;
        let strength = (delta * self.config.transient_gain).clamp(0.0, 1.0);

        let spaced = self
            .last_transient
            .map(|last| timestamp - last >= self.config.min_transient_interval)
            .unwrap_or(true);
        let is_transient = strength >= self.config.transient_threshold && spaced;

        if is_transient {
            self.last_transient = Some(timestamp);
            self.beat_timestamps.push(timestamp);
            if self.beat_timestamps.len() > MAX_BEAT_HISTORY {
                let overflow = self.beat_timestamps.len() - MAX_BEAT_HISTORY;
                self.beat_timestamps.drain(0..overflow);
            }
            self.update_tempo_estimate();
        }

        (strength, is_transient)
    }

    fn update_tempo_estimate(&mut self) {
        if self.beat_timestamps.len() < 2 {
            return;
        }

        let mut sum = 0.0;
        let mut count = 0;
        for window in self.beat_timestamps.windows(2) {
            let interval = window[1] - window[0];
            if interval > f32::EPSILON {
                sum += interval;
                count += 1;
            }
        }

        if count > 0 {
            let average_interval = sum / count as f32;
            if average_interval > 0.0 {
                self.summary.tempo_bpm = Some(60.0 / average_interval);
            }
        }
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("format", &self.format)
            .field("window_size", &self.config.window_size)
            .field("bands", &self.layout.len())
            .field("summary", &self.summary)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Coefficients of the configured window shape.
pub fn window_coefficients(kind: WindowFunction, len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }

    let denom = len as f32 - 1.0;
    (0..len)
        .map(|index| {
            let x = 2.0 * PI * index as f32 / denom;
            match kind {
                WindowFunction::Hann => 0.5 - 0.5 * x.cos(),
                WindowFunction::Hamming => 0.54 - 0.46 * x.cos(),
                WindowFunction::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                WindowFunction::Rectangular => 1.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::sample_ring, config::OverflowPolicy};

    fn config(window_size: usize, band_count: usize) -> AnalysisConfig {
        AnalysisConfig {
            window_size,
            band_count,
            ..Default::default()
        }
    }

    fn sine(frequency: f32, amplitude: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn hann_window_is_symmetric_with_zero_edges() {
        let window = window_coefficients(WindowFunction::Hann, 16);
        assert!(window[0].abs() < 1e-6);
        assert!(window[15].abs() < 1e-6);
        for i in 0..8 {
            assert!((window[i] - window[15 - i]).abs() < 1e-6);
        }
        assert!(window[7] > 0.9 && window[8] > 0.9);
    }

    #[test]
    fn silence_produces_zero_features() {
        let mut analyzer =
            SpectralAnalyzer::new(&config(1024, 32), StreamFormat::new(48_000, 1)).unwrap();
        let frame = analyzer.analyze(&vec![0.0; 1024]).unwrap();

        assert_eq!(frame.energy, 0.0);
        assert_eq!(frame.transient, 0.0);
        assert_eq!(frame.spectral_centroid, 0.0);
        assert!(frame.bands.iter().all(|b| *b == 0.0));
        assert!(!frame.low_confidence);
    }

    #[test]
    fn sine_peaks_in_its_own_band() {
        let sample_rate = 48_000;
        let window = 1024;
        // Bin-centred: 32 * 46.875 Hz.
        let frequency = 1_500.0;
        let mut analyzer =
            SpectralAnalyzer::new(&config(window, 32), StreamFormat::new(sample_rate, 1)).unwrap();
        let frame = analyzer
            .analyze(&sine(frequency, 0.8, sample_rate, window))
            .unwrap();

        let band = analyzer.layout().band_for_frequency(frequency).unwrap();
        let loudest = frame.bands.iter().copied().fold(0.0_f32, f32::max);
        assert_eq!(frame.bands[band], loudest);
        assert!((loudest - 1.0).abs() < 1e-6);
        // Bands well away from the tone stay low.
        assert!(frame.bands[0] < 0.1);
        assert!(frame.bands[31] < 0.1);
    }

    #[test]
    fn bands_are_bounded_and_gain_invariant() {
        let format = StreamFormat::new(44_100, 1);
        let mut quiet = SpectralAnalyzer::new(&config(512, 16), format).unwrap();
        let mut loud = SpectralAnalyzer::new(&config(512, 16), format).unwrap();

        let mut signal = sine(220.0, 1.0, 44_100, 512);
        for (i, s) in sine(3_000.0, 0.3, 44_100, 512).iter().enumerate() {
            signal[i] += s;
        }
        let quiet_signal: Vec<f32> = signal.iter().map(|s| s * 0.01).collect();
        let loud_signal: Vec<f32> = signal.iter().map(|s| s * 500.0).collect();

        for _ in 0..3 {
            let a = quiet.analyze(&quiet_signal).unwrap();
            let b = loud.analyze(&loud_signal).unwrap();
            for (x, y) in a.bands.iter().zip(&b.bands) {
                assert!((0.0..=1.0).contains(x));
                assert!((0.0..=1.0).contains(y));
                assert!((x - y).abs() < 1e-3, "{x} vs {y}");
            }
            assert!((a.energy - b.energy).abs() < 1e-4);
            assert!(b.energy <= 1.0);
        }
    }

    #[test]
    fn silence_never_reports_transients() {
        let mut analyzer =
            SpectralAnalyzer::new(&config(256, 8), StreamFormat::new(48_000, 2)).unwrap();
        for _ in 0..50 {
            let frame = analyzer.analyze(&vec![0.0; 512]).unwrap();
            assert!(!frame.is_transient);
            assert_eq!(frame.transient, 0.0);
        }
    }

    #[test]
    fn short_input_is_padded_and_low_confidence() {
        let mut analyzer =
            SpectralAnalyzer::new(&config(256, 8), StreamFormat::new(48_000, 2)).unwrap();
        let frame = analyzer.analyze(&[0.5; 100]).unwrap();
        assert!(frame.low_confidence);
        assert_eq!(analyzer.summary().low_confidence_windows, 1);

        let err = analyzer.analyze(&[0.0; 513]).unwrap_err();
        assert!(matches!(err, SpectraError::InvalidInput(_)));
    }

    #[test]
    fn reads_one_window_from_the_ring() {
        let (mut tx, mut rx) = sample_ring(4096, OverflowPolicy::DropOldest);
        let mut analyzer =
            SpectralAnalyzer::new(&config(256, 8), StreamFormat::new(8_000, 2)).unwrap();

        tx.write(&vec![0.25; 700]);
        let full = analyzer.analyze_from(&mut rx).unwrap();
        assert!(!full.low_confidence);
        assert_eq!(rx.available(), 700 - 512);

        let partial = analyzer.analyze_from(&mut rx).unwrap();
        assert!(partial.low_confidence);
        assert_eq!(partial.sequence, 1);
    }

    #[test]
    fn detects_transients_and_estimates_tempo() {
        // 64 frames at 256 Hz: each window lasts 0.25 s.
        let mut analyzer =
            SpectralAnalyzer::new(&config(64, 4), StreamFormat::new(256, 1)).unwrap();
        let quiet = vec![0.0; 64];
        let loud = vec![1.0; 64];

        let mut onsets = 0;
        for _ in 0..6 {
            analyzer.analyze(&quiet).unwrap();
            if analyzer.analyze(&loud).unwrap().is_transient {
                onsets += 1;
            }
        }

        assert_eq!(onsets, 6);
        let summary = analyzer.summary();
        assert_eq!(summary.windows, 12);
        assert!((summary.duration_seconds.unwrap() - 3.0).abs() < 1e-4);
        let tempo = summary.tempo_bpm.expect("tempo should be detected");
        assert!((tempo - 120.0).abs() < 1.0);
    }

    #[test]
    fn a_glitched_sample_does_not_blank_later_windows() {
        let sample_rate = 8_000;
        let mut analyzer =
            SpectralAnalyzer::new(&config(256, 8), StreamFormat::new(sample_rate, 1)).unwrap();

        let mut glitch = sine(500.0, 0.5, sample_rate, 256);
        glitch[10] = f32::INFINITY;
        let frame = analyzer.analyze(&glitch).unwrap();
        assert!(frame.low_confidence);
        assert!(frame.energy.is_finite());
        assert!(frame.bands.iter().all(|b| b.is_finite()));

        let tone = sine(500.0, 0.5, sample_rate, 256);
        for _ in 0..200 {
            analyzer.analyze(&tone).unwrap();
        }
        let last = analyzer.analyze(&tone).unwrap();
        assert!(!last.low_confidence);
        assert!(last.bands.iter().copied().fold(0.0_f32, f32::max) > 0.5);
        assert!(last.energy > 0.5);
    }

    #[test]
    fn rejects_bad_configuration() {
        let format = StreamFormat::new(48_000, 1);
        assert!(SpectralAnalyzer::new(&config(1000, 8), format).is_err());
        assert!(SpectralAnalyzer::new(&config(256, 0), format).is_err());
        assert!(SpectralAnalyzer::new(&config(256, 200), format).is_err());
        assert!(SpectralAnalyzer::new(&config(256, 8), StreamFormat::new(0, 1)).is_err());
    }
}
