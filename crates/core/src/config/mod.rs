use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, SpectraError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub smoothing: SmoothingConfig,
    pub mapping: MappingConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// Loads a JSON configuration file. Missing fields fall back to their
    /// defaults; the result is validated before it is returned.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(?path, "loaded configuration");
        Ok(config)
    }

    /// Checks every option that would make a session unusable.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.analysis.validate()?;
        self.smoothing.validate()?;
        self.mapping.validate()?;
        self.render.validate()?;

        if self.audio.ring_buffer_capacity < self.analysis.window_size {
            return Err(SpectraError::config(format!(
                "ring_buffer_capacity ({}) must hold at least one analysis window ({})",
                self.audio.ring_buffer_capacity, self.analysis.window_size
            )));
        }
        Ok(())
    }
}

/// What the producer does when the ring buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Overwrite the oldest unread samples, keeping latency bounded.
    #[default]
    DropOldest,
    /// Reject the write; the producer holds the chunk and retries.
    Stall,
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate used by generated sources. Capture and file sources report
    /// their own format.
    pub sample_rate: u32,
    pub channels: u16,
    /// Ring capacity in frames.
    pub ring_buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Frames requested from the source per producer period.
    pub pull_period_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            ring_buffer_capacity: 8192,
            overflow_policy: OverflowPolicy::DropOldest,
            pull_period_frames: 512,
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SpectraError::config("sample_rate must be positive"));
        }
        if self.channels == 0 {
            return Err(SpectraError::config("channels must be positive"));
        }
        if self.pull_period_frames == 0 {
            return Err(SpectraError::config("pull_period_frames must be positive"));
        }
        if self.pull_period_frames > self.ring_buffer_capacity {
            return Err(SpectraError::config(
                "pull_period_frames must not exceed ring_buffer_capacity",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Rectangular,
}

/// How FFT bins are grouped into output bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandScale {
    #[default]
    Logarithmic,
    Linear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// Divide by a slowly decaying peak of recent input.
    #[default]
    RollingPeak,
    /// Divide by a constant reference level.
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub mode: NormalizationMode,
    /// Per-window decay of the rolling peak, in (0, 1].
    pub decay: f32,
    /// Reference level used by [`NormalizationMode::Fixed`].
    pub reference: f32,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            mode: NormalizationMode::RollingPeak,
            decay: 0.995,
            reference: 1.0,
        }
    }
}

/// Spectral analyzer options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Frames per analysis window. Must be a power of two.
    pub window_size: usize,
    pub band_count: usize,
    pub window_function: WindowFunction,
    pub band_scale: BandScale,
    /// Lowest frequency covered by the first band, in Hz.
    pub min_frequency: f32,
    pub normalization: NormalizationConfig,
    /// Levels below this floor are never amplified by normalisation.
    pub silence_floor: f32,
    pub transient_threshold: f32,
    pub transient_gain: f32,
    /// Minimum spacing between two reported transients, in seconds.
    pub min_transient_interval: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: 1024,
            band_count: 32,
            window_function: WindowFunction::Hann,
            band_scale: BandScale::Logarithmic,
            min_frequency: 20.0,
            normalization: NormalizationConfig::default(),
            silence_floor: 1e-4,
            transient_threshold: 0.6,
            transient_gain: 12.0,
            min_transient_interval: 0.2,
        }
    }
}

pub const MIN_WINDOW_SIZE: usize = 64;

impl AnalysisConfig {
    fn validate(&self) -> Result<()> {
        if !self.window_size.is_power_of_two() || self.window_size < MIN_WINDOW_SIZE {
            return Err(SpectraError::config(format!(
                "window_size must be a power of two >= {MIN_WINDOW_SIZE}, got {}",
                self.window_size
            )));
        }
        if self.band_count == 0 {
            return Err(SpectraError::config("band_count must be positive"));
        }
        if self.band_count > self.window_size / 2 {
            return Err(SpectraError::config(format!(
                "band_count ({}) exceeds the {} available frequency bins",
                self.band_count,
                self.window_size / 2
            )));
        }
        if !(self.min_frequency > 0.0) {
            return Err(SpectraError::config("min_frequency must be positive"));
        }
        let decay = self.normalization.decay;
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(SpectraError::config("normalization.decay must be in (0, 1]"));
        }
        if !(self.normalization.reference > 0.0) {
            return Err(SpectraError::config("normalization.reference must be positive"));
        }
        if !(self.silence_floor >= 0.0) {
            return Err(SpectraError::config("silence_floor must not be negative"));
        }
        if !(self.transient_threshold > 0.0 && self.transient_threshold <= 1.0) {
            return Err(SpectraError::config("transient_threshold must be in (0, 1]"));
        }
        if !(self.transient_gain > 0.0) {
            return Err(SpectraError::config("transient_gain must be positive"));
        }
        if !(self.min_transient_interval >= 0.0) {
            return Err(SpectraError::config(
                "min_transient_interval must not be negative",
            ));
        }
        Ok(())
    }
}

/// Exponential smoothing rates. Fast applies to transient indicators,
/// slow to sustained colour/scale features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub alpha_fast: f32,
    pub alpha_slow: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            alpha_fast: 0.6,
            alpha_slow: 0.15,
        }
    }
}

impl SmoothingConfig {
    fn validate(&self) -> Result<()> {
        for (name, alpha) in [("alpha_fast", self.alpha_fast), ("alpha_slow", self.alpha_slow)] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(SpectraError::config(format!(
                    "smoothing.{name} must be in (0, 1], got {alpha}"
                )));
            }
        }
        Ok(())
    }
}

/// Closed set of visual mappings, selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualMode {
    #[default]
    Bars,
    Pulse,
    Radial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub mode: VisualMode,
    /// Hue (degrees) used for a spectral centroid of zero.
    pub base_hue: f32,
    /// Hue shift (degrees) applied across the full centroid range.
    pub hue_range: f32,
    pub max_scale: f32,
    pub displacement_gain: f32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            mode: VisualMode::Bars,
            base_hue: 200.0,
            hue_range: 160.0,
            max_scale: 1.5,
            displacement_gain: 1.0,
        }
    }
}

impl MappingConfig {
    fn validate(&self) -> Result<()> {
        if !(self.max_scale >= 1.0) {
            return Err(SpectraError::config("mapping.max_scale must be >= 1.0"));
        }
        if !(self.displacement_gain >= 0.0) {
            return Err(SpectraError::config(
                "mapping.displacement_gain must not be negative",
            ));
        }
        if !self.base_hue.is_finite() || !self.hue_range.is_finite() {
            return Err(SpectraError::config("mapping hues must be finite"));
        }
        Ok(())
    }
}

/// What the render side shows once a session has been stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Publish the idle state immediately.
    #[default]
    Reset,
    /// Keep showing the last published state.
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub fps: u32,
    pub stop_policy: StopPolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            stop_policy: StopPolicy::Reset,
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(SpectraError::config("render.fps must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
        assert_eq!(
            AppConfig::default().audio.overflow_policy,
            OverflowPolicy::DropOldest
        );
    }

    #[test]
    fn rejects_non_power_of_two_window() {
        let mut config = AppConfig::default();
        config.analysis.window_size = 1000;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SpectraError::Configuration(_)));
        assert!(err.to_string().contains("window_size"));
    }

    #[test]
    fn rejects_zero_bands_and_bad_alphas() {
        let mut config = AppConfig::default();
        config.analysis.band_count = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.smoothing.alpha_slow = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.smoothing.alpha_fast = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ring_must_hold_a_window() {
        let mut config = AppConfig::default();
        config.analysis.window_size = 4096;
        config.audio.ring_buffer_capacity = 2048;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ring_buffer_capacity"));
    }

    #[test]
    fn loads_partial_json_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "analysis": {{ "window_size": 2048, "band_count": 48 }},
                "audio": {{ "overflow_policy": "stall" }},
                "mapping": {{ "mode": "radial" }}
            }}"#
        )
        .unwrap();

        let config = AppConfig::from_path(file.path()).unwrap();
        assert_eq!(config.analysis.window_size, 2048);
        assert_eq!(config.analysis.band_count, 48);
        assert_eq!(config.analysis.window_function, WindowFunction::Hann);
        assert_eq!(config.audio.overflow_policy, OverflowPolicy::Stall);
        assert_eq!(config.mapping.mode, VisualMode::Radial);
        assert_eq!(config.smoothing, SmoothingConfig::default());
    }

    #[test]
    fn invalid_file_contents_are_surfaced() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "analysis": {{ "window_size": 100 }} }}"#).unwrap();
        assert!(matches!(
            AppConfig::from_path(file.path()),
            Err(SpectraError::Configuration(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            AppConfig::from_path(file.path()),
            Err(SpectraError::Json(_))
        ));
    }
}
