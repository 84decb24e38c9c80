//! PCM source adapters.
//!
//! Every input (capture device, decoded file, generated signal) is wrapped in
//! a [`PcmSource`] so the session pulls interleaved `f32` frames the same way
//! regardless of where they come from.

mod capture;
mod decode;
mod signal;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{config::AudioConfig, Result};

pub use capture::{list_input_devices, CaptureSource, InputDeviceInfo};
pub use decode::FileSource;
pub use signal::{BufferSource, ToneSource};

/// Sample rate and channel layout, negotiated once when a source opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.max(1) as usize
    }

    /// Duration of `frames` frames in seconds.
    pub fn frames_to_seconds(&self, frames: usize) -> f64 {
        frames as f64 / self.sample_rate.max(1) as f64
    }
}

/// Uniform pull interface over a capture device or decoder.
///
/// Implementations must return within one audio-callback period: when no
/// data is ready they hand back a short or empty chunk instead of waiting.
/// Chunks always hold whole frames. End of file and device loss are
/// reported as [`crate::SpectraError::SourceUnavailable`].
pub trait PcmSource {
    fn format(&self) -> StreamFormat;

    /// Returns at most `max_samples` interleaved samples.
    fn pull(&mut self, max_samples: usize) -> Result<Vec<f32>>;

    fn describe(&self) -> String {
        let format = self.format();
        format!("{} Hz / {} ch", format.sample_rate, format.channels)
    }
}

impl<S: PcmSource + ?Sized> PcmSource for Box<S> {
    fn format(&self) -> StreamFormat {
        (**self).format()
    }

    fn pull(&mut self, max_samples: usize) -> Result<Vec<f32>> {
        (**self).pull(max_samples)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Serializable description of which source a session should open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Capture from an input device; `None` picks the host default.
    Capture { device: Option<String> },
    /// Decode an audio file.
    File { path: PathBuf },
    /// Sine tone generator.
    Tone { frequency: f32, amplitude: f32 },
    /// Endless silence.
    Silence,
}

impl SourceSpec {
    /// Opens the described source. Must be called on the thread that will
    /// drive it, since capture streams are tied to their thread.
    pub fn open(&self, audio: &AudioConfig) -> Result<Box<dyn PcmSource>> {
        let format = StreamFormat::new(audio.sample_rate, audio.channels);
        Ok(match self {
            SourceSpec::Capture { device } => Box::new(CaptureSource::open(device.as_deref())?),
            SourceSpec::File { path } => Box::new(FileSource::open(path)?),
            SourceSpec::Tone {
                frequency,
                amplitude,
            } => Box::new(ToneSource::sine(format, *frequency, *amplitude)),
            SourceSpec::Silence => Box::new(ToneSource::silence(format)),
        })
    }
}

/// Truncates `max_samples` down to a whole number of frames.
pub(crate) fn whole_frames(max_samples: usize, channels: usize) -> usize {
    max_samples - max_samples % channels.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_generated_sources_with_configured_format() {
        let audio = AudioConfig {
            sample_rate: 22_050,
            channels: 1,
            ..Default::default()
        };
        let mut tone = SourceSpec::Tone {
            frequency: 440.0,
            amplitude: 0.5,
        }
        .open(&audio)
        .unwrap();
        assert_eq!(tone.format(), StreamFormat::new(22_050, 1));
        assert_eq!(tone.pull(128).unwrap().len(), 128);

        let silence = SourceSpec::Silence.open(&audio).unwrap();
        assert!(silence.describe().contains("22050 Hz"));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let spec = SourceSpec::File {
            path: PathBuf::from("/definitely/not/here.wav"),
        };
        let err = spec.open(&AudioConfig::default()).err().unwrap();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn whole_frames_rounds_down() {
        assert_eq!(whole_frames(7, 2), 6);
        assert_eq!(whole_frames(9, 3), 9);
        assert_eq!(whole_frames(5, 0), 5);
    }
}
