use std::f32::consts::TAU;

use crate::{Result, SourceFault};

use super::{whole_frames, PcmSource, StreamFormat};

/// Generated signal: a sine tone on every channel, or silence.
#[derive(Debug, Clone)]
pub struct ToneSource {
    format: StreamFormat,
    frequency: f32,
    amplitude: f32,
    phase: f32,
}

impl ToneSource {
    pub fn sine(format: StreamFormat, frequency: f32, amplitude: f32) -> Self {
        Self {
            format,
            frequency,
            amplitude,
            phase: 0.0,
        }
    }

    pub fn silence(format: StreamFormat) -> Self {
        Self::sine(format, 0.0, 0.0)
    }
}

impl PcmSource for ToneSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn pull(&mut self, max_samples: usize) -> Result<Vec<f32>> {
        let channels = self.format.channel_count();
        let frames = whole_frames(max_samples, channels) / channels;
        let step = TAU * self.frequency / self.format.sample_rate.max(1) as f32;

        let mut out = Vec::with_capacity(frames * channels);
        for _ in 0..frames {
            let value = self.amplitude * self.phase.sin();
            out.extend(std::iter::repeat(value).take(channels));
            self.phase = (self.phase + step) % TAU;
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        let format = self.format;
        if self.amplitude == 0.0 {
            format!("silence, {} Hz / {} ch", format.sample_rate, format.channels)
        } else {
            format!(
                "{:.1} Hz tone, {} Hz / {} ch",
                self.frequency, format.sample_rate, format.channels
            )
        }
    }
}

/// In-memory interleaved PCM, optionally looping.
#[derive(Debug, Clone)]
pub struct BufferSource {
    format: StreamFormat,
    samples: Vec<f32>,
    cursor: usize,
    looping: bool,
}

impl BufferSource {
    pub fn new(format: StreamFormat, samples: Vec<f32>) -> Self {
        let usable = whole_frames(samples.len(), format.channel_count());
        let mut samples = samples;
        samples.truncate(usable);
        Self {
            format,
            samples,
            cursor: 0,
            looping: false,
        }
    }

    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.cursor
    }
}

impl PcmSource for BufferSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn pull(&mut self, max_samples: usize) -> Result<Vec<f32>> {
        if self.looping && self.cursor >= self.samples.len() && !self.samples.is_empty() {
            self.cursor = 0;
        }
        if self.cursor >= self.samples.len() {
            return Err(SourceFault::EndOfStream.into());
        }

        let take = whole_frames(max_samples, self.format.channel_count()).min(self.remaining());
        let chunk = self.samples[self.cursor..self.cursor + take].to_vec();
        self.cursor += take;
        Ok(chunk)
    }

    fn describe(&self) -> String {
        format!("{} buffered samples", self.samples.len())
    }
}
