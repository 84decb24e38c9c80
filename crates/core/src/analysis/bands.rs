use std::ops::Range;

use crate::config::BandScale;

/// Maps FFT bins onto a fixed number of output bands.
///
/// Bin 0 (DC) is never part of a band. Every band covers at least one bin;
/// at the low end of a logarithmic layout, where bands are narrower than a
/// bin, neighbouring bands may share the same bin.
#[derive(Debug, Clone, PartialEq)]
pub struct BandLayout {
    ranges: Vec<Range<usize>>,
    bin_hz: f32,
}

impl BandLayout {
    pub fn new(
        scale: BandScale,
        band_count: usize,
        window_size: usize,
        sample_rate: u32,
        min_frequency: f32,
    ) -> Self {
        let nyquist_bin = window_size / 2;
        let bin_hz = sample_rate as f32 / window_size as f32;
        let nyquist = sample_rate as f32 * 0.5;
        let low = min_frequency.clamp(bin_hz, nyquist);

        let edge = |index: usize| -> f32 {
            let t = index as f32 / band_count as f32;
            let hz = match scale {
                BandScale::Logarithmic => low * (nyquist / low).powf(t),
                BandScale::Linear => low + (nyquist - low) * t,
            };
            hz / bin_hz
        };

        let ranges = (0..band_count)
            .map(|band| {
                let start = (edge(band).round() as usize).clamp(1, nyquist_bin);
                let end = if band + 1 == band_count {
                    nyquist_bin + 1
                } else {
                    (edge(band + 1).round() as usize).clamp(start + 1, nyquist_bin + 1)
                };
                start..end
            })
            .collect();

        Self { ranges, bin_hz }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Frequency resolution of one bin in Hz.
    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    /// Index of the band whose bin range contains `frequency`.
    pub fn band_for_frequency(&self, frequency: f32) -> Option<usize> {
        let bin = (frequency / self.bin_hz).round() as usize;
        self.ranges.iter().position(|range| range.contains(&bin))
    }

    /// Reduces bin magnitudes to one peak value per band.
    pub fn reduce_into(&self, magnitudes: &[f32], bands: &mut [f32]) {
        for (value, range) in bands.iter_mut().zip(&self.ranges) {
            let end = range.end.min(magnitudes.len());
            let start = range.start.min(end);
            *value = magnitudes[start..end]
                .iter()
                .copied()
                .fold(0.0_f32, f32::max);
        }
    }
}
