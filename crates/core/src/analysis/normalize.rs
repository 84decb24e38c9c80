use crate::config::{NormalizationConfig, NormalizationMode};

/// Scales a non-negative feature into `[0, 1]` against a reference level.
///
/// In rolling-peak mode the reference is the largest recent input, decaying
/// geometrically every observation, which makes the output independent of
/// the input's overall gain. The floor keeps near-silence from being blown
/// up to full scale.
#[derive(Debug, Clone)]
pub(crate) struct Normalizer {
    mode: NormalizationMode,
    decay: f32,
    reference: f32,
    floor: f32,
    peak: f32,
}

impl Normalizer {
    pub(crate) fn new(config: &NormalizationConfig, floor: f32) -> Self {
        Self {
            mode: config.mode,
            decay: config.decay,
            reference: config.reference,
            floor: floor.max(f32::MIN_POSITIVE),
            peak: 0.0,
        }
    }

    /// Feeds the loudest value of the current observation and returns the
    /// reference to divide by.
    /// Non-finite levels are ignored so one bad sample cannot pin the peak.
    pub(crate) fn observe(&mut self, level: f32) -> f32 {
        let level = if level.is_finite() { level } else { 0.0 };
        match self.mode {
            NormalizationMode::RollingPeak => {
                self.peak = (self.peak * self.decay).max(level);
                self.peak.max(self.floor)
            }
            NormalizationMode::Fixed => self.reference.max(self.floor),
        }
    }

    pub(crate) fn normalize(&mut self, value: f32) -> f32 {
        let reference = self.observe(value);
        scale(value, reference)
    }

    pub(crate) fn reset(&mut self) {
        self.peak = 0.0;
    }
}

pub(crate) fn scale(value: f32, reference: f32) -> f32 {
    if !value.is_finite() || reference <= 0.0 {
        return 0.0;
    }
    (value / reference).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rolling(decay: f32) -> Normalizer {
        Normalizer::new(
            &NormalizationConfig {
                mode: NormalizationMode::RollingPeak,
                decay,
                reference: 1.0,
            },
            1e-4,
        )
    }

    #[test]
    fn rolling_peak_is_gain_invariant() {
        let mut quiet = rolling(0.9);
        let mut loud = rolling(0.9);
        for level in [0.2, 0.5, 0.1, 0.4] {
            let a = quiet.normalize(level * 0.01);
            let b = loud.normalize(level * 10.0);
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
            assert!((0.0..=1.0).contains(&a));
        }
    }

    #[test]
    fn floor_keeps_noise_quiet() {
        let mut norm = rolling(0.9);
        assert!(norm.normalize(1e-6) < 0.05);
        assert_eq!(norm.normalize(0.0), 0.0);
    }

    #[test]
    fn non_finite_levels_do_not_stick() {
        let mut norm = rolling(0.9);
        assert_eq!(norm.normalize(f32::INFINITY), 0.0);
        assert_eq!(norm.normalize(f32::NAN), 0.0);
        assert_eq!(norm.normalize(0.5), 1.0);
    }

    #[test]
    fn fixed_reference_clamps() {
        let mut norm = Normalizer::new(
            &NormalizationConfig {
                mode: NormalizationMode::Fixed,
                decay: 1.0,
                reference: 0.5,
            },
            1e-4,
        );
        assert_eq!(norm.normalize(0.25), 0.5);
        assert_eq!(norm.normalize(4.0), 1.0);
    }
}
