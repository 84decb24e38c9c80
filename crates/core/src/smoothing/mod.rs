use serde::{Deserialize, Serialize};

use crate::{analysis::FeatureVector, config::SmoothingConfig};

/// Smoothed features as seen by the render side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmoothedState {
    /// Sequence number of the last feature vector folded in.
    pub sequence: u64,
    /// Number of vectors folded in since the last reset.
    pub updates: u64,
    pub time: f32,
    pub bands: Vec<f32>,
    pub energy: f32,
    pub transient: f32,
    /// Whether the most recent window was a transient.
    pub beat: bool,
    pub spectral_centroid: f32,
    pub low_confidence: bool,
}

impl SmoothedState {
    /// Resting state shown before any audio arrives or after a reset.
    pub fn idle(band_count: usize) -> Self {
        Self {
            bands: vec![0.0; band_count],
            low_confidence: true,
            ..Default::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.updates == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmootherPhase {
    /// No prior state; the next vector is taken verbatim.
    Cold,
    /// Vectors are blended into the running state.
    Warm,
}

/// Dual-rate exponential smoother.
///
/// Sustained features (bands, energy, centroid) use `alpha_slow`; the
/// transient strength uses `alpha_fast` so beats still read as beats.
#[derive(Debug, Clone)]
pub struct FeatureSmoother {
    alpha_fast: f32,
    alpha_slow: f32,
    state: Option<SmoothedState>,
}

impl FeatureSmoother {
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            alpha_fast: config.alpha_fast,
            alpha_slow: config.alpha_slow,
            state: None,
        }
    }

    pub fn phase(&self) -> SmootherPhase {
        if self.state.is_some() {
            SmootherPhase::Warm
        } else {
            SmootherPhase::Cold
        }
    }

    /// Latest smoothed state, if any vector has been seen since the last reset.
    pub fn state(&self) -> Option<&SmoothedState> {
        self.state.as_ref()
    }

    /// Folds one feature vector into the state.
    pub fn update(&mut self, vector: &FeatureVector) -> &SmoothedState {
        let (fast, slow) = (self.alpha_fast, self.alpha_slow);
        let state = match self.state.take() {
            None => SmoothedState {
                sequence: vector.sequence,
                updates: 1,
                time: vector.time,
                bands: vector.bands.clone(),
                energy: vector.energy,
                transient: vector.transient,
                beat: vector.is_transient,
                spectral_centroid: vector.spectral_centroid,
                low_confidence: vector.low_confidence,
            },
            Some(mut prev) => {
                if prev.bands.len() != vector.bands.len() {
                    prev.bands = vector.bands.clone();
                } else {
                    for (value, new) in prev.bands.iter_mut().zip(&vector.bands) {
                        *value = blend(slow, *new, *value);
                    }
                }
                prev.energy = blend(slow, vector.energy, prev.energy);
                prev.spectral_centroid =
                    blend(slow, vector.spectral_centroid, prev.spectral_centroid);
                prev.transient = blend(fast, vector.transient, prev.transient);
                prev.beat = vector.is_transient;
                prev.low_confidence = vector.low_confidence;
                prev.sequence = vector.sequence;
                prev.time = vector.time;
                prev.updates += 1;
                prev
            }
        };
        self.state.insert(state)
    }

    /// Drops the running state; the next vector is accepted verbatim.
    pub fn reset(&mut self) {
        self.state = None;
    }
}

fn blend(alpha: f32, new: f32, prev: f32) -> f32 {
    alpha * new + (1.0 - alpha) * prev
}
