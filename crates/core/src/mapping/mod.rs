//! Pure mapping from smoothed audio features to render parameters.

mod color;

use std::f32::consts::TAU;

use glam::Vec4;

use crate::{
    config::{MappingConfig, VisualMode},
    smoothing::SmoothedState,
};

pub use color::hsv_to_rgba;

/// Everything a scene renderer needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParameters {
    pub mode: VisualMode,
    pub color: Vec4,
    pub background: Vec4,
    /// Overall scale, `1.0` at rest.
    pub scale: f32,
    /// Per-band displacement, usually bar heights or radial offsets.
    pub displacement: Vec<f32>,
    /// Rotation in radians.
    pub rotation: f32,
    /// Beat flash intensity in `[0, 1]`.
    pub flash: f32,
    /// Nothing trustworthy to show: no audio analysed yet, or the latest
    /// window was padded because the source stalled or ended.
    pub idle: bool,
}

/// Maps a smoothed state to render parameters. Same input, same output.
pub fn map_state(state: &SmoothedState, config: &MappingConfig) -> RenderParameters {
    let idle = state.is_idle() || state.low_confidence;
    let energy = state.energy.clamp(0.0, 1.0);
    let transient = state.transient.clamp(0.0, 1.0);
    let centroid = state.spectral_centroid.clamp(0.0, 1.0);
    let gain = config.displacement_gain;
    let scale_for = |drive: f32| 1.0 + (config.max_scale - 1.0) * drive.clamp(0.0, 1.0);

    let hue = config.base_hue + config.hue_range * centroid;
    let value = if idle { 0.15 } else { 0.35 + 0.65 * energy };
    let color = hsv_to_rgba(hue, 0.55 + 0.45 * energy, value);
    let background = hsv_to_rgba(hue + 180.0, 0.4, 0.05 + 0.15 * transient);

    let bands = state.bands.iter().map(|b| b.clamp(0.0, 1.0));
    let (displacement, scale, rotation, flash) = match config.mode {
        VisualMode::Bars => (
            bands.map(|b| b * gain).collect(),
            scale_for(energy),
            0.0,
            transient,
        ),
        VisualMode::Pulse => (
            bands.map(|b| (0.5 * energy + 0.5 * b) * gain).collect(),
            scale_for(0.7 * energy + 0.3 * transient),
            0.0,
            if state.beat { 1.0 } else { transient },
        ),
        VisualMode::Radial => (
            bands.map(|b| b * gain).collect(),
            scale_for(energy),
            centroid * TAU,
            0.5 * transient,
        ),
    };

    RenderParameters {
        mode: config.mode,
        color,
        background,
        scale,
        displacement,
        rotation,
        flash,
        idle,
    }
}
