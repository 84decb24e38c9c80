//! Render-side contract. The core never talks to a graphics API; a
//! [`SceneRenderer`] supplied by the host turns [`RenderParameters`] into
//! pixels. This module also carries the CPU-side helpers such a renderer
//! typically needs.

use std::time::Duration;

use glam::{Mat4, Vec2};

use crate::{mapping::RenderParameters, sync::RenderSynchronizer, timeline::Cadence, Result};

/// Draws one frame from render parameters.
pub trait SceneRenderer {
    fn draw(&mut self, params: &RenderParameters) -> Result<()>;
}

impl<R: SceneRenderer + ?Sized> SceneRenderer for &mut R {
    fn draw(&mut self, params: &RenderParameters) -> Result<()> {
        (**self).draw(params)
    }
}

/// Fraction of each bar slot left empty between bars.
const BAR_GAP: f32 = 0.1;

/// Quad geometry for a bar spectrum: four vertices and six indices per band,
/// bars standing on `y = 0` in a `width` x `height` pixel space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarGeometry {
    pub vertices: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl BarGeometry {
    pub fn build(params: &RenderParameters, width: f32, height: f32) -> Self {
        let bars = params.displacement.len();
        let mut geometry = Self {
            vertices: Vec::with_capacity(bars * 4),
            indices: Vec::with_capacity(bars * 6),
        };
        if bars == 0 || width <= 0.0 || height <= 0.0 {
            return geometry;
        }

        let slot = width / bars as f32;
        let inset = slot * BAR_GAP * 0.5;
        for (i, value) in params.displacement.iter().enumerate() {
            let left = i as f32 * slot + inset;
            let right = (i + 1) as f32 * slot - inset;
            let top = (value * params.scale).clamp(0.0, 1.0) * height;

            let base = geometry.vertices.len() as u32;
            geometry.vertices.extend([
                Vec2::new(left, 0.0),
                Vec2::new(right, 0.0),
                Vec2::new(right, top),
                Vec2::new(left, top),
            ]);
            geometry
                .indices
                .extend([base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        geometry
    }

    pub fn bar_count(&self) -> usize {
        self.vertices.len() / 4
    }
}

/// Orthographic projection mapping pixel space, origin bottom-left, to clip
/// space.
pub fn projection(width: f32, height: f32) -> Mat4 {
    Mat4::orthographic_rh_gl(0.0, width.max(1.0), 0.0, height.max(1.0), -1.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub renderer_errors: u64,
    pub slips: u64,
}

/// Drives a renderer at a fixed frame rate from the latest analysis state.
#[derive(Debug)]
pub struct FrameLoop {
    synchronizer: RenderSynchronizer,
    cadence: Cadence,
    stats: FrameStats,
}

impl FrameLoop {
    pub fn new(synchronizer: RenderSynchronizer, fps: u32) -> Result<Self> {
        Ok(Self {
            synchronizer,
            cadence: Cadence::from_hz(f64::from(fps))?,
            stats: FrameStats::default(),
        })
    }

    pub fn synchronizer_mut(&mut self) -> &mut RenderSynchronizer {
        &mut self.synchronizer
    }

    pub fn frame_interval(&self) -> Duration {
        self.cadence.period()
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            slips: self.cadence.slips(),
            ..self.stats
        }
    }

    /// Renders a single frame immediately. Renderer errors are logged and
    /// counted; the loop keeps going.
    pub fn render_once<R: SceneRenderer + ?Sized>(&mut self, renderer: &mut R) {
        let params = self.synchronizer.frame();
        if let Err(err) = renderer.draw(params) {
            self.stats.renderer_errors += 1;
            tracing::warn!(%err, frame = self.stats.frames, "renderer failed to draw frame");
        }
        self.stats.frames += 1;
    }

    /// Renders paced frames until `stop` returns true. `stop` is checked
    /// before every frame.
    pub fn run<R, F>(&mut self, renderer: &mut R, mut stop: F) -> FrameStats
    where
        R: SceneRenderer + ?Sized,
        F: FnMut(&FrameStats) -> bool,
    {
        while !stop(&self.stats) {
            self.cadence.wait();
            self.render_once(renderer);
        }
        self.stats()
    }
}
