//! Handoff of the smoothed state from the analysis thread to render threads.
//!
//! The analysis side replaces the whole state with one atomic pointer swap;
//! readers load the current pointer and never see a half-written state.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{
    config::MappingConfig,
    mapping::{map_state, RenderParameters},
    smoothing::SmoothedState,
};

/// Creates a publisher/reader pair seeded with `initial`.
pub fn state_channel(initial: SmoothedState) -> (StatePublisher, StateReader) {
    let shared = Arc::new(ArcSwap::from_pointee(initial));
    (
        StatePublisher {
            shared: Arc::clone(&shared),
        },
        StateReader { shared },
    )
}

#[derive(Debug)]
pub struct StatePublisher {
    shared: Arc<ArcSwap<SmoothedState>>,
}

impl StatePublisher {
    pub fn publish(&self, state: SmoothedState) {
        self.shared.store(Arc::new(state));
    }

    pub fn reader(&self) -> StateReader {
        StateReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateReader {
    shared: Arc<ArcSwap<SmoothedState>>,
}

impl StateReader {
    /// Latest published state. Never blocks.
    pub fn snapshot(&self) -> Arc<SmoothedState> {
        self.shared.load_full()
    }
}

/// Turns the latest snapshot into render parameters for each frame.
///
/// The mapping result is cached against the snapshot pointer, so frames
/// drawn between two analysis updates get identical parameters.
#[derive(Debug)]
pub struct RenderSynchronizer {
    reader: StateReader,
    mapping: MappingConfig,
    cached: Option<(Arc<SmoothedState>, RenderParameters)>,
}

impl RenderSynchronizer {
    pub fn new(reader: StateReader, mapping: MappingConfig) -> Self {
        Self {
            reader,
            mapping,
            cached: None,
        }
    }

    pub fn mapping(&self) -> &MappingConfig {
        &self.mapping
    }

    /// Swaps the mapping (for example a new visual mode) for the next frame.
    pub fn set_mapping(&mut self, mapping: MappingConfig) {
        self.mapping = mapping;
        self.cached = None;
    }

    pub fn frame(&mut self) -> &RenderParameters {
        let snapshot = self.reader.snapshot();
        if matches!(&self.cached, Some((state, _)) if !Arc::ptr_eq(state, &snapshot)) {
            self.cached = None;
        }
        let mapping = &self.mapping;
        let (_, params) = self.cached.get_or_insert_with(|| {
            let params = map_state(&snapshot, mapping);
            (snapshot, params)
        });
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisualMode;

    fn state(sequence: u64, energy: f32) -> SmoothedState {
        SmoothedState {
            sequence,
            updates: sequence + 1,
            bands: vec![energy; 8],
            energy,
            ..Default::default()
        }
    }

    #[test]
    fn readers_see_the_latest_publish() {
        let (publisher, reader) = state_channel(SmoothedState::idle(8));
        assert!(reader.snapshot().is_idle());

        publisher.publish(state(3, 0.5));
        let other = publisher.reader();
        assert_eq!(reader.snapshot().sequence, 3);
        assert_eq!(other.snapshot().energy, 0.5);
    }

    #[test]
    fn repeated_frames_are_bit_identical() {
        let (publisher, reader) = state_channel(SmoothedState::idle(8));
        publisher.publish(state(1, 0.7));
        let mut sync = RenderSynchronizer::new(reader, MappingConfig::default());

        let first = sync.frame().clone();
        for _ in 0..10 {
            let again = sync.frame();
            assert_eq!(
                again.color.to_array().map(f32::to_bits),
                first.color.to_array().map(f32::to_bits)
            );
            assert_eq!(again.scale.to_bits(), first.scale.to_bits());
            let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
            assert_eq!(bits(&again.displacement), bits(&first.displacement));
        }
    }

    #[test]
    fn new_publish_changes_the_frame() {
        let (publisher, reader) = state_channel(SmoothedState::idle(8));
        let mut sync = RenderSynchronizer::new(reader, MappingConfig::default());
        assert!(sync.frame().idle);

        publisher.publish(state(1, 0.9));
        let params = sync.frame();
        assert!(!params.idle);
        assert_eq!(params.displacement, vec![0.9; 8]);
    }

    #[test]
    fn mapping_change_invalidates_cache() {
        let (publisher, reader) = state_channel(SmoothedState::idle(8));
        publisher.publish(state(1, 0.4));
        let mut sync = RenderSynchronizer::new(reader, MappingConfig::default());
        assert_eq!(sync.frame().mode, VisualMode::Bars);

        sync.set_mapping(MappingConfig {
            mode: VisualMode::Radial,
            ..Default::default()
        });
        assert_eq!(sync.frame().mode, VisualMode::Radial);
    }

    #[test]
    fn snapshots_cross_threads() {
        let (publisher, reader) = state_channel(SmoothedState::idle(4));
        let handle = std::thread::spawn(move || {
            for seq in 0..1000 {
                publisher.publish(state(seq, (seq % 10) as f32 / 10.0));
            }
        });
        let mut last = 0;
        while !handle.is_finished() {
            let snap = reader.snapshot();
            assert!(snap.sequence >= last);
            assert!(matches!(snap.bands.len(), 4 | 8));
            last = snap.sequence;
        }
        handle.join().unwrap();
        assert_eq!(reader.snapshot().sequence, 999);
    }
}
