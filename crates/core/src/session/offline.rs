use serde::{Deserialize, Serialize};

use crate::{
    analysis::{AnalysisSummary, SpectralAnalyzer},
    audio::{PcmSource, StreamFormat},
    config::AppConfig,
    error::SourceFault,
    smoothing::{FeatureSmoother, SmoothedState},
    Result, SpectraError,
};

/// Result of analysing a whole source ahead of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAnalysis {
    pub format: StreamFormat,
    pub summary: AnalysisSummary,
    /// One smoothed state per analysis window, in stream order.
    pub frames: Vec<SmoothedState>,
}

/// Analyses `source` until it ends, without real-time pacing.
pub fn analyze_offline<S>(source: &mut S, config: &AppConfig) -> Result<OfflineAnalysis>
where
    S: PcmSource + ?Sized,
{
    analyze_offline_for(source, config, None)
}

/// Like [`analyze_offline`], but stops after `max_seconds` of audio. Needed
/// for sources that never end, such as generated tones.
pub fn analyze_offline_for<S>(
    source: &mut S,
    config: &AppConfig,
    max_seconds: Option<f64>,
) -> Result<OfflineAnalysis>
where
    S: PcmSource + ?Sized,
{
    config.validate()?;
    let format = source.format();
    let mut analyzer = SpectralAnalyzer::new(&config.analysis, format)?;
    let mut smoother = FeatureSmoother::new(&config.smoothing);
    let window = analyzer.window_samples();
    let max_windows = max_seconds.map(|secs| {
        (secs / f64::from(analyzer.window_seconds())).ceil().max(0.0) as usize
    });

    tracing::info!(source = %source.describe(), window, "starting offline analysis");

    let mut frames = Vec::new();
    let mut pending: Vec<f32> = Vec::with_capacity(window * 2);
    let mut finished = false;
    while !finished && max_windows.map_or(true, |max| frames.len() < max) {
        if pending.len() < window {
            match source.pull(window - pending.len()) {
                Ok(chunk) => {
                    pending.extend_from_slice(&chunk);
                    if pending.len() < window {
                        continue;
                    }
                }
                Err(SpectraError::SourceUnavailable(fault)) if fault.is_recoverable() => {
                    if fault != SourceFault::EndOfStream {
                        tracing::warn!(%fault, "source failed, keeping the analysis so far");
                    }
                    finished = true;
                    if pending.is_empty() {
                        break;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let take = pending.len().min(window);
        let vector = analyzer.analyze(&pending[..take])?;
        pending.drain(..take);
        frames.push(smoother.update(&vector).clone());
    }

    let summary = analyzer.summary().clone();
    tracing::info!(
        windows = summary.windows,
        tempo = ?summary.tempo_bpm,
        "offline analysis finished"
    );
    Ok(OfflineAnalysis {
        format,
        summary,
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{BufferSource, ToneSource},
        config::AnalysisConfig,
    };

    fn config() -> AppConfig {
        AppConfig {
            analysis: AnalysisConfig {
                window_size: 256,
                band_count: 8,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn analyses_until_end_of_stream() {
        let format = StreamFormat::new(8_000, 1);
        // Two full windows plus a partial tail.
        let samples: Vec<f32> = (0..600).map(|i| ((i as f32) * 0.3).sin() * 0.5).collect();
        let mut source = BufferSource::new(format, samples);

        let analysis = analyze_offline(&mut source, &config()).unwrap();
        assert_eq!(analysis.frames.len(), 3);
        assert_eq!(analysis.summary.windows, 3);
        assert_eq!(analysis.summary.low_confidence_windows, 1);
        assert!(analysis.frames[2].low_confidence);
        assert_eq!(analysis.frames[2].sequence, 2);
        assert_eq!(analysis.format, format);
    }

    #[test]
    fn endless_sources_need_a_limit() {
        let format = StreamFormat::new(8_000, 2);
        let mut tone = ToneSource::sine(format, 440.0, 0.5);
        let analysis = analyze_offline_for(&mut tone, &config(), Some(0.32)).unwrap();
        // 256 frames at 8 kHz is 32 ms per window.
        assert_eq!(analysis.frames.len(), 10);
        assert!(analysis.frames.iter().all(|frame| !frame.low_confidence));
    }

    #[test]
    fn empty_source_yields_no_frames() {
        let mut source = BufferSource::new(StreamFormat::new(8_000, 1), Vec::new());
        let analysis = analyze_offline(&mut source, &config()).unwrap();
        assert!(analysis.frames.is_empty());
        assert_eq!(analysis.summary.windows, 0);
    }

    #[test]
    fn output_serialises_as_json() {
        let mut source = BufferSource::new(StreamFormat::new(8_000, 1), vec![0.25; 512]);
        let analysis = analyze_offline(&mut source, &config()).unwrap();
        let json = serde_json::to_string(&analysis).unwrap();
        let back: OfflineAnalysis = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frames.len(), 2);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let mut bad = config();
        bad.analysis.window_size = 100;
        let mut source = BufferSource::new(StreamFormat::new(8_000, 1), vec![0.0; 64]);
        assert!(matches!(
            analyze_offline(&mut source, &bad),
            Err(SpectraError::Configuration(_))
        ));
    }
}
