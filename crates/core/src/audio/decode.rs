use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{Result, SourceFault, SpectraError};

use super::{whole_frames, PcmSource, StreamFormat};

/// Streaming file decoder. Decodes one packet at a time on demand, so a pull
/// costs at most a few packets of work.
pub struct FileSource {
    path: PathBuf,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: StreamFormat,
    pending: Vec<f32>,
    sample_buf: Option<SampleBuffer<f32>>,
    finished: bool,
    skipped_packets: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            SpectraError::open_failed(format!("failed to open {}: {e}", path.display()))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| SpectraError::open_failed(format!("failed to probe format: {e}")))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SpectraError::open_failed("no audio tracks found"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| SpectraError::open_failed("unknown sample rate"))?;
        let channels = track.codec_params.channels.map_or(0, |c| c.count()) as u16;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| SpectraError::open_failed(format!("failed to create decoder: {e}")))?;

        let mut source = Self {
            path: path.to_path_buf(),
            reader,
            decoder,
            track_id,
            format: StreamFormat::new(sample_rate, channels),
            pending: Vec::new(),
            sample_buf: None,
            finished: false,
            skipped_packets: 0,
        };

        // Some containers only reveal the channel layout once a packet has
        // been decoded.
        if channels == 0 {
            source.decode_next()?;
            if source.format.channels == 0 {
                return Err(SpectraError::open_failed("unknown channel layout"));
            }
        }

        tracing::info!(
            path = %source.path.display(),
            sample_rate = source.format.sample_rate,
            channels = source.format.channels,
            "opened audio file"
        );
        Ok(source)
    }

    /// Decodes the next packet of our track into `pending`. Returns `false`
    /// once the stream is exhausted.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.finished = true;
                    return Ok(false);
                }
                Err(e) => return Err(SourceFault::Decode(e.to_string()).into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(reason)) => {
                    self.skipped_packets += 1;
                    tracing::debug!(reason, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(SourceFault::Decode(e.to_string()).into()),
            };

            let spec = *decoded.spec();
            if self.format.channels == 0 {
                self.format.channels = spec.channels.count() as u16;
            }
            let frames = decoded.frames();
            let needs_alloc = self
                .sample_buf
                .as_ref()
                .map(|buf| buf.capacity() < frames * spec.channels.count())
                .unwrap_or(true);
            if needs_alloc {
                self.sample_buf = Some(SampleBuffer::<f32>::new(frames as u64, spec));
            }
            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                self.pending.extend_from_slice(buf.samples());
            }
            return Ok(true);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Packets that failed to decode and were skipped.
    pub fn skipped_packets(&self) -> u64 {
        self.skipped_packets
    }
}

impl PcmSource for FileSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn pull(&mut self, max_samples: usize) -> Result<Vec<f32>> {
        let max_samples = whole_frames(max_samples, self.format.channel_count());
        while self.pending.len() < max_samples && !self.finished {
            if !self.decode_next()? {
                break;
            }
        }

        if self.pending.is_empty() && self.finished {
            return Err(SourceFault::EndOfStream.into());
        }

        let take = whole_frames(
            self.pending.len().min(max_samples),
            self.format.channel_count(),
        );
        Ok(self.pending.drain(..take).collect())
    }

    fn describe(&self) -> String {
        format!(
            "file {} ({} Hz / {} ch)",
            self.path.display(),
            self.format.sample_rate,
            self.format.channels
        )
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("pending", &self.pending.len())
            .field("finished", &self.finished)
            .finish()
    }
}
