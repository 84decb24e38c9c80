use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use crate::{Result, SourceFault, SpectraError};

use super::{whole_frames, PcmSource, StreamFormat};

/// Seconds of audio the callback queue can hold before it starts dropping.
const CALLBACK_QUEUE_SECONDS: f32 = 0.5;

/// Basic information about an input device.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub format: Option<StreamFormat>,
}

/// Enumerates the input devices of the default host.
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| SpectraError::msg(format!("failed to enumerate input devices: {e}")))?;

    Ok(devices
        .map(|device| {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let format = device
                .default_input_config()
                .ok()
                .map(|c| StreamFormat::new(c.sample_rate().0, c.channels()));
            InputDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                format,
            }
        })
        .collect())
}

/// Live capture from an input device.
///
/// The device callback only converts samples and pushes them into a
/// lock-free queue; [`PcmSource::pull`] drains that queue without waiting.
/// Dropping the source closes the stream.
pub struct CaptureSource {
    _stream: Stream,
    queue: rtrb::Consumer<f32>,
    format: StreamFormat,
    device_name: String,
    disconnected: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl CaptureSource {
    /// Opens `device` (matched by name) or the host default input device and
    /// starts capturing immediately.
    pub fn open(device: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device {
            Some(wanted) => host
                .input_devices()
                .map_err(SpectraError::open_failed)?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| {
                    SpectraError::open_failed(format!("input device `{wanted}` not found"))
                })?,
            None => host
                .default_input_device()
                .ok_or_else(|| SpectraError::open_failed("no default input device"))?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_input_config()
            .map_err(SpectraError::open_failed)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let format = StreamFormat::new(config.sample_rate.0, config.channels);

        let queue_len =
            (format.sample_rate as f32 * CALLBACK_QUEUE_SECONDS) as usize * format.channel_count();
        let (producer, queue) = rtrb::RingBuffer::<f32>::new(queue_len.max(1024));
        let disconnected = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let stream = match sample_format {
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, producer, &disconnected, &dropped)
            }
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, producer, &disconnected, &dropped)
            }
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, producer, &disconnected, &dropped)
            }
            SampleFormat::I32 => {
                build_stream::<i32>(&device, &config, producer, &disconnected, &dropped)
            }
            other => {
                return Err(SpectraError::open_failed(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        }?;
        stream.play().map_err(SpectraError::open_failed)?;

        tracing::info!(
            device = %device_name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "capture stream started"
        );

        Ok(Self {
            _stream: stream,
            queue,
            format,
            device_name,
            disconnected,
            dropped,
        })
    }

    /// Samples the callback had to discard because the queue was full.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: rtrb::Producer<f32>,
    disconnected: &Arc<AtomicBool>,
    dropped: &Arc<AtomicU64>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let dropped = dropped.clone();
    let disconnected = disconnected.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Whole buffers only, so frames never get split.
                if producer.slots() < data.len() {
                    dropped.fetch_add(data.len() as u64, Ordering::Relaxed);
                    return;
                }
                for sample in data {
                    let _ = producer.push(f32::from_sample(*sample));
                }
            },
            move |err| {
                tracing::warn!(%err, "capture stream error");
                disconnected.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(SpectraError::open_failed)
}

impl PcmSource for CaptureSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn pull(&mut self, max_samples: usize) -> Result<Vec<f32>> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(SourceFault::Disconnected(self.device_name.clone()).into());
        }

        let take = whole_frames(
            self.queue.slots().min(max_samples),
            self.format.channel_count(),
        );
        let mut out = Vec::with_capacity(take);
        if take == 0 {
            return Ok(out);
        }

        match self.queue.read_chunk(take) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                out.extend_from_slice(first);
                out.extend_from_slice(second);
                chunk.commit_all();
            }
            Err(_) => {
                tracing::trace!(take, "capture queue shrank between checks");
            }
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        format!(
            "capture `{}` ({} Hz / {} ch)",
            self.device_name, self.format.sample_rate, self.format.channels
        )
    }
}

impl std::fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSource")
            .field("device", &self.device_name)
            .field("format", &self.format)
            .field("dropped", &self.dropped_samples())
            .finish()
    }
}
