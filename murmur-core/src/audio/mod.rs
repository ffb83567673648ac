//! Audio sources.
//!
//! The capture loop consumes anything implementing [`AudioSource`] — a
//! non-blocking poll interface over queued samples. The default source is
//! [`CpalSource`], a microphone capture backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate after warm-up, block on a mutex, or perform
//! I/O. The callback therefore writes into a lock-free SPSC ring buffer
//! producer; downmixing reuses a buffer sized on the first invocation.
//! Rate conversion to the engine's sample rate happens on the capture-loop
//! thread, behind the SPSC boundary.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). `CpalSource` must be created and dropped on the capture-loop
//! thread; the engine does this inside `spawn_blocking`.

pub mod device;
pub mod resample;
pub mod wav;

use crate::error::Result;

/// A non-blocking supply of mono f32 samples at the engine sample rate.
pub trait AudioSource {
    /// How many samples can currently be read without waiting.
    fn available(&mut self) -> usize;

    /// Dequeue up to `out.len()` samples, returning the count actually
    /// dequeued. Never blocks.
    ///
    /// # Errors
    /// A device failure; the capture loop treats this as fatal and begins
    /// engine shutdown.
    fn read(&mut self, out: &mut [f32]) -> Result<usize>;
}

#[cfg(feature = "audio-cpal")]
mod cpal_source {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleRate, Stream, StreamConfig,
    };
    use ringbuf::{
        traits::{Consumer, Producer, Split},
        HeapCons, HeapProd, HeapRb,
    };
    use tracing::{error, info, warn};

    use super::AudioSource;
    use crate::audio::resample::RateConverter;
    use crate::error::{MurmurError, Result};

    /// Seconds of device-rate audio the callback ring can hold before the
    /// callback starts dropping frames.
    const CALLBACK_RING_SECS: u32 = 4;

    /// Microphone capture source.
    ///
    /// Owns the cpal stream, the consumer half of the callback ring, and a
    /// rate converter presenting target-rate samples through
    /// [`AudioSource`]. **Not `Send`** — create and drop on one thread.
    pub struct CpalSource {
        /// Kept alive so the stream is not dropped prematurely.
        _stream: Stream,
        consumer: HeapCons<f32>,
        converter: RateConverter,
        /// Target-rate samples already converted, awaiting `read`.
        pending: Vec<f32>,
        scratch: Vec<f32>,
        /// Set by the cpal error callback; `read` surfaces it once.
        failed: Arc<AtomicBool>,
        /// Native device rate, for diagnostics.
        pub device_sample_rate: u32,
    }

    impl CpalSource {
        /// Open an input device by preferred name, otherwise fall back to
        /// the default input device and then the first available one.
        ///
        /// `running` gates the callback: once cleared, the callback no-ops
        /// so shutdown does not race the ring teardown.
        ///
        /// # Errors
        /// `MurmurError::NoDefaultInputDevice` when no microphone exists,
        /// `MurmurError::AudioDevice` / `AudioStream` on cpal failures.
        pub fn open(
            target_rate: u32,
            running: Arc<AtomicBool>,
            preferred_device_name: Option<&str>,
        ) -> Result<Self> {
            let host = cpal::default_host();
            let mut selected = None;

            if let Some(preferred) = preferred_device_name {
                match host.input_devices() {
                    Ok(mut devices) => {
                        selected = devices.find(|d| {
                            d.name().map(|n| n == preferred).unwrap_or(false)
                        });
                        if selected.is_none() {
                            warn!("preferred input device '{preferred}' not found, falling back");
                        }
                    }
                    Err(e) => {
                        warn!("failed to list input devices while resolving preference: {e}");
                    }
                }
            }

            let device = if let Some(device) = selected {
                device
            } else if let Some(default) = host.default_input_device() {
                default
            } else {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| MurmurError::AudioDevice(e.to_string()))?;
                let fallback = devices.next().ok_or(MurmurError::NoDefaultInputDevice)?;
                warn!("no default input device, falling back to first available input");
                fallback
            };

            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening input device"
            );

            let supported = device
                .default_input_config()
                .map_err(|e| MurmurError::AudioDevice(e.to_string()))?;
            let device_rate = supported.sample_rate().0;
            let channels = supported.channels() as usize;

            info!(device_rate, channels, "audio config selected");

            let config = StreamConfig {
                channels: channels as u16,
                sample_rate: SampleRate(device_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let ring_cap = (device_rate * CALLBACK_RING_SECS) as usize;
            let (producer, consumer) = HeapRb::<f32>::new(ring_cap).split();

            let failed = Arc::new(AtomicBool::new(false));

            let stream = match supported.sample_format() {
                cpal::SampleFormat::F32 => build_stream::<f32>(
                    &device,
                    &config,
                    producer,
                    Arc::clone(&running),
                    Arc::clone(&failed),
                    channels,
                    |s| s,
                ),
                cpal::SampleFormat::I16 => build_stream::<i16>(
                    &device,
                    &config,
                    producer,
                    Arc::clone(&running),
                    Arc::clone(&failed),
                    channels,
                    |s| s as f32 / 32_768.0,
                ),
                cpal::SampleFormat::U8 => build_stream::<u8>(
                    &device,
                    &config,
                    producer,
                    Arc::clone(&running),
                    Arc::clone(&failed),
                    channels,
                    |s| (s as f32 - 128.0) / 128.0,
                ),
                fmt => {
                    return Err(MurmurError::AudioStream(format!(
                        "unsupported sample format: {fmt:?}"
                    )))
                }
            }?;

            stream
                .play()
                .map_err(|e| MurmurError::AudioStream(e.to_string()))?;

            let converter = RateConverter::new(device_rate, target_rate)?;

            Ok(Self {
                _stream: stream,
                consumer,
                converter,
                pending: Vec::new(),
                scratch: vec![0.0; 4096],
                failed,
                device_sample_rate: device_rate,
            })
        }

        /// Drain the callback ring through the rate converter into `pending`.
        fn pump(&mut self) {
            loop {
                let n = self.consumer.pop_slice(&mut self.scratch);
                if n == 0 {
                    break;
                }
                let converted = self.converter.process(&self.scratch[..n]);
                self.pending.extend_from_slice(&converted);
            }
        }
    }

    impl AudioSource for CpalSource {
        fn available(&mut self) -> usize {
            self.pump();
            self.pending.len()
        }

        fn read(&mut self, out: &mut [f32]) -> Result<usize> {
            if self.failed.load(Ordering::Relaxed) {
                return Err(MurmurError::AudioStream(
                    "input stream reported a device error".into(),
                ));
            }
            self.pump();
            let n = out.len().min(self.pending.len());
            out[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut producer: HeapProd<f32>,
        running: Arc<AtomicBool>,
        failed: Arc<AtomicBool>,
        channels: usize,
        to_f32: fn(T) -> f32,
    ) -> Result<Stream>
    where
        T: cpal::SizedSample + Send + 'static,
    {
        let mut mix_buf: Vec<f32> = Vec::new();
        device
            .build_input_stream(
                config,
                move |data: &[T], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / channels;
                    mix_buf.resize(frames, 0.0);
                    for (f, slot) in mix_buf.iter_mut().enumerate() {
                        let frame = &data[f * channels..(f + 1) * channels];
                        let sum: f32 = frame.iter().map(|s| to_f32(*s)).sum();
                        *slot = sum / channels as f32;
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!(
                            "callback ring full: dropped {} frames",
                            mix_buf.len() - written
                        );
                    }
                },
                {
                    let failed = Arc::clone(&failed);
                    move |err| {
                        error!("audio stream error: {err}");
                        failed.store(true, Ordering::Relaxed);
                    }
                },
                None,
            )
            .map_err(|e| MurmurError::AudioStream(e.to_string()))
    }
}

#[cfg(feature = "audio-cpal")]
pub use cpal_source::CpalSource;
