//! CPAL device discovery and the output stream that drives an [`AudioEngine`].
//!
//! # Example
//!
//! ```no_run
//! use klangraum::{CpalDevice, SoundSystem, SystemConfig};
//!
//! let device = CpalDevice::default_output().expect("no output device");
//! let (mut system, engine) = SoundSystem::new(SystemConfig {
//!     sample_rate: device.sample_rate(),
//!     device_channels: device.channels() as usize,
//!     ..SystemConfig::default()
//! });
//! match device.open(engine) {
//!     Ok(stream) => drop(stream),
//!     // keep the engine, and with it the command queue, alive
//!     Err(failed) => {
//!         if let Some(engine) = failed.engine {
//!             system.attach_engine(engine).unwrap();
//!         }
//!     }
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SupportedStreamConfig};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::engine::AudioEngine;
use crate::error::{Error, Result};
use crate::settings::Latency;

/// A discovered audio output device.
///
/// Use [`CpalDevice::default_output`] to get the system default, or
/// [`CpalDevice::list_outputs`] to enumerate all available devices.
pub struct CpalDevice {
    device: cpal::Device,
    config: SupportedStreamConfig,

    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalDevice {
    /// Get the system's default output device.
    ///
    /// Returns `None` if no audio device is available.
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        let Some(device) = host.default_output_device() else {
            warn!("no default audio output device");
            return None;
        };
        Self::from_device(device)
    }

    /// List all available audio output devices.
    ///
    /// Returns an empty list if no devices are found or if enumeration fails.
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(Self::from_device).collect())
            .unwrap_or_default()
    }

    fn from_device(device: cpal::Device) -> Option<Self> {
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            name,
            device,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Start streaming `engine` to this device.
    ///
    /// The buffer size follows the engine's latency setting. If the device
    /// rejects a fixed size, its default is used instead. On failure the
    /// engine is handed back inside the [`OpenError`].
    pub fn open(&self, engine: AudioEngine) -> std::result::Result<OutputStream, OpenError> {
        let latency = engine.latency();
        let engine = Arc::new(Mutex::new(engine));
        match StreamThread::spawn(self, engine.clone(), latency) {
            Ok(player) => {
                info!(device = %self.name, ?latency, "audio output started");
                Ok(OutputStream {
                    device: self.device.clone(),
                    config: self.config.clone(),
                    engine,
                    latency,
                    player: Some(player),
                })
            }
            Err(error) => Err(OpenError {
                error,
                engine: reclaim(engine),
            }),
        }
    }
}

/// Why [`CpalDevice::open`] failed, along with the engine it was given.
pub struct OpenError {
    pub error: Error,
    /// `None` only if the output thread could not be joined and still holds it
    pub engine: Option<AudioEngine>,
}

impl fmt::Debug for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenError")
            .field("error", &self.error)
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for OpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

fn reclaim(engine: Arc<Mutex<AudioEngine>>) -> Option<AudioEngine> {
    match Arc::try_unwrap(engine) {
        Ok(engine) => Some(engine.into_inner()),
        Err(_) => {
            warn!("audio engine still shared after a failed open");
            None
        }
    }
}

/// A running output stream.
///
/// Owns the engine behind a lock that the device callback only ever
/// `try_lock`s; a contended callback renders silence. Dropping the stream
/// stops playback.
pub struct OutputStream {
    device: cpal::Device,
    config: SupportedStreamConfig,
    engine: Arc<Mutex<AudioEngine>>,
    latency: Latency,
    player: Option<StreamThread>,
}

impl OutputStream {
    pub fn engine(&self) -> &Arc<Mutex<AudioEngine>> {
        &self.engine
    }

    /// Stop playback and take the engine back.
    pub fn into_engine(mut self) -> Option<AudioEngine> {
        if let Some(player) = self.player.take() {
            player.stop();
        }
        let engine = self.engine.clone();
        drop(self);
        reclaim(engine)
    }

    /// Latency the stream was opened with.
    pub fn latency(&self) -> Latency {
        self.latency
    }

    /// Reopen the stream if the engine's latency setting has changed.
    ///
    /// Call after receiving [`AudioEvent::LatencyChanged`](crate::AudioEvent::LatencyChanged).
    /// Returns whether the stream was reopened. If reopening fails the
    /// stream stays silent; [`into_engine`](Self::into_engine) recovers the engine.
    pub fn sync_latency(&mut self) -> Result<bool> {
        let latency = self.engine.lock().latency();
        if latency == self.latency {
            return Ok(false);
        }

        if let Some(player) = self.player.take() {
            player.stop();
        }
        let target = DeviceTarget {
            device: &self.device,
            config: &self.config,
        };
        self.player = Some(StreamThread::spawn_on(target, self.engine.clone(), latency)?);
        self.latency = latency;
        info!(?latency, "audio output reopened");
        Ok(true)
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if let Some(player) = self.player.take() {
            player.stop();
        }
    }
}

#[derive(Clone, Copy)]
struct DeviceTarget<'a> {
    device: &'a cpal::Device,
    config: &'a SupportedStreamConfig,
}

/// The cpal stream lives on its own parked thread.
struct StreamThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn spawn(
        device: &CpalDevice,
        engine: Arc<Mutex<AudioEngine>>,
        latency: Latency,
    ) -> Result<Self> {
        let target = DeviceTarget {
            device: &device.device,
            config: &device.config,
        };
        Self::spawn_on(target, engine, latency)
    }

    fn spawn_on(
        target: DeviceTarget<'_>,
        engine: Arc<Mutex<AudioEngine>>,
        latency: Latency,
    ) -> Result<Self> {
        let device = target.device.clone();
        let sample_format = target.config.sample_format();
        let mut stream_config = target.config.config();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name("klangraum-output".into())
            .spawn(move || {
                stream_config.buffer_size = BufferSize::Fixed(latency.buffer_frames());
                let stream = build_stream(&device, sample_format, &stream_config, engine.clone())
                    .or_else(|e| {
                        warn!("fixed buffer size rejected ({e}), using device default");
                        stream_config.buffer_size = BufferSize::Default;
                        build_stream(&device, sample_format, &stream_config, engine)
                    })
                    .and_then(|stream| {
                        stream
                            .play()
                            .map_err(|e| Error::Device(e.to_string()))
                            .map(|_| stream)
                    });

                let stream = match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // the stream plays for as long as this thread holds it
                while !stop_flag.load(Ordering::Acquire) {
                    thread::park();
                }
                drop(stream);
            })
            .map_err(|e| Error::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop, handle }),
            Ok(Err(e)) => {
                warn!("audio output unavailable: {e}");
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Device("output thread exited".into()))
            }
        }
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
        let _ = self.handle.join();
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    engine: Arc<Mutex<AudioEngine>>,
) -> Result<cpal::Stream> {
    let channels = stream_config.channels as usize;
    let on_error = |err: cpal::StreamError| warn!("cpal stream error: {err}");
    // room for the largest buffer we ask for; conversions resize only past it
    let mut scratch = vec![0.0f32; Latency::High.buffer_frames() as usize * channels * 2];

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _| render(&engine, data, channels),
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            stream_config,
            move |data: &mut [i16], _| {
                scratch.resize(data.len(), 0.0);
                render(&engine, &mut scratch, channels);
                for (out, s) in data.iter_mut().zip(&scratch) {
                    *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                }
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            stream_config,
            move |data: &mut [u16], _| {
                scratch.resize(data.len(), 0.0);
                render(&engine, &mut scratch, channels);
                for (out, s) in data.iter_mut().zip(&scratch) {
                    *out = ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16;
                }
            },
            on_error,
            None,
        ),
        other => return Err(Error::Device(format!("unsupported sample format {other:?}"))),
    };
    stream.map_err(|e| Error::Device(e.to_string()))
}

#[inline]
fn render(engine: &Mutex<AudioEngine>, data: &mut [f32], channels: usize) {
    match engine.try_lock() {
        Some(mut engine) => engine.render(data, channels),
        None => data.iter_mut().for_each(|s| *s = 0.0),
    }
}
