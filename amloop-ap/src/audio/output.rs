//! Audio output using cpal
//!
//! Opens an output device and renders an [`AudioGraph`] into it. The graph's
//! clock is a [`FrameClock`] advanced by the device callback, so schedule
//! times and rendered frames can never drift apart.
//!
//! The cpal stream is not `Send` on every platform; keep [`DeviceOutput`] on
//! the thread that opened it and hand the graph to other tasks instead.

use crate::error::{Error, Result};
use crate::playback::graph::{AudioGraph, Clock, FrameClock, VoiceTable};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Sample rate requested from the device when it supports it
pub const PREFERRED_SAMPLE_RATE: u32 = amloop_common::timing::DEFAULT_SAMPLE_RATE;

/// An opened output device and, once started, its stream
pub struct DeviceOutput {
    device: Device,
    device_name: String,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
}

impl std::fmt::Debug for DeviceOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceOutput")
            .field("device_name", &self.device_name)
            .field("sample_rate", &self.config.sample_rate.0)
            .field("channels", &self.config.channels)
            .field("sample_format", &self.sample_format)
            .field("running", &self.stream.is_some())
            .finish()
    }
}

impl DeviceOutput {
    /// Names of every output device on the default host
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open `device_name`, or the default device
    ///
    /// An unknown name falls back to the default device. Having no output
    /// device at all is an unsupported environment.
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let requested = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
                let found = devices.find(|d| d.name().ok().as_deref() == Some(name));
                if found.is_none() {
                    warn!("Requested device '{}' not found, falling back to default device", name);
                }
                found
            }
            None => None,
        };

        let device = match requested {
            Some(device) => device,
            None => host.default_output_device().ok_or_else(|| {
                Error::UnsupportedEnvironment("No audio output device available".to_string())
            })?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (config, sample_format) = Self::best_config(&device)?;
        info!(
            "Using audio device '{}' ({}Hz, {} channels, {:?})",
            device_name, config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            device_name,
            config,
            sample_format,
            stream: None,
            error_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Prefers the default rate in stereo f32, else the device default
    fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

        let preferred = supported.find(|config| {
            config.channels() == 2
                && config.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
                && config.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
                && config.sample_format() == SampleFormat::F32
        });
        if let Some(config) = preferred {
            let sample_format = config.sample_format();
            let config = config
                .with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE))
                .config();
            return Ok((config, sample_format));
        }

        let config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        Ok((config.config(), config.sample_format()))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// True once the stream has reported an error
    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    /// Start the stream and return the graph it renders
    pub fn start(&mut self) -> Result<AudioGraph> {
        if self.stream.is_some() {
            return Err(Error::AudioOutput("Audio stream already started".to_string()));
        }

        let clock = FrameClock::new(self.sample_rate());
        let graph = AudioGraph::new(Arc::new(clock.clone()), self.sample_rate());

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(&graph, clock)?,
            SampleFormat::I16 => self.build_stream::<i16>(&graph, clock)?,
            SampleFormat::U16 => self.build_stream::<u16>(&graph, clock)?,
            other => {
                return Err(Error::AudioOutput(format!("Unsupported sample format: {:?}", other)));
            }
        };
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);

        info!("Audio stream started");
        Ok(graph)
    }

    fn build_stream<T>(&self, graph: &AudioGraph, clock: FrameClock) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.config.channels as usize;
        let sample_rate = self.sample_rate();
        let voices = graph.voice_table();
        let error_flag = Arc::clone(&self.error_flag);
        let mut mix: Vec<f32> = Vec::new();

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    mix.resize(data.len(), 0.0);
                    let start_time = clock.now();
                    // Never block the device thread
                    if !VoiceTable::try_render_shared(&voices, &mut mix, channels, sample_rate, start_time) {
                        trace!("Voice table busy, rendered silence");
                    }

                    for (out, sample) in data.iter_mut().zip(&mix) {
                        *out = T::from_sample(sample.clamp(-1.0, 1.0));
                    }
                    clock.advance((data.len() / channels.max(1)) as u64);
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    /// Pause and drop the stream
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
            info!("Audio stream stopped");
        }
        Ok(())
    }
}
